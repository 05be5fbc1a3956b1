//! Minimal SQL client surface used by database collectors.
//!
//! Collectors only need two operations: run a query and visit each row, and
//! execute a statement. Values are exposed as text so one row type serves
//! every backend.
//!
//! - [`SqlClient`]: the driver seam
//! - [`PgClient`]: PostgreSQL over `sqlx`
//! - [`Dsn`]: `key=value;` connection strings used by the IBM drivers

mod dsn;
mod postgres;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::collector::CollectorError;

pub use dsn::{Dsn, DsnError};
pub use postgres::PgClient;

/// Errors from SQL clients.
#[derive(Debug, Error)]
pub enum DbError {
    /// Could not reach or authenticate with the server.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server rejected or failed the statement.
    #[error("query failed: {0}")]
    Query(String),

    /// The statement did not finish before the deadline.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// A value could not be converted to text.
    #[error("failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },

    /// The client was closed by `cleanup`.
    #[error("client is closed")]
    Closed,
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::Configuration(_) => Self::Connect(err.to_string()),
            sqlx::Error::PoolClosed => Self::Closed,
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("28P01") => {
                Self::Connect(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

impl From<DbError> for CollectorError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connect(_) => Self::ProbeUnavailable(err.to_string()),
            DbError::Query(_) => Self::ProbeFailed {
                code: None,
                message: err.to_string(),
            },
            DbError::Timeout(timeout) => Self::ProbeTimeout(timeout),
            DbError::Decode { .. } => Self::Parse(err.to_string()),
            DbError::Closed => Self::Transient(err.to_string()),
        }
    }
}

/// One result row with text values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value of `column` (case-insensitive). `None` for NULL or unknown columns.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
            .and_then(|v| v.as_deref())
    }

    /// Integer value; fractional text is truncated toward zero.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        let raw = self.get(column)?.trim();
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|f| f as i64))
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column)?.trim().parse().ok()
    }

    /// `(column, value)` pairs in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(|v| v.as_deref()))
    }
}

/// Row visitor passed to [`SqlClient::query`].
pub type RowCallback<'a> = dyn FnMut(&Row) -> Result<(), DbError> + Send + 'a;

/// Driver seam for database collectors.
#[async_trait::async_trait]
pub trait SqlClient: Send + Sync {
    /// Run `sql` and call `on_row` for every returned row.
    async fn query(&self, sql: &str, on_row: &mut RowCallback<'_>) -> Result<(), DbError>;

    /// Execute a statement, returning affected rows.
    async fn exec(&self, sql: &str) -> Result<u64, DbError>;

    /// Release connections. Idempotent.
    async fn close(&self) {}
}

/// Run `sql` and collect every row.
pub async fn query_rows(client: &dyn SqlClient, sql: &str) -> Result<Vec<Row>, DbError> {
    let mut rows = Vec::new();
    client
        .query(sql, &mut |row: &Row| {
            rows.push(row.clone());
            Ok(())
        })
        .await?;
    Ok(rows)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Option<&str>)]) -> Row {
        Row::new(
            pairs.iter().map(|(c, _)| c.to_string()).collect(),
            pairs.iter().map(|(_, v)| v.map(str::to_string)).collect(),
        )
    }

    #[test]
    fn test_row_accessors() {
        let r = row(&[
            ("JOB_NAME", Some("QZDASOINIT")),
            ("CPU_PERCENTAGE", Some("12.5")),
            ("THREAD_COUNT", Some(" 4 ")),
            ("SUBSYSTEM", None),
        ]);

        assert_eq!(r.get("job_name"), Some("QZDASOINIT"));
        assert_eq!(r.get_f64("CPU_PERCENTAGE"), Some(12.5));
        assert_eq!(r.get_i64("CPU_PERCENTAGE"), Some(12));
        assert_eq!(r.get_i64("THREAD_COUNT"), Some(4));
        assert_eq!(r.get("SUBSYSTEM"), None);
        assert_eq!(r.get("MISSING"), None);
        assert_eq!(r.iter().count(), 4);
    }

    #[tokio::test]
    async fn test_query_rows_collects() {
        let client = testing::ScriptedClient::new().on(
            "FROM t",
            vec![vec![("a", Some("1"))], vec![("a", Some("2"))]],
        );
        let rows = query_rows(&client, "SELECT a FROM t").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_i64("a"), Some(2));

        assert!(query_rows(&client, "SELECT b FROM other").await.is_err());
    }

    #[test]
    fn test_error_mapping() {
        let err: CollectorError = DbError::Connect("refused".into()).into();
        assert!(matches!(err, CollectorError::ProbeUnavailable(_)));
        let err: CollectorError = DbError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(err, CollectorError::ProbeTimeout(_)));
        let err: CollectorError = DbError::Query("syntax".into()).into();
        assert!(matches!(err, CollectorError::ProbeFailed { .. }));
    }
}

//! Queries and row mapping.

use crate::dbdriver::Row;

pub(crate) const QUERY_SERVER_CONNECTIONS: &str = "\
SELECT current_setting('max_connections')::int AS max_connections,
       (SELECT count(*) FROM pg_stat_activity) AS connections";

pub(crate) const QUERY_DATABASES: &str = "\
SELECT d.datname,
       s.numbackends,
       s.xact_commit,
       s.xact_rollback,
       s.blks_read,
       s.blks_hit,
       s.tup_returned,
       s.tup_fetched,
       s.tup_inserted,
       s.tup_updated,
       s.tup_deleted,
       s.conflicts,
       s.temp_files,
       s.temp_bytes,
       s.deadlocks,
       pg_database_size(d.datname) AS size
FROM pg_stat_database s
JOIN pg_database d ON d.oid = s.datid
WHERE d.datallowconn AND NOT d.datistemplate";

/// Page-count estimate against `pg_stats` average widths. Covers the
/// database the session is connected to.
pub(crate) const QUERY_TABLE_BLOAT: &str = "\
SELECT current_database() AS datname,
       schemaname,
       tblname,
       bs * tblpages AS real_size,
       CASE WHEN tblpages > est_tblpages THEN bs * (tblpages - est_tblpages) ELSE 0 END AS bloat_size,
       CASE WHEN tblpages > est_tblpages THEN 100 * (tblpages - est_tblpages) / tblpages::float ELSE 0 END AS bloat_ratio
FROM (
  SELECT ns.nspname AS schemaname,
         tbl.relname AS tblname,
         tbl.relpages AS tblpages,
         current_setting('block_size')::numeric AS bs,
         ceil(greatest(tbl.reltuples, 0) * (24 + coalesce(sum(s.avg_width), 0))
              / (current_setting('block_size')::numeric - 24)) AS est_tblpages
  FROM pg_class tbl
  JOIN pg_namespace ns ON ns.oid = tbl.relnamespace
  LEFT JOIN pg_stats s ON s.schemaname = ns.nspname AND s.tablename = tbl.relname
  WHERE tbl.relkind = 'r'
    AND ns.nspname NOT IN ('pg_catalog', 'information_schema')
  GROUP BY ns.nspname, tbl.relname, tbl.relpages, tbl.reltuples
) t
WHERE tblpages > 0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConnections {
    pub max: i64,
    pub used: i64,
}

impl ServerConnections {
    pub fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            max: row.get_i64("max_connections")?,
            used: row.get_i64("connections")?,
        })
    }

    pub fn available(&self) -> i64 {
        (self.max - self.used).max(0)
    }

    /// Used share of `max_connections`, in percent.
    pub fn utilization(&self) -> f64 {
        if self.max <= 0 {
            return 0.0;
        }
        self.used as f64 * 100.0 / self.max as f64
    }
}

/// Counter columns of `pg_stat_database` reported per database.
pub const DATABASE_COUNTERS: &[&str] = &[
    "numbackends",
    "xact_commit",
    "xact_rollback",
    "blks_read",
    "blks_hit",
    "tup_returned",
    "tup_fetched",
    "tup_inserted",
    "tup_updated",
    "tup_deleted",
    "conflicts",
    "temp_files",
    "temp_bytes",
    "deadlocks",
    "size",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub name: String,
    /// `(column, value)` for every counter the row carried.
    pub counters: Vec<(&'static str, i64)>,
}

impl DatabaseStats {
    pub fn from_row(row: &Row) -> Option<Self> {
        let name = row.get("datname")?.trim();
        if name.is_empty() {
            return None;
        }
        let counters = DATABASE_COUNTERS
            .iter()
            .filter_map(|c| row.get_i64(c).map(|v| (*c, v)))
            .collect();
        Some(Self {
            name: name.to_string(),
            counters,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableBloat {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub real_size: i64,
    pub bloat_size: i64,
    pub bloat_ratio: f64,
}

impl TableBloat {
    pub fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            database: row.get("datname")?.to_string(),
            schema: row.get("schemaname")?.to_string(),
            table: row.get("tblname")?.to_string(),
            real_size: row.get_i64("real_size").unwrap_or(0),
            bloat_size: row.get_i64("bloat_size").unwrap_or(0),
            bloat_ratio: row.get_f64("bloat_ratio").unwrap_or(0.0),
        })
    }

    pub fn key(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn row(pairs: &[(&str, Option<&str>)]) -> Row {
        Row::new(
            pairs.iter().map(|(c, _)| c.to_string()).collect::<Arc<[String]>>(),
            pairs.iter().map(|(_, v)| v.map(str::to_string)).collect(),
        )
    }

    #[test]
    fn test_server_connections() {
        let c = ServerConnections::from_row(&row(&[
            ("max_connections", Some("100")),
            ("connections", Some("25")),
        ]))
        .unwrap();
        assert_eq!(c.available(), 75);
        assert_eq!(c.utilization(), 25.0);

        let zero = ServerConnections { max: 0, used: 3 };
        assert_eq!(zero.utilization(), 0.0);
        assert_eq!(zero.available(), 0);
        assert!(ServerConnections::from_row(&row(&[("connections", Some("1"))])).is_none());
    }

    #[test]
    fn test_database_stats() {
        let db = DatabaseStats::from_row(&row(&[
            ("datname", Some("app")),
            ("numbackends", Some("3")),
            ("xact_commit", Some("1200")),
            ("size", Some("8388608")),
            ("conflicts", None),
        ]))
        .unwrap();
        assert_eq!(db.name, "app");
        assert_eq!(
            db.counters,
            vec![("numbackends", 3), ("xact_commit", 1200), ("size", 8_388_608)]
        );
        assert!(DatabaseStats::from_row(&row(&[("datname", Some(" "))])).is_none());
    }

    #[test]
    fn test_table_bloat() {
        let t = TableBloat::from_row(&row(&[
            ("datname", Some("app")),
            ("schemaname", Some("public")),
            ("tblname", Some("orders")),
            ("real_size", Some("81920")),
            ("bloat_size", Some("16384")),
            ("bloat_ratio", Some("20.0")),
        ]))
        .unwrap();
        assert_eq!(t.key(), "app.public.orders");
        assert_eq!(t.bloat_size, 16384);
        assert_eq!(t.bloat_ratio, 20.0);
    }
}

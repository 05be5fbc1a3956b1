//! IBM i catalog queries and row mapping.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::dbdriver::Row;

pub(crate) const QUERY_SYSTEM_STATUS: &str = "\
SELECT AVERAGE_CPU_UTILIZATION,
       CONFIGURED_CPUS,
       MAIN_STORAGE_SIZE,
       SYSTEM_ASP_USED,
       CURRENT_TEMPORARY_STORAGE,
       TOTAL_JOBS_IN_SYSTEM,
       ACTIVE_JOBS_IN_SYSTEM,
       INTERACTIVE_JOBS_IN_SYSTEM,
       BATCH_JOBS_RUNNING,
       ACTIVE_THREADS_IN_SYSTEM
FROM QSYS2.SYSTEM_STATUS_INFO";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("active job target '{0}' must be NUMBER/USER/NAME")]
    Shape(String),

    #[error("active job target '{target}': invalid {part} '{value}'")]
    Part {
        target: String,
        part: &'static str,
        value: String,
    },
}

/// Qualified job name `NUMBER/USER/NAME`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveJobTarget {
    pub number: String,
    pub user: String,
    pub name: String,
}

/// Object names on IBM i: letters, digits and `_ $ # @ .`, at most 10 chars.
fn valid_object_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 10
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#' | '@' | '.'))
}

impl FromStr for ActiveJobTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').map(str::trim).collect();
        let [number, user, name] = parts.as_slice() else {
            return Err(TargetError::Shape(s.to_string()));
        };

        if number.len() != 6 || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(TargetError::Part {
                target: s.to_string(),
                part: "job number",
                value: number.to_string(),
            });
        }
        for (part, value) in [("user", user), ("job name", name)] {
            if !valid_object_name(value) {
                return Err(TargetError::Part {
                    target: s.to_string(),
                    part,
                    value: value.to_string(),
                });
            }
        }

        Ok(Self {
            number: number.to_string(),
            user: user.to_ascii_uppercase(),
            name: name.to_ascii_uppercase(),
        })
    }
}

impl fmt::Display for ActiveJobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.number, self.user, self.name)
    }
}

impl ActiveJobTarget {
    /// Lookup for this one job. Components are validated object names, so
    /// they are safe to inline.
    pub fn query(&self) -> String {
        format!(
            "SELECT JOB_NAME, JOB_STATUS, SUBSYSTEM, JOB_TYPE, ELAPSED_CPU_TIME, ELAPSED_TIME, \
TEMPORARY_STORAGE, CPU_PERCENTAGE, ELAPSED_INTERACTIVE_TRANSACTIONS, \
ELAPSED_TOTAL_DISK_IO_COUNT, THREAD_COUNT \
FROM TABLE(QSYS2.ACTIVE_JOB_INFO(JOB_NAME_FILTER => '{name}', CURRENT_USER_LIST_FILTER => '{user}', \
DETAILED_INFO => 'ALL')) X WHERE JOB_NAME = '{job}' FETCH FIRST 1 ROWS ONLY",
            name = self.name,
            user = self.user,
            job = self,
        )
    }
}

/// Row of `QSYS2.SYSTEM_STATUS_INFO`. Columns absent on older releases are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemStatus {
    pub cpu_utilization: Option<f64>,
    pub configured_cpus: Option<i64>,
    /// Kilobytes.
    pub main_storage_size: Option<i64>,
    pub system_asp_used: Option<f64>,
    /// Megabytes.
    pub current_temporary_storage: Option<i64>,
    pub total_jobs: Option<i64>,
    pub active_jobs: Option<i64>,
    pub interactive_jobs: Option<i64>,
    pub batch_jobs_running: Option<i64>,
    pub active_threads: Option<i64>,
}

impl SystemStatus {
    pub fn from_row(row: &Row) -> Self {
        Self {
            cpu_utilization: row.get_f64("AVERAGE_CPU_UTILIZATION"),
            configured_cpus: row.get_i64("CONFIGURED_CPUS"),
            main_storage_size: row.get_i64("MAIN_STORAGE_SIZE"),
            system_asp_used: row.get_f64("SYSTEM_ASP_USED"),
            current_temporary_storage: row.get_i64("CURRENT_TEMPORARY_STORAGE"),
            total_jobs: row.get_i64("TOTAL_JOBS_IN_SYSTEM"),
            active_jobs: row.get_i64("ACTIVE_JOBS_IN_SYSTEM"),
            interactive_jobs: row.get_i64("INTERACTIVE_JOBS_IN_SYSTEM"),
            batch_jobs_running: row.get_i64("BATCH_JOBS_RUNNING"),
            active_threads: row.get_i64("ACTIVE_THREADS_IN_SYSTEM"),
        }
    }
}

/// One row of `QSYS2.ACTIVE_JOB_INFO`. Text is trimmed; unparseable
/// numbers are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveJob {
    pub job_name: Option<String>,
    pub status: Option<String>,
    pub subsystem: Option<String>,
    pub job_type: Option<String>,
    /// Milliseconds.
    pub elapsed_cpu_time: Option<i64>,
    /// Seconds.
    pub elapsed_time: Option<i64>,
    /// Kilobytes as reported.
    pub temporary_storage_kb: Option<i64>,
    pub cpu_percentage: Option<f64>,
    pub interactive_transactions: Option<i64>,
    pub disk_io: Option<i64>,
    pub threads: Option<i64>,
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get(column)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl ActiveJob {
    pub fn from_row(row: &Row) -> Self {
        Self {
            job_name: text(row, "JOB_NAME"),
            status: text(row, "JOB_STATUS"),
            subsystem: text(row, "SUBSYSTEM"),
            job_type: text(row, "JOB_TYPE"),
            elapsed_cpu_time: row.get_i64("ELAPSED_CPU_TIME"),
            elapsed_time: row.get_i64("ELAPSED_TIME"),
            temporary_storage_kb: row.get_i64("TEMPORARY_STORAGE"),
            cpu_percentage: row.get_f64("CPU_PERCENTAGE"),
            interactive_transactions: row.get_i64("ELAPSED_INTERACTIVE_TRANSACTIONS"),
            disk_io: row.get_i64("ELAPSED_TOTAL_DISK_IO_COUNT"),
            threads: row.get_i64("THREAD_COUNT"),
        }
    }

    /// Temporary storage in whole megabytes.
    pub fn temporary_storage_mb(&self) -> Option<i64> {
        self.temporary_storage_kb.map(|kb| kb / 1024)
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
    fn test_target_parse() {
        let t: ActiveJobTarget = "123456/testuser/job1".parse().unwrap();
        assert_eq!(t.number, "123456");
        assert_eq!(t.user, "TESTUSER");
        assert_eq!(t.to_string(), "123456/TESTUSER/JOB1");

        let q = t.query();
        assert!(q.contains("QSYS2.ACTIVE_JOB_INFO"));
        assert!(q.contains("JOB_NAME = '123456/TESTUSER/JOB1'"));
    }

    #[test]
    fn test_target_rejects() {
        assert!(matches!(
            "QZDASOINIT".parse::<ActiveJobTarget>(),
            Err(TargetError::Shape(_))
        ));
        assert!("1234/USER/JOB".parse::<ActiveJobTarget>().is_err());
        assert!("123456//JOB".parse::<ActiveJobTarget>().is_err());
        assert!("123456/USER/JOB'--".parse::<ActiveJobTarget>().is_err());
        assert!("123456/USER/NAMETOOLONG1".parse::<ActiveJobTarget>().is_err());
        assert!("123456/a/b/c".parse::<ActiveJobTarget>().is_err());
    }

    #[test]
    fn test_active_job_row() {
        let job = ActiveJob::from_row(&row(&[
            ("JOB_NAME", Some("  123456/TESTUSER/JOB1  ")),
            ("JOB_STATUS", Some("  ACTIVE  ")),
            ("ELAPSED_CPU_TIME", Some("1000")),
            ("TEMPORARY_STORAGE", Some("2048")),
            ("CPU_PERCENTAGE", Some("25.5")),
            ("THREAD_COUNT", Some("8")),
            ("SUBSYSTEM", Some("")),
        ]));
        assert_eq!(job.job_name.as_deref(), Some("123456/TESTUSER/JOB1"));
        assert_eq!(job.status.as_deref(), Some("ACTIVE"));
        assert_eq!(job.subsystem, None);
        assert_eq!(job.temporary_storage_mb(), Some(2));
        assert_eq!(job.cpu_percentage, Some(25.5));
        assert_eq!(job.threads, Some(8));
    }

    #[test]
    fn test_active_job_invalid_numbers() {
        let job = ActiveJob::from_row(&row(&[
            ("ELAPSED_CPU_TIME", Some("INVALID")),
            ("CPU_PERCENTAGE", Some("N/A")),
            ("THREAD_COUNT", Some("abc")),
        ]));
        assert_eq!(job, ActiveJob::default());
        assert_eq!(job.temporary_storage_mb(), None);
    }

    #[test]
    fn test_system_status_row() {
        let s = SystemStatus::from_row(&row(&[
            ("AVERAGE_CPU_UTILIZATION", Some("12.34")),
            ("CONFIGURED_CPUS", Some("4")),
            ("TOTAL_JOBS_IN_SYSTEM", Some("1520")),
        ]));
        assert_eq!(s.cpu_utilization, Some(12.34));
        assert_eq!(s.total_jobs, Some(1520));
        assert_eq!(s.active_threads, None);
    }
}

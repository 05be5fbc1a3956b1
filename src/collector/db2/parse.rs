//! DB2 monitoring table functions and row mapping.

use crate::dbdriver::Row;

pub(crate) const QUERY_DATABASE: &str = "\
SELECT LOCK_WAITS,
       DEADLOCKS,
       LOCK_TIMEOUTS,
       ROWS_READ,
       ROWS_RETURNED,
       TOTAL_APP_COMMITS,
       TOTAL_APP_ROLLBACKS,
       POOL_DATA_L_READS + POOL_INDEX_L_READS AS LOGICAL_READS,
       POOL_DATA_P_READS + POOL_INDEX_P_READS AS PHYSICAL_READS
FROM TABLE(MON_GET_DATABASE(-2))";

pub(crate) const QUERY_CONNECTIONS: &str = "\
SELECT APPL_STATUS, COUNT(*) AS CONNECTIONS
FROM SYSIBMADM.SNAPAPPL_INFO
GROUP BY APPL_STATUS";

pub(crate) const QUERY_TABLESPACES: &str = "\
SELECT TBSP_NAME,
       TBSP_TYPE,
       TBSP_STATE,
       TBSP_PAGE_SIZE,
       TBSP_TOTAL_PAGES,
       TBSP_USABLE_PAGES,
       TBSP_USED_PAGES,
       TBSP_FREE_PAGES
FROM TABLE(MON_GET_TABLESPACE(NULL, -2))";

/// `(column, sample key)` pairs read from `MON_GET_DATABASE`.
pub const DATABASE_COUNTERS: &[(&str, &str)] = &[
    ("LOCK_WAITS", "lock_waits"),
    ("DEADLOCKS", "deadlocks"),
    ("LOCK_TIMEOUTS", "lock_timeouts"),
    ("ROWS_READ", "rows_read"),
    ("ROWS_RETURNED", "rows_returned"),
    ("TOTAL_APP_COMMITS", "commits"),
    ("TOTAL_APP_ROLLBACKS", "rollbacks"),
    ("LOGICAL_READS", "logical_reads"),
    ("PHYSICAL_READS", "physical_reads"),
];

/// Database-wide counters. With `MON_GET_DATABASE(-2)` a partitioned
/// instance returns one row per member; values are summed.
pub fn database_counters(rows: &[Row]) -> Vec<(&'static str, i64)> {
    DATABASE_COUNTERS
        .iter()
        .filter_map(|(column, key)| {
            let values: Vec<i64> = rows.iter().filter_map(|r| r.get_i64(column)).collect();
            (!values.is_empty()).then(|| (*key, values.iter().sum()))
        })
        .collect()
}

/// Application connections by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub total: i64,
    /// Unit of work executing.
    pub executing: i64,
    /// Waiting for the client or connected without work.
    pub idle: i64,
    pub other: i64,
}

impl ConnectionCounts {
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut counts = Self::default();
        for row in rows {
            let n = row.get_i64("CONNECTIONS").unwrap_or(0);
            let status = row.get("APPL_STATUS").map(str::trim).unwrap_or_default();
            match status.to_ascii_uppercase().as_str() {
                "UOWEXEC" => counts.executing += n,
                "UOWWAIT" | "CONNECTED" | "CONNECTPEND" => counts.idle += n,
                _ => counts.other += n,
            }
            counts.total += n;
        }
        counts
    }
}

/// One row of `MON_GET_TABLESPACE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tablespace {
    pub name: String,
    /// `DMS` or `SMS`.
    pub kind: String,
    pub state: String,
    pub page_size: i64,
    pub total_pages: i64,
    pub usable_pages: i64,
    pub used_pages: i64,
    pub free_pages: i64,
}

impl Tablespace {
    pub fn from_row(row: &Row) -> Option<Self> {
        let name = row.get("TBSP_NAME")?.trim();
        if name.is_empty() {
            return None;
        }
        let text = |column: &str| row.get(column).map(str::trim).unwrap_or_default().to_string();
        let pages = |column: &str| row.get_i64(column).unwrap_or(0).max(0);
        Some(Self {
            name: name.to_string(),
            kind: text("TBSP_TYPE"),
            state: text("TBSP_STATE"),
            page_size: pages("TBSP_PAGE_SIZE"),
            total_pages: pages("TBSP_TOTAL_PAGES"),
            usable_pages: pages("TBSP_USABLE_PAGES"),
            used_pages: pages("TBSP_USED_PAGES"),
            free_pages: pages("TBSP_FREE_PAGES"),
        })
    }

    pub fn used_bytes(&self) -> i64 {
        self.used_pages.saturating_mul(self.page_size)
    }

    pub fn free_bytes(&self) -> i64 {
        self.free_pages.saturating_mul(self.page_size)
    }

    /// Used share of usable pages, in percent. SMS tablespaces report no
    /// usable page count and yield 0.
    pub fn utilization(&self) -> f64 {
        if self.usable_pages <= 0 {
            return 0.0;
        }
        (self.used_pages as f64 * 100.0 / self.usable_pages as f64).min(100.0)
    }

    pub fn is_normal(&self) -> bool {
        self.state.eq_ignore_ascii_case("NORMAL")
    }
}

use crate::charts::{Chart, ChartKind, Dim, PRECISION, clean_id};

use super::parse::Tablespace;

const PRIO_DB: u32 = 8000;
const PRIO_TABLESPACE: u32 = 8100;

pub(super) fn database_charts() -> Vec<Chart> {
    let counter = |id: &str, name: &str| Dim::new(id, name).incremental();
    vec![
        Chart::new("connections", "Connections", "connections", "connections", "db2.connections")
            .with_kind(ChartKind::Stacked)
            .with_priority(PRIO_DB)
            .with_dim(Dim::new("connections_executing", "executing"))
            .with_dim(Dim::new("connections_idle", "idle"))
            .with_dim(Dim::new("connections_other", "other")),
        Chart::new(
            "connections_total",
            "Total connections",
            "connections",
            "connections",
            "db2.connections_total",
        )
        .with_priority(PRIO_DB + 1)
        .with_dim(Dim::new("connections_total", "total")),
        Chart::new("transactions", "Transactions", "transactions/s", "database", "db2.transactions")
            .with_priority(PRIO_DB + 2)
            .with_dim(counter("commits", "committed"))
            .with_dim(counter("rollbacks", "rolled_back")),
        Chart::new("rows", "Row activity", "rows/s", "database", "db2.rows")
            .with_priority(PRIO_DB + 3)
            .with_dim(counter("rows_read", "read"))
            .with_dim(counter("rows_returned", "returned")),
        Chart::new("locks", "Lock events", "events/s", "locks", "db2.locks")
            .with_priority(PRIO_DB + 4)
            .with_dim(counter("lock_waits", "waits"))
            .with_dim(counter("lock_timeouts", "timeouts"))
            .with_dim(counter("deadlocks", "deadlocks")),
        Chart::new("bufferpool_reads", "Buffer pool reads", "reads/s", "bufferpool", "db2.bufferpool_reads")
            .with_kind(ChartKind::Stacked)
            .with_priority(PRIO_DB + 5)
            .with_dim(counter("logical_reads", "logical"))
            .with_dim(counter("physical_reads", "physical")),
    ]
}

pub(super) fn tablespace_prefix(name: &str) -> String {
    format!("tablespace_{}_", clean_id(name))
}

pub(super) fn tablespace_charts(ts: &Tablespace) -> Vec<Chart> {
    let p = tablespace_prefix(&ts.name);
    let chart = |suffix: &str, title: &str, units: &str, priority: u32| {
        Chart::new(
            format!("{p}{suffix}"),
            title,
            units,
            "tablespaces",
            format!("db2.tablespace_{suffix}"),
        )
        .with_priority(PRIO_TABLESPACE + priority)
        .with_label("tablespace", ts.name.as_str())
        .with_label("type", ts.kind.as_str())
    };

    vec![
        chart("utilization", "Tablespace utilization", "percentage", 0)
            .with_kind(ChartKind::Area)
            .with_dim(Dim::new(format!("{p}utilization"), "used").with_divisor(PRECISION)),
        chart("usage", "Tablespace usage", "B", 1)
            .with_kind(ChartKind::Stacked)
            .with_dim(Dim::new(format!("{p}used_bytes"), "used"))
            .with_dim(Dim::new(format!("{p}free_bytes"), "free")),
        chart("state", "Tablespace state", "state", 2)
            .with_dim(Dim::new(format!("{p}state_normal"), "normal"))
            .with_dim(Dim::new(format!("{p}state_abnormal"), "abnormal")),
    ]
}

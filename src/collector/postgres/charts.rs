//! Chart templates for PostgreSQL.

use crate::charts::{Chart, ChartKind, Dim, PRECISION, clean_id};

use super::parse::TableBloat;

const PRIO_SERVER: u32 = 6000;
const PRIO_DB: u32 = 6100;
const PRIO_TABLE: u32 = 6200;

pub(super) fn server_charts() -> Vec<Chart> {
    vec![
        Chart::new(
            "connections_utilization",
            "Connection utilization",
            "percentage",
            "connections",
            "postgres.connections_utilization",
        )
        .with_kind(ChartKind::Area)
        .with_priority(PRIO_SERVER)
        .with_dim(Dim::new("server_connections_utilization", "used").with_divisor(PRECISION)),
        Chart::new(
            "connections_usage",
            "Connections usage",
            "connections",
            "connections",
            "postgres.connections_usage",
        )
        .with_kind(ChartKind::Stacked)
        .with_priority(PRIO_SERVER + 1)
        .with_dim(Dim::new("server_connections_available", "available"))
        .with_dim(Dim::new("server_connections_used", "used")),
    ]
}

pub(super) fn database_prefix(name: &str) -> String {
    format!("db_{}_", clean_id(name))
}

pub(super) fn database_charts(name: &str) -> Vec<Chart> {
    let p = database_prefix(name);
    let chart = |suffix: &str, title: &str, units: &str, priority: u32| {
        Chart::new(
            format!("{p}{suffix}"),
            title,
            units,
            "databases",
            format!("postgres.db_{suffix}"),
        )
        .with_priority(PRIO_DB + priority)
        .with_label("database", name)
    };
    let counter = |column: &str, dim_name: &str| Dim::new(format!("{p}{column}"), dim_name).incremental();

    vec![
        chart("transactions", "Database transactions", "transactions/s", 0)
            .with_dim(counter("xact_commit", "committed"))
            .with_dim(counter("xact_rollback", "rollback")),
        chart("connections", "Database connections", "connections", 1)
            .with_dim(Dim::new(format!("{p}numbackends"), "connections")),
        chart("blocks", "Database blocks", "blocks/s", 2)
            .with_dim(counter("blks_read", "disk"))
            .with_dim(counter("blks_hit", "memory")),
        chart("rows", "Database row operations", "rows/s", 3)
            .with_kind(ChartKind::Stacked)
            .with_dim(counter("tup_returned", "returned"))
            .with_dim(counter("tup_fetched", "fetched"))
            .with_dim(counter("tup_inserted", "inserted"))
            .with_dim(counter("tup_updated", "updated"))
            .with_dim(counter("tup_deleted", "deleted")),
        chart("conflicts", "Database canceled queries", "queries/s", 4)
            .with_dim(counter("conflicts", "conflicts")),
        chart("deadlocks", "Database deadlocks", "deadlocks/s", 5)
            .with_dim(counter("deadlocks", "deadlocks")),
        chart("temp_files", "Database temporary files", "files/s", 6)
            .with_dim(counter("temp_files", "written")),
        chart("temp_bytes", "Database temporary files data", "B/s", 7)
            .with_dim(counter("temp_bytes", "written")),
        chart("size", "Database size", "B", 8).with_dim(Dim::new(format!("{p}size"), "size")),
    ]
}

pub(super) fn table_prefix(t: &TableBloat) -> String {
    format!(
        "table_{}_db_{}_schema_{}_",
        clean_id(&t.table),
        clean_id(&t.database),
        clean_id(&t.schema)
    )
}

pub(super) fn table_charts(t: &TableBloat) -> Vec<Chart> {
    let p = table_prefix(t);
    let labeled = |chart: Chart| {
        chart
            .with_label("database", t.database.as_str())
            .with_label("schema", t.schema.as_str())
            .with_label("table", t.table.as_str())
    };
    vec![
        labeled(
            Chart::new(
                format!("{p}bloat_size"),
                "Table bloat size",
                "B",
                "bloat",
                "postgres.table_bloat_size",
            )
            .with_priority(PRIO_TABLE)
            .with_dim(Dim::new(format!("{p}bloat_size"), "bloat")),
        ),
        labeled(
            Chart::new(
                format!("{p}bloat_size_perc"),
                "Table bloat size percentage",
                "percentage",
                "bloat",
                "postgres.table_bloat_size_perc",
            )
            .with_kind(ChartKind::Area)
            .with_priority(PRIO_TABLE + 1)
            .with_dim(Dim::new(format!("{p}bloat_size_perc"), "bloat").with_divisor(PRECISION)),
        ),
    ]
}

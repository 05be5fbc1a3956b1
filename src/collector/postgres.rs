//! PostgreSQL server, database and table statistics.
//!
//! - [`PostgresCollector`]: connection usage, `pg_stat_database` counters,
//!   table bloat estimates
//! - [`DatabaseStats`], [`TableBloat`]: row mapping

mod charts;
mod collector;
mod parse;

pub use collector::{DEFAULT_DSN, PostgresCollector, PostgresConfig};
pub use parse::{DATABASE_COUNTERS, DatabaseStats, ServerConnections, TableBloat};

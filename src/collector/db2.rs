//! DB2 LUW database counters, connections and tablespaces.
//!
//! - [`Db2Collector`]: `MON_GET_DATABASE`, connection states,
//!   `MON_GET_TABLESPACE`
//! - [`Tablespace`], [`ConnectionCounts`]: row mapping

mod charts;
mod collector;
mod parse;

pub use collector::{Db2Collector, Db2Config};
pub use parse::{ConnectionCounts, DATABASE_COUNTERS, Tablespace};

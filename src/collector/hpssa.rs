//! HPE Smart Array collector.
//!
//! - [`HpssaCollector`]: controller, array, logical and physical drive health
//! - [`parse_ssacli`]: parser for `ssacli ctrl all show config detail`

mod charts;
mod collector;
mod parse;

pub use collector::{HpssaCollector, HpssaConfig};
pub use parse::{Array, Controller, LogicalDrive, PhysicalDrive, SsaParseError, parse_ssacli};

//! Broadcom MegaRAID controllers via `storcli`.
//!
//! - [`StorcliCollector`]: controller, BBU and physical drive health
//! - [`parse_controllers`], [`parse_drives`]: JSON (`J`) output parsers

mod charts;
mod collector;
mod parse;

pub use collector::{StorcliCollector, StorcliConfig};
pub use parse::{Bbu, StorController, StorDrive, StorcliParseError, parse_controllers, parse_drives};

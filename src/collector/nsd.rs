//! NSD authoritative name server statistics.

mod collector;
mod parse;

pub use collector::{NsdCollector, NsdConfig};
pub use parse::{NsdParseError, parse_stats};

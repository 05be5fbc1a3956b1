//! MegaRAID controllers via MegaCLI.

mod collector;
mod parse;

pub use collector::{MegacliCollector, MegacliConfig};
pub use parse::{
    Adapter, Bbu, MegacliParseError, PhysicalDrive, VirtualDrive, parse_bbu_info, parse_ldpd_info,
};

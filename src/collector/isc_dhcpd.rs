//! ISC DHCP server lease collector.
//!
//! - [`IscDhcpdCollector`]: lease counts by binding state and per-pool utilization
//! - [`parse_leases`]: tolerant parser for `dhcpd.leases`

mod collector;
mod parse;

pub use collector::{IscDhcpdCollector, IscDhcpdConfig, PoolConfig};
pub use parse::{BindingState, Lease, LeaseEnd, LeaseParseError, parse_leases};

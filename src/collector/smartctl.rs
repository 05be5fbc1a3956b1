//! S.M.A.R.T. disk health via `smartctl`.
//!
//! - [`SmartctlCollector`]: scans devices and polls their health reports
//! - [`parse_scan`], [`select_devices`]: device discovery
//! - [`parse_device_info`]: `smartctl --json --all` reports

mod charts;
mod collector;
mod parse;

pub use collector::{
    DEFAULT_POLL_DEVICES_EVERY, DEFAULT_SCAN_EVERY, PowerMode, SmartctlCollector, SmartctlConfig,
};
pub use parse::{
    AtaAttribute, DeviceInfo, ExtraDevice, ScanDevice, SmartctlParseError, parse_device_info,
    parse_scan, select_devices,
};

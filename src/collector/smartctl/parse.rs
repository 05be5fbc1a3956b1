//! smartctl JSON output.
//!
//! Field presence varies between smartctl versions and device protocols, so
//! every field is optional and numbers are accepted either as JSON numbers or
//! as numeric strings.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::web::lenient_i64;

#[derive(Debug, Error)]
pub enum SmartctlParseError {
    #[error("invalid smartctl json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty smartctl output")]
    Empty,
}

/// A device requested explicitly in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraDevice {
    pub name: String,
    #[serde(rename = "type")]
    pub typ: String,
}

/// A device to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanDevice {
    pub name: String,
    pub info_name: String,
    pub typ: String,
    /// Added from the configuration rather than discovered.
    pub extra: bool,
}

impl ScanDevice {
    /// `name|type`; the same disk may be reachable through several types.
    pub fn key(&self) -> String {
        format!("{}|{}", self.name, self.typ)
    }

    /// Device name without the `/dev/` prefix.
    pub fn short_name(&self) -> &str {
        self.name.strip_prefix("/dev/").unwrap_or(&self.name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    devices: Vec<RawScanDevice>,
}

#[derive(Debug, Default, Deserialize)]
struct RawScanDevice {
    #[serde(default)]
    name: String,
    #[serde(default)]
    info_name: String,
    #[serde(default, rename = "type")]
    typ: String,
}

fn decode<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T, SmartctlParseError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(SmartctlParseError::Empty);
    }
    Ok(serde_json::from_slice(data)?)
}

/// Parse `smartctl --scan --json`. Entries without a name or type are dropped.
pub fn parse_scan(data: &[u8]) -> Result<Vec<ScanDevice>, SmartctlParseError> {
    let resp: ScanResponse = decode(data)?;
    Ok(resp
        .devices
        .into_iter()
        .filter(|d| {
            let valid = !d.name.is_empty() && !d.typ.is_empty();
            if !valid {
                tracing::debug!(name = %d.name, typ = %d.typ, "Skipping incomplete scan entry");
            }
            valid
        })
        .map(|d| ScanDevice {
            name: d.name,
            info_name: d.info_name,
            typ: d.typ,
            extra: false,
        })
        .collect())
}

/// Filter scanned devices, merge configured extras and drop duplicates.
///
/// - scanned devices must match `selector` (by name)
/// - extras already present under the same `name|type` are ignored
/// - a `scsi` entry is dropped when the same name is present as `sat`
pub fn select_devices(
    scanned: Vec<ScanDevice>,
    selector: &Regex,
    extra: &[ExtraDevice],
) -> BTreeMap<String, ScanDevice> {
    let mut devices = BTreeMap::new();
    for dev in scanned {
        if !selector.is_match(&dev.name) {
            tracing::debug!(device = %dev.name, "Device does not match selector");
            continue;
        }
        devices.entry(dev.key()).or_insert(dev);
    }

    for ex in extra {
        let dev = ScanDevice {
            name: ex.name.clone(),
            info_name: ex.name.clone(),
            typ: ex.typ.clone(),
            extra: true,
        };
        if devices.contains_key(&dev.key()) {
            tracing::debug!(device = %dev.key(), "Extra device already scanned");
            continue;
        }
        devices.insert(dev.key(), dev);
    }

    dedupe_sat(devices)
}

/// Drop `scsi` entries shadowed by a `sat` entry of the same name.
pub fn dedupe_sat(devices: BTreeMap<String, ScanDevice>) -> BTreeMap<String, ScanDevice> {
    let sat: Vec<String> = devices
        .values()
        .filter(|d| d.typ == "sat")
        .map(|d| d.name.clone())
        .collect();
    devices
        .into_iter()
        .filter(|(_, d)| !(d.typ == "scsi" && sat.contains(&d.name)))
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmartctlMeta {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub exit_status: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmartStatus {
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Temperature {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub current: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerOnTime {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub hours: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawValue {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub value: Option<i64>,
    pub string: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AtaAttribute {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub value: Option<i64>,
    #[serde(default)]
    pub raw: RawValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AtaAttributes {
    #[serde(default)]
    pub table: Vec<AtaAttribute>,
}

/// `smartctl --json --all <device>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub smartctl: SmartctlMeta,
    pub model_name: Option<String>,
    pub serial_number: Option<String>,
    pub smart_status: Option<SmartStatus>,
    pub temperature: Option<Temperature>,
    pub power_on_time: Option<PowerOnTime>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub power_cycle_count: Option<i64>,
    pub ata_smart_attributes: Option<AtaAttributes>,
}

/// Bits 0 and 1 of the exit status: command line error, device open failed
/// (including a device skipped because of its power mode).
const EXIT_NO_DATA: i64 = 0b011;

/// Bits 0 to 2 of the exit status: also an unsupported command or checksum error.
const EXIT_UNRELIABLE: i64 = 0b111;

impl DeviceInfo {
    pub fn exit_status(&self) -> i64 {
        self.smartctl.exit_status.unwrap_or(0)
    }

    /// The run produced no device data.
    pub fn has_no_data(&self) -> bool {
        self.exit_status() & EXIT_NO_DATA != 0
    }

    pub fn attributes(&self) -> &[AtaAttribute] {
        self.ata_smart_attributes
            .as_ref()
            .map(|a| a.table.as_slice())
            .unwrap_or_default()
    }

    /// A `scsi` device probed as `sat` answered with ATA attributes.
    pub fn looks_like_sat(&self) -> bool {
        self.exit_status() & EXIT_UNRELIABLE == 0 && !self.attributes().is_empty()
    }

    /// Power-on time in seconds.
    pub fn power_on_seconds(&self) -> Option<i64> {
        let pot = self.power_on_time.as_ref()?;
        let hours = pot.hours?;
        Some(hours * 3600 + pot.minutes.unwrap_or(0) * 60)
    }
}

pub fn parse_device_info(data: &[u8]) -> Result<DeviceInfo, SmartctlParseError> {
    decode(data)
}

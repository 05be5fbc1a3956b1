//! MegaCLI text output.
//!
//! `-LDPDInfo` lists adapters, their virtual drives, and the physical
//! drives of each virtual drive. `-AdpBbuCmd` lists one battery report per
//! adapter. Both are `Key : Value` lines grouped under header lines.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MegacliParseError {
    #[error("no adapters found in {attempted} lines")]
    NoAdapters { attempted: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adapter {
    pub number: String,
    pub virtual_drives: Vec<VirtualDrive>,
}

impl Adapter {
    /// Worst virtual drive state, lowercase with underscores.
    pub fn health_state(&self) -> &'static str {
        let mut worst = "optimal";
        for vd in &self.virtual_drives {
            let state = vd.normalized_state();
            if severity(state) > severity(worst) {
                worst = state;
            }
        }
        worst
    }

    pub fn physical_drives(&self) -> impl Iterator<Item = &PhysicalDrive> {
        self.virtual_drives.iter().flat_map(|vd| vd.physical_drives.iter())
    }
}

fn severity(state: &str) -> u8 {
    match state {
        "optimal" => 0,
        "partially_degraded" => 1,
        "degraded" => 2,
        _ => 3,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualDrive {
    pub id: String,
    pub adapter: String,
    pub raid_level: String,
    pub size: String,
    pub state: String,
    pub physical_drives: Vec<PhysicalDrive>,
}

impl VirtualDrive {
    pub fn key(&self) -> String {
        format!("{}/{}", self.adapter, self.id)
    }

    /// One of `optimal`, `partially_degraded`, `degraded`, `failed`.
    pub fn normalized_state(&self) -> &'static str {
        match self.state.to_lowercase().replace(' ', "_").as_str() {
            "optimal" => "optimal",
            "partially_degraded" => "partially_degraded",
            "degraded" => "degraded",
            _ => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysicalDrive {
    pub adapter: String,
    pub enclosure: String,
    pub slot: String,
    pub device_id: String,
    pub wwn: String,
    pub pd_type: String,
    pub firmware_state: String,
    pub media_error_count: Option<i64>,
    pub other_error_count: Option<i64>,
    pub predictive_failure_count: Option<i64>,
    pub temperature: Option<i64>,
}

impl PhysicalDrive {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.adapter, self.enclosure, self.slot)
    }
}

/// Battery report of one adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bbu {
    pub adapter: String,
    pub battery_type: String,
    pub state: String,
    pub temperature: Option<i64>,
    pub relative_charge: Option<i64>,
    pub cycle_count: Option<i64>,
    pub full_charge_capacity: Option<i64>,
    pub design_capacity: Option<i64>,
}

impl Bbu {
    /// Lost capacity relative to the design capacity, in percent.
    pub fn capacity_degradation(&self) -> Option<f64> {
        let full = self.full_charge_capacity? as f64;
        let design = self.design_capacity? as f64;
        if design <= 0.0 {
            return None;
        }
        Some((100.0 - full / design * 100.0).max(0.0))
    }
}

fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let (k, v) = line.split_once(':')?;
    Some((k.trim(), v.trim()))
}

/// Parse `megacli -LDPDInfo -aAll -NoLog`.
pub fn parse_ldpd_info(data: &[u8]) -> Result<Vec<Adapter>, MegacliParseError> {
    let text = String::from_utf8_lossy(data);
    let mut adapters: Vec<Adapter> = Vec::new();
    let mut in_pd = false;
    let mut attempted = 0;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        attempted += 1;

        if let Some(rest) = line.strip_prefix("Adapter #") {
            adapters.push(Adapter {
                number: rest.trim().to_string(),
                ..Default::default()
            });
            in_pd = false;
            continue;
        }
        let Some(adapter) = adapters.last_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix("Virtual Drive:") {
            let id = rest.split_whitespace().next().unwrap_or_default();
            adapter.virtual_drives.push(VirtualDrive {
                id: id.to_string(),
                adapter: adapter.number.clone(),
                ..Default::default()
            });
            in_pd = false;
            continue;
        }
        let number = adapter.number.clone();
        let Some(vd) = adapter.virtual_drives.last_mut() else {
            continue;
        };

        if line.starts_with("PD:") && line.ends_with("Information") {
            vd.physical_drives.push(PhysicalDrive {
                adapter: number,
                ..Default::default()
            });
            in_pd = true;
            continue;
        }
        let Some((key, value)) = key_value(line) else {
            continue;
        };

        if in_pd {
            let Some(pd) = vd.physical_drives.last_mut() else {
                continue;
            };
            match key {
                "Enclosure Device ID" => pd.enclosure = value.to_string(),
                "Slot Number" => pd.slot = value.to_string(),
                "Device Id" => pd.device_id = value.to_string(),
                "WWN" => pd.wwn = value.to_string(),
                "PD Type" => pd.pd_type = value.to_string(),
                "Firmware state" => pd.firmware_state = value.to_string(),
                "Media Error Count" => pd.media_error_count = leading_int(value),
                "Other Error Count" => pd.other_error_count = leading_int(value),
                "Predictive Failure Count" => pd.predictive_failure_count = leading_int(value),
                "Drive Temperature" => pd.temperature = leading_int(value),
                _ => {}
            }
        } else {
            match key {
                "RAID Level" => vd.raid_level = value.to_string(),
                "Size" => vd.size = value.to_string(),
                "State" => vd.state = value.to_string(),
                _ => {}
            }
        }
    }

    for adapter in &mut adapters {
        for vd in &mut adapter.virtual_drives {
            vd.physical_drives
                .retain(|pd| !pd.slot.is_empty() || !pd.enclosure.is_empty());
        }
    }

    if adapters.is_empty() && attempted > 0 {
        return Err(MegacliParseError::NoAdapters { attempted });
    }
    Ok(adapters)
}

/// Parse `megacli -AdpBbuCmd -aAll -NoLog`. Adapters without a battery are
/// absent from the result.
pub fn parse_bbu_info(data: &[u8]) -> Vec<Bbu> {
    let text = String::from_utf8_lossy(data);
    let mut bbus: Vec<Bbu> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix("BBU status for Adapter:") {
            bbus.push(Bbu {
                adapter: rest.trim().to_string(),
                ..Default::default()
            });
            continue;
        }
        if line.ends_with("Get BBU Status Failed.") {
            continue;
        }
        let (Some(bbu), Some((key, value))) = (bbus.last_mut(), key_value(line)) else {
            continue;
        };
        match key {
            "BatteryType" => bbu.battery_type = value.to_string(),
            "Battery State" => bbu.state = value.to_string(),
            "Temperature" => bbu.temperature = leading_int(value),
            "Relative State of Charge" => bbu.relative_charge = leading_int(value),
            "Cycle Count" => bbu.cycle_count = leading_int(value),
            "Full Charge Capacity" => bbu.full_charge_capacity = leading_int(value),
            "Design Capacity" => bbu.design_capacity = leading_int(value),
            _ => {}
        }
    }

    bbus.retain(|b| !b.battery_type.is_empty() || b.temperature.is_some());
    bbus
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub(crate) const LDPD_INFO: &str = "

Adapter #0

Number of Virtual Disks: 2
Virtual Drive: 0 (Target Id: 0)
Name                :
RAID Level          : Primary-1, Secondary-0, RAID Level Qualifier-0
Size                : 557.861 GB
State               : Optimal
Number Of Drives    : 1
PD: 0 Information
Enclosure Device ID: 32
Slot Number: 0
Drive's position: DiskGroup: 0, Span: 0, Arm: 0
Device Id: 0
WWN: 5000C500C3ACB3C4
Media Error Count: 0
Other Error Count: 0
Predictive Failure Count: 0
PD Type: SAS
Firmware state: Online, Spun Up
Drive Temperature :31C (87.80 F)

Virtual Drive: 1 (Target Id: 1)
RAID Level          : Primary-5, Secondary-0, RAID Level Qualifier-3
Size                : 1.089 TB
State               : Degraded
PD: 0 Information
Enclosure Device ID: 32
Slot Number: 2
Device Id: 2
Media Error Count: 12
Other Error Count: 1
Predictive Failure Count: 3
PD Type: SATA
Firmware state: Failed

Exit Code: 0x00
";

    pub(crate) const BBU_INFO: &str = "
BBU status for Adapter: 0

BatteryType: iBBU
Voltage: 4063 mV
Current: 0 mA
Temperature: 27 C
Battery State: Optimal
BBU Firmware Status:
  Charging Status              : None
  Relative State of Charge: 100 %
  Charger Status: Complete
  Remaining Capacity: 1451 mAh
  Full Charge Capacity: 1440 mAh
  Cycle Count: 30
  Design Capacity: 1800 mAh

Adapter 1: Get BBU Status Failed.

Exit Code: 0x00
";
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_parse_ldpd_info() {
        let adapters = parse_ldpd_info(LDPD_INFO.as_bytes()).unwrap();
        assert_eq!(adapters.len(), 1);
        let a = &adapters[0];
        assert_eq!(a.number, "0");
        assert_eq!(a.virtual_drives.len(), 2);
        assert_eq!(a.health_state(), "degraded");

        let vd0 = &a.virtual_drives[0];
        assert_eq!(vd0.key(), "0/0");
        assert_eq!(vd0.state, "Optimal");
        assert_eq!(vd0.size, "557.861 GB");

        let pds: Vec<&PhysicalDrive> = a.physical_drives().collect();
        assert_eq!(pds.len(), 2);
        assert_eq!(pds[0].key(), "0/32/0");
        assert_eq!(pds[0].wwn, "5000C500C3ACB3C4");
        assert_eq!(pds[0].temperature, Some(31));
        assert_eq!(pds[0].firmware_state, "Online, Spun Up");
        assert_eq!(pds[1].media_error_count, Some(12));
        assert_eq!(pds[1].predictive_failure_count, Some(3));
        assert_eq!(pds[1].temperature, None);
    }

    #[test]
    fn test_health_state_ordering() {
        let vd = |state: &str| VirtualDrive {
            state: state.into(),
            ..Default::default()
        };
        let mut a = Adapter::default();
        assert_eq!(a.health_state(), "optimal");
        a.virtual_drives = vec![vd("Optimal"), vd("Partially Degraded")];
        assert_eq!(a.health_state(), "partially_degraded");
        a.virtual_drives.push(vd("Offline"));
        assert_eq!(a.health_state(), "failed");
    }

    #[test]
    fn test_parse_ldpd_without_adapters() {
        assert!(parse_ldpd_info(b"").unwrap().is_empty());
        assert!(matches!(
            parse_ldpd_info(b"Failed to initialize RM\n"),
            Err(MegacliParseError::NoAdapters { attempted: 1 })
        ));
        let adapters = parse_ldpd_info(b"Adapter #0\nAdapter 0: No Virtual Drive Configured.\n").unwrap();
        assert!(adapters[0].virtual_drives.is_empty());
    }

    #[test]
    fn test_parse_bbu_info() {
        let bbus = parse_bbu_info(BBU_INFO.as_bytes());
        assert_eq!(bbus.len(), 1);
        let b = &bbus[0];
        assert_eq!(b.adapter, "0");
        assert_eq!(b.battery_type, "iBBU");
        assert_eq!(b.temperature, Some(27));
        assert_eq!(b.relative_charge, Some(100));
        assert_eq!(b.cycle_count, Some(30));
        let degradation = b.capacity_degradation().unwrap();
        assert!((degradation - 20.0).abs() < 1e-9);

        assert!(parse_bbu_info(b"Adapter 0: Get BBU Status Failed.\n").is_empty());
    }
}

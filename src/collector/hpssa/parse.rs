//! Parser for `ssacli ctrl all show config detail`.
//!
//! The output is an indented outline:
//!
//! ```text
//! Smart Array E208i-p SR Gen10 in Slot 0
//!    Controller Status: OK
//!    Array: A
//!       Status: OK
//!       Logical Drive: 1
//!          Status: OK
//!          physicaldrive 1I:1:1
//!             Status: OK
//!    Unassigned
//!       physicaldrive 1I:1:2
//!          Status: OK
//! ```
//!
//! Indentation is not reliable across firmware versions, so section headers
//! drive a state machine and every other `Key: Value` line is a property of
//! the innermost open section.

use thiserror::Error;

/// Sentinel used in keys for absent ancestors.
pub const NA: &str = "na";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SsaParseError {
    #[error("malformed controller line '{0}'")]
    Controller(String),

    #[error("malformed physical drive line '{0}'")]
    PhysicalDrive(String),

    #[error("'{0}' appears before any controller")]
    Orphan(String),

    #[error("no valid controller among {attempted} controller sections")]
    NoValidControllers { attempted: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Controller {
    pub model: String,
    pub slot: String,
    pub serial_number: String,
    pub controller_status: String,
    pub cache_board_present: String,
    pub cache_status: String,
    pub cache_ratio: String,
    pub controller_temperature_c: String,
    pub cache_module_temperature_c: String,
    pub number_of_ports: String,
    pub driver_name: String,
    pub battery_capacitor_count: String,
    pub battery_capacitor_status: String,
    pub arrays: Vec<Array>,
    pub unassigned_drives: Vec<PhysicalDrive>,
}

impl Controller {
    pub fn key(&self) -> String {
        format!("{}/{}", self.model, self.slot)
    }

    /// Every physical drive of the controller, assigned or not.
    pub fn physical_drives(&self) -> impl Iterator<Item = &PhysicalDrive> {
        self.arrays
            .iter()
            .flat_map(|a| a.logical_drives.iter())
            .flat_map(|ld| ld.physical_drives.iter())
            .chain(self.unassigned_drives.iter())
    }

    fn apply(&mut self, key: &str, value: &str) {
        let field = match key {
            "Serial Number" => &mut self.serial_number,
            "Controller Status" => &mut self.controller_status,
            "Cache Board Present" => &mut self.cache_board_present,
            "Cache Status" => &mut self.cache_status,
            "Cache Ratio" => &mut self.cache_ratio,
            "Controller Temperature (C)" => &mut self.controller_temperature_c,
            "Cache Module Temperature (C)" => &mut self.cache_module_temperature_c,
            "Number of Ports" => &mut self.number_of_ports,
            "Driver Name" => &mut self.driver_name,
            "Battery/Capacitor Count" => &mut self.battery_capacitor_count,
            "Battery/Capacitor Status" => &mut self.battery_capacitor_status,
            _ => return,
        };
        *field = value.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Array {
    pub id: String,
    pub controller_key: String,
    pub interface_type: String,
    pub unused_space: String,
    pub used_space: String,
    pub status: String,
    pub array_type: String,
    pub logical_drives: Vec<LogicalDrive>,
}

impl Array {
    pub fn key(&self) -> String {
        format!("{}/{}", self.controller_key, self.id)
    }

    fn apply(&mut self, key: &str, value: &str) {
        let field = match key {
            "Interface Type" => &mut self.interface_type,
            "Unused Space" => &mut self.unused_space,
            "Used Space" => &mut self.used_space,
            "Status" => &mut self.status,
            "Array Type" => &mut self.array_type,
            _ => return,
        };
        *field = value.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalDrive {
    pub id: String,
    pub controller_key: String,
    pub array_id: String,
    pub size: String,
    pub status: String,
    pub disk_name: String,
    pub unique_identifier: String,
    pub label: String,
    pub drive_type: String,
    pub physical_drives: Vec<PhysicalDrive>,
}

impl LogicalDrive {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.controller_key, self.array_id, self.id)
    }

    fn apply(&mut self, key: &str, value: &str) {
        let field = match key {
            "Size" => &mut self.size,
            "Status" => &mut self.status,
            "Disk Name" => &mut self.disk_name,
            "Unique Identifier" => &mut self.unique_identifier,
            "Logical Drive Label" => &mut self.label,
            "Drive Type" => &mut self.drive_type,
            _ => return,
        };
        *field = value.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysicalDrive {
    pub location: String,
    pub controller_key: String,
    pub array_id: Option<String>,
    pub ld_id: Option<String>,
    pub status: String,
    pub drive_type: String,
    pub interface_type: String,
    pub size: String,
    pub serial_number: String,
    pub wwid: String,
    pub model: String,
    pub current_temperature_c: String,
}

impl PhysicalDrive {
    pub fn array_id(&self) -> &str {
        self.array_id.as_deref().unwrap_or(NA)
    }

    pub fn ld_id(&self) -> &str {
        self.ld_id.as_deref().unwrap_or(NA)
    }

    /// `model/slot/array/ld/location`, with `na` for absent ancestors.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.controller_key,
            self.array_id(),
            self.ld_id(),
            self.location
        )
    }

    fn apply(&mut self, key: &str, value: &str) {
        let field = match key {
            "Status" => &mut self.status,
            "Drive Type" => &mut self.drive_type,
            "Interface Type" => &mut self.interface_type,
            "Size" => &mut self.size,
            "Serial Number" => &mut self.serial_number,
            "WWID" => &mut self.wwid,
            "Model" => &mut self.model,
            "Current Temperature (C)" => &mut self.current_temperature_c,
            _ => return,
        };
        *field = value.to_string();
    }
}

/// Where property lines currently go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Controller,
    Array,
    LogicalDrive,
    Unassigned,
    AssignedDrive,
    UnassignedDrive,
    /// Enclosures, expanders, mirror groups and the like.
    Ignored,
    /// Properties of a controller whose header could not be parsed.
    Skipped,
}

const IGNORED_SECTIONS: &[&str] = &[
    "SEP (",
    "Expander ",
    "Enclosure ",
    "Mirror Group ",
    "Internal Drive Cage",
];

/// Parse the full `show config detail` output.
///
/// # Errors
/// Fails if a section appears before any controller, or if controller
/// headers were found but none could be parsed.
pub fn parse_ssacli(input: &[u8]) -> Result<Vec<Controller>, SsaParseError> {
    let text = String::from_utf8_lossy(input);
    let mut controllers: Vec<Controller> = Vec::new();
    let mut attempted = 0;
    let mut section = Section::None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if is_controller_line(raw) {
            attempted += 1;
            match parse_controller_line(line) {
                Ok(cntrl) => {
                    controllers.push(cntrl);
                    section = Section::Controller;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping controller section");
                    section = Section::Skipped;
                }
            }
            continue;
        }
        if section == Section::Skipped {
            continue;
        }

        if let Some(id) = line.strip_prefix("Array:") {
            let cntrl = controllers
                .last_mut()
                .ok_or_else(|| SsaParseError::Orphan(line.to_string()))?;
            cntrl.arrays.push(Array {
                id: id.trim().to_string(),
                controller_key: cntrl.key(),
                ..Default::default()
            });
            section = Section::Array;
            continue;
        }

        if let Some(id) = line.strip_prefix("Logical Drive:") {
            let cntrl = controllers
                .last_mut()
                .ok_or_else(|| SsaParseError::Orphan(line.to_string()))?;
            let controller_key = cntrl.key();
            let arr = cntrl
                .arrays
                .last_mut()
                .ok_or_else(|| SsaParseError::Orphan(line.to_string()))?;
            arr.logical_drives.push(LogicalDrive {
                id: id.trim().to_string(),
                controller_key,
                array_id: arr.id.clone(),
                ..Default::default()
            });
            section = Section::LogicalDrive;
            continue;
        }

        if line == "Unassigned" {
            if controllers.is_empty() {
                return Err(SsaParseError::Orphan(line.to_string()));
            }
            section = Section::Unassigned;
            continue;
        }

        if line.starts_with("physicaldrive") && line.split_whitespace().count() == 2 {
            let mut pd = parse_physical_drive_line(line)?;
            let cntrl = controllers
                .last_mut()
                .ok_or_else(|| SsaParseError::Orphan(line.to_string()))?;
            pd.controller_key = cntrl.key();

            let assigned = !matches!(section, Section::Unassigned | Section::UnassignedDrive);
            let ld = cntrl
                .arrays
                .last_mut()
                .and_then(|a| a.logical_drives.last_mut());
            match ld {
                Some(ld) if assigned => {
                    pd.array_id = Some(ld.array_id.clone());
                    pd.ld_id = Some(ld.id.clone());
                    ld.physical_drives.push(pd);
                    section = Section::AssignedDrive;
                }
                _ => {
                    cntrl.unassigned_drives.push(pd);
                    section = Section::UnassignedDrive;
                }
            }
            continue;
        }

        if IGNORED_SECTIONS.iter().any(|p| line.starts_with(p)) {
            section = Section::Ignored;
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        let Some(cntrl) = controllers.last_mut() else {
            continue;
        };
        match section {
            Section::Controller => cntrl.apply(key, value),
            Section::Array => {
                if let Some(arr) = cntrl.arrays.last_mut() {
                    arr.apply(key, value);
                }
            }
            Section::LogicalDrive => {
                if let Some(ld) = cntrl
                    .arrays
                    .last_mut()
                    .and_then(|a| a.logical_drives.last_mut())
                {
                    ld.apply(key, value);
                }
            }
            Section::AssignedDrive => {
                if let Some(pd) = cntrl
                    .arrays
                    .last_mut()
                    .and_then(|a| a.logical_drives.last_mut())
                    .and_then(|ld| ld.physical_drives.last_mut())
                {
                    pd.apply(key, value);
                }
            }
            Section::UnassignedDrive => {
                if let Some(pd) = cntrl.unassigned_drives.last_mut() {
                    pd.apply(key, value);
                }
            }
            Section::None | Section::Unassigned | Section::Ignored | Section::Skipped => {}
        }
    }

    if controllers.is_empty() && attempted > 0 {
        return Err(SsaParseError::NoValidControllers { attempted });
    }
    Ok(controllers)
}

/// Controller headers start at column zero and mention the product line.
fn is_controller_line(raw: &str) -> bool {
    !raw.starts_with(char::is_whitespace) && raw.contains("Smart Array")
}

/// `HPE Smart Array E208i-p SR Gen10 in Slot 0` → model `E208i-p`, slot `0`.
fn parse_controller_line(line: &str) -> Result<Controller, SsaParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let model = parts
        .iter()
        .position(|p| *p == "Array")
        .and_then(|i| parts.get(i + 1));
    let slot = parts
        .iter()
        .position(|p| *p == "Slot")
        .and_then(|i| parts.get(i + 1));

    match (model, slot) {
        (Some(model), Some(slot)) => Ok(Controller {
            model: model.to_string(),
            slot: slot.to_string(),
            ..Default::default()
        }),
        _ => Err(SsaParseError::Controller(line.to_string())),
    }
}

fn parse_physical_drive_line(line: &str) -> Result<PhysicalDrive, SsaParseError> {
    match line.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["physicaldrive", location] => Ok(PhysicalDrive {
            location: location.to_string(),
            ..Default::default()
        }),
        _ => Err(SsaParseError::PhysicalDrive(line.to_string())),
    }
}

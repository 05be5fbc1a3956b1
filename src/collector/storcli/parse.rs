//! `storcli ... show all J` output.
//!
//! Controller objects mix fixed sections with keys that embed the drive
//! path (`Drive /c0/e252/s0`), so the response data is walked as untyped
//! JSON. Values are strings or numbers depending on the firmware.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorcliParseError {
    #[error("invalid storcli json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no controller reported success ({attempted} attempted)")]
    NoValidControllers { attempted: usize },
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(rename = "Controllers", default)]
    controllers: Vec<ControllerEnvelope>,
}

#[derive(Debug, Deserialize)]
struct ControllerEnvelope {
    #[serde(rename = "Command Status", default)]
    command_status: CommandStatus,
    #[serde(rename = "Response Data", default)]
    response_data: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct CommandStatus {
    #[serde(rename = "Controller", default)]
    controller: Value,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Description", default)]
    description: String,
}

/// Battery or CacheVault module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bbu {
    pub model: String,
    pub state: String,
    pub temperature: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorController {
    pub number: String,
    pub model: String,
    pub serial_number: String,
    pub driver_name: String,
    pub controller_status: String,
    /// `BBU Status`; `None` when reported as `NA` or absent.
    pub bbu_status: Option<i64>,
    pub roc_temperature: Option<i64>,
    pub memory_correctable_errors: Option<i64>,
    pub memory_uncorrectable_errors: Option<i64>,
    pub bbus: Vec<Bbu>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorDrive {
    pub controller: String,
    pub enclosure: String,
    pub slot: String,
    pub state: String,
    pub interface: String,
    pub medium: String,
    pub model: String,
    pub media_error_count: Option<i64>,
    pub other_error_count: Option<i64>,
    pub predictive_failure_count: Option<i64>,
    pub temperature: Option<i64>,
    pub smart_alert_flagged: Option<bool>,
}

impl StorDrive {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.controller, self.enclosure, self.slot)
    }
}

fn text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Leading integer of a number or of a string such as `"28C (82.40 F)"`.
fn leading_int(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            let end = s
                .char_indices()
                .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
                .map_or(s.len(), |(i, _)| i);
            s[..end].parse().ok()
        }
        _ => None,
    }
}

type ControllerData = (String, BTreeMap<String, Value>);

/// Response data of the controllers whose command succeeded.
fn successful(data: &[u8]) -> Result<Vec<ControllerData>, StorcliParseError> {
    let resp: Response = serde_json::from_slice(data)?;
    let attempted = resp.controllers.len();
    let ok = resp
        .controllers
        .into_iter()
        .filter_map(|c| {
            let number = text(Some(&c.command_status.controller));
            if c.command_status.status.eq_ignore_ascii_case("success") {
                Some((number, c.response_data))
            } else {
                tracing::debug!(
                    controller = %number,
                    status = %c.command_status.status,
                    description = %c.command_status.description,
                    "Skipping controller"
                );
                None
            }
        })
        .collect::<Vec<_>>();
    if attempted > 0 && ok.is_empty() {
        return Err(StorcliParseError::NoValidControllers { attempted });
    }
    Ok(ok)
}

type Object = serde_json::Map<String, Value>;

fn section<'a>(data: &'a BTreeMap<String, Value>, name: &str) -> Option<&'a Object> {
    data.get(name).and_then(Value::as_object)
}

fn field<'a>(obj: Option<&'a Object>, key: &str) -> Option<&'a Value> {
    obj.and_then(|m| m.get(key))
}

fn parse_bbus(data: &BTreeMap<String, Value>) -> Vec<Bbu> {
    ["BBU_Info", "Cachevault_Info"]
        .iter()
        .filter_map(|k| data.get(*k).and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_object)
        .map(|b| Bbu {
            model: text(b.get("Model")),
            state: text(b.get("State")),
            temperature: leading_int(b.get("Temp")),
        })
        .collect()
}

/// Parse `storcli /cALL show all J`.
pub fn parse_controllers(data: &[u8]) -> Result<Vec<StorController>, StorcliParseError> {
    Ok(successful(data)?
        .into_iter()
        .map(|(number, data)| {
            let basics = section(&data, "Basics");
            let version = section(&data, "Version");
            let status = section(&data, "Status");
            let hw = section(&data, "HwCfg");
            StorController {
                number: match text(field(basics, "Controller")) {
                    n if n.is_empty() => number,
                    n => n,
                },
                model: text(field(basics, "Model")),
                serial_number: text(field(basics, "Serial Number")),
                driver_name: text(field(version, "Driver Name")),
                controller_status: text(field(status, "Controller Status")),
                bbu_status: leading_int(field(status, "BBU Status")),
                roc_temperature: leading_int(field(hw, "ROC temperature(Degree Celsius)")),
                memory_correctable_errors: leading_int(field(status, "Memory Correctable Errors")),
                memory_uncorrectable_errors: leading_int(field(
                    status,
                    "Memory Uncorrectable Errors",
                )),
                bbus: parse_bbus(&data),
            }
        })
        .collect())
}

/// `Drive /c0/e252/s3` → (`0`, `252`, `3`). Enclosure-less drives use `na`.
fn drive_path(key: &str) -> Option<(String, String, String)> {
    let path = key.strip_prefix("Drive /")?;
    if path.contains(' ') {
        return None;
    }
    let (mut c, mut e, mut s) = (None, None, None);
    for part in path.split('/') {
        if let Some(v) = part.strip_prefix('c') {
            c = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix('e') {
            e = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix('s') {
            s = Some(v.to_string());
        }
    }
    Some((c?, e.unwrap_or_else(|| "na".into()), s?))
}

/// Parse `storcli /cALL/eALL/sALL show all J`.
pub fn parse_drives(data: &[u8]) -> Result<Vec<StorDrive>, StorcliParseError> {
    let ok = successful(data)?;
    let mut drives = Vec::new();
    for (_, data) in ok {
        for (key, value) in &data {
            let Some((controller, enclosure, slot)) = drive_path(key) else {
                continue;
            };
            let summary = value
                .as_array()
                .and_then(|a| a.first())
                .and_then(Value::as_object);
            let detail = data
                .get(&format!("{key} - Detailed Information"))
                .and_then(Value::as_object);
            let state = detail
                .and_then(|d| d.get(&format!("{key} State")))
                .and_then(Value::as_object);
            let attrs = detail
                .and_then(|d| d.get(&format!("{key} Device attributes")))
                .and_then(Value::as_object);
            let s = |k: &str| field(summary, k);
            let st = |k: &str| field(state, k);

            drives.push(StorDrive {
                controller,
                enclosure,
                slot,
                state: text(s("State")),
                interface: text(s("Intf")),
                medium: text(s("Med")),
                model: match text(s("Model")) {
                    m if m.is_empty() => text(field(attrs, "Model Number")),
                    m => m,
                },
                media_error_count: leading_int(st("Media Error Count")),
                other_error_count: leading_int(st("Other Error Count")),
                predictive_failure_count: leading_int(st("Predictive Failure Count")),
                temperature: leading_int(st("Drive Temperature")),
                smart_alert_flagged: st("S.M.A.R.T alert flagged by drive")
                    .map(|v| text(Some(v)).eq_ignore_ascii_case("yes")),
            });
        }
    }
    Ok(drives)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_parse_controllers() {
        let cntrls = parse_controllers(CONTROLLERS.as_bytes()).unwrap();
        assert_eq!(cntrls.len(), 1);
        let c = &cntrls[0];
        assert_eq!(c.number, "0");
        assert_eq!(c.model, "AVAGO MegaRAID SAS 9361-8i");
        assert_eq!(c.controller_status, "Optimal");
        assert_eq!(c.bbu_status, Some(0));
        assert_eq!(c.roc_temperature, Some(48));
        assert_eq!(c.bbus[0].temperature, Some(26));
        assert_eq!(c.bbus[0].model, "CVPM02");
    }

    #[test]
    fn test_parse_drives() {
        let drives = parse_drives(DRIVES.as_bytes()).unwrap();
        assert_eq!(drives.len(), 2);

        let d0 = &drives[0];
        assert_eq!(d0.key(), "0/252/0");
        assert_eq!(d0.state, "Onln");
        assert_eq!(d0.other_error_count, Some(2));
        assert_eq!(d0.temperature, Some(28));
        assert_eq!(d0.smart_alert_flagged, Some(false));

        let d1 = &drives[1];
        assert_eq!(d1.media_error_count, Some(17));
        assert_eq!(d1.temperature, None);
        assert_eq!(d1.smart_alert_flagged, Some(true));
    }

    #[test]
    fn test_drive_path() {
        assert_eq!(
            drive_path("Drive /c0/e252/s3"),
            Some(("0".into(), "252".into(), "3".into()))
        );
        assert_eq!(drive_path("Drive /c1/s2"), Some(("1".into(), "na".into(), "2".into())));
        assert_eq!(drive_path("Drive /c0/e252/s3 - Detailed Information"), None);
        assert_eq!(drive_path("Basics"), None);
    }

    #[test]
    fn test_leading_int() {
        assert_eq!(leading_int(Some(&Value::from(" 41C (105.80 F)"))), Some(41));
        assert_eq!(leading_int(Some(&Value::from("-5"))), Some(-5));
        assert_eq!(leading_int(Some(&Value::from("NA"))), None);
        assert_eq!(leading_int(Some(&Value::from(12.7))), Some(12));
        assert_eq!(leading_int(None), None);
    }

    #[test]
    fn test_all_controllers_failed() {
        let out = br#"{"Controllers": [{"Command Status": {"Controller": 0, "Status": "Failure"}}]}"#;
        assert!(matches!(
            parse_controllers(out),
            Err(StorcliParseError::NoValidControllers { attempted: 1 })
        ));
        assert!(parse_drives(br#"{"Controllers": []}"#).unwrap().is_empty());
        assert!(matches!(parse_drives(b"no json"), Err(StorcliParseError::Json(_))));
    }
}

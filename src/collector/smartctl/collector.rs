//! S.M.A.R.T. collector backed by `smartctl`.
//!
//! Devices are discovered with `smartctl --scan` and polled individually.
//! Scanning and polling run on their own, slower, cadence; cycles in
//! between report the last polled values.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::charts::{Charts, PrefixTracker, Samples};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::exec::{CommandProbe, ExecError, Executor};

use super::charts::{attribute_charts, attribute_prefix, device_charts, device_prefix};
use super::parse::{
    DeviceInfo, ExtraDevice, ScanDevice, dedupe_sat, parse_device_info, parse_scan, select_devices,
};

const SMARTCTL: &str = "smartctl";

/// Default time between device scans (15 minutes).
pub const DEFAULT_SCAN_EVERY: Duration = Duration::from_secs(15 * 60);

/// Default time between device polls (5 minutes).
pub const DEFAULT_POLL_DEVICES_EVERY: Duration = Duration::from_secs(5 * 60);

/// When smartctl may skip a device to avoid spinning it up.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PowerMode {
    /// Same as `standby`.
    #[default]
    Auto,
    /// Always query; also scans with `--scan-open`.
    Never,
    Sleep,
    Standby,
    Idle,
}

impl PowerMode {
    /// Value passed to `--nocheck`.
    pub fn nocheck_arg(self) -> &'static str {
        match self {
            Self::Auto | Self::Standby => "standby",
            Self::Never => "never",
            Self::Sleep => "sleep",
            Self::Idle => "idle",
        }
    }
}

fn default_scan_every() -> Duration {
    DEFAULT_SCAN_EVERY
}

fn default_poll_devices_every() -> Duration {
    DEFAULT_POLL_DEVICES_EVERY
}

/// Configuration for the smartctl collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartctlConfig {
    #[serde(flatten)]
    pub job: JobOptions,
    #[serde(default = "default_scan_every", with = "humantime_serde")]
    pub scan_every: Duration,
    #[serde(default = "default_poll_devices_every", with = "humantime_serde")]
    pub poll_devices_every: Duration,
    #[serde(default)]
    pub no_check_power_mode: PowerMode,
    /// Regex matched against scanned device names. Empty matches all.
    #[serde(default)]
    pub device_selector: String,
    #[serde(default)]
    pub extra_devices: Vec<ExtraDevice>,
}

impl SmartctlConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
            scan_every: DEFAULT_SCAN_EVERY,
            poll_devices_every: DEFAULT_POLL_DEVICES_EVERY,
            no_check_power_mode: PowerMode::default(),
            device_selector: String::new(),
            extra_devices: Vec::new(),
        }
    }

    pub fn with_power_mode(mut self, mode: PowerMode) -> Self {
        self.no_check_power_mode = mode;
        self
    }

    pub fn with_device_selector(mut self, selector: impl Into<String>) -> Self {
        self.device_selector = selector.into();
        self
    }

    pub fn with_extra_device(mut self, name: impl Into<String>, typ: impl Into<String>) -> Self {
        self.extra_devices.push(ExtraDevice {
            name: name.into(),
            typ: typ.into(),
        });
        self
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()?;
        if self.scan_every.is_zero() || self.poll_devices_every.is_zero() {
            return Err(CollectorError::Config(
                "scan_every and poll_devices_every must be positive".into(),
            ));
        }
        if let Some(ex) = self
            .extra_devices
            .iter()
            .find(|d| d.name.trim().is_empty() || d.typ.trim().is_empty())
        {
            return Err(CollectorError::Config(format!(
                "extra device needs both name and type (got '{}' / '{}')",
                ex.name, ex.typ
            )));
        }
        Ok(())
    }

    /// Compiled device selector.
    pub fn selector(&self) -> Result<Regex, CollectorError> {
        let pattern = match self.device_selector.trim() {
            "" => ".*",
            p => p,
        };
        Regex::new(pattern)
            .map_err(|e| CollectorError::Config(format!("invalid device_selector: {e}")))
    }
}

job_builders!(SmartctlConfig);

/// S.M.A.R.T. collector.
pub struct SmartctlCollector {
    config: SmartctlConfig,
    charts: Charts,
    probe: Option<Arc<dyn CommandProbe>>,
    selector: Option<Regex>,
    devices: BTreeMap<String, ScanDevice>,
    seen: PrefixTracker,
    polled: HashMap<String, Samples>,
    last_scan: Option<Instant>,
    last_poll: Option<Instant>,
}

impl SmartctlCollector {
    pub fn new(config: SmartctlConfig) -> Self {
        Self {
            config,
            charts: Charts::new(),
            probe: None,
            selector: None,
            devices: BTreeMap::new(),
            seen: PrefixTracker::new(),
            polled: HashMap::new(),
            last_scan: None,
            last_poll: None,
        }
    }

    /// Use `probe` instead of locating `smartctl`.
    pub fn with_probe(mut self, probe: Arc<dyn CommandProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Devices currently polled, keyed by `name|type`.
    pub fn devices(&self) -> &BTreeMap<String, ScanDevice> {
        &self.devices
    }

    async fn device_info(
        &self,
        probe: &dyn CommandProbe,
        dev: &ScanDevice,
        typ: &str,
    ) -> Result<DeviceInfo, CollectorError> {
        let nocheck = self.config.no_check_power_mode.nocheck_arg();
        let args = [
            "--json",
            "--all",
            dev.name.as_str(),
            "--device",
            typ,
            "--nocheck",
            nocheck,
        ];
        let output = match probe.run_args(&args).await {
            Ok(out) => out,
            // Non-zero status is a bit mask; the JSON report is still printed.
            Err(ExecError::Failed { stdout, .. }) if !stdout.is_empty() => stdout,
            Err(e) => return Err(e.into()),
        };
        parse_device_info(&output).map_err(|e| CollectorError::Parse(e.to_string()))
    }

    async fn scan(&mut self, probe: &dyn CommandProbe) -> Result<(), CollectorError> {
        let scan_arg = if self.config.no_check_power_mode == PowerMode::Never {
            "--scan-open"
        } else {
            "--scan"
        };
        let output = probe.run_args(&["--json", scan_arg]).await?;
        let scanned = parse_scan(&output).map_err(|e| CollectorError::Parse(e.to_string()))?;

        let selector = match &self.selector {
            Some(re) => re.clone(),
            None => self.config.selector()?,
        };
        let selected = select_devices(scanned, &selector, &self.config.extra_devices);

        let mut devices = BTreeMap::new();
        for (key, mut dev) in selected {
            if dev.typ == "scsi" && !dev.extra {
                match self.device_info(probe, &dev, "sat").await {
                    Ok(info) if info.looks_like_sat() => {
                        tracing::debug!(device = %dev.name, "changing device type scsi -> sat");
                        dev.typ = "sat".into();
                        devices.insert(dev.key(), dev);
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(device = %dev.name, error = %e, "sat probe failed")
                    }
                }
            }
            devices.insert(key, dev);
        }
        let devices = dedupe_sat(devices);

        if devices.is_empty() {
            return Err(CollectorError::ProbeFailed {
                code: None,
                message: "no devices found during scan".into(),
            });
        }

        let current = devices
            .iter()
            .map(|(key, dev)| (key.clone(), device_prefix(dev)))
            .collect();
        for key in self.seen.sync(&mut self.charts, current) {
            if let Some(dev) = devices.get(&key) {
                self.charts.add_all(device_charts(dev))?;
            }
        }
        self.polled.retain(|key, _| devices.contains_key(key));

        tracing::debug!(job = %self.config.job.name, devices = devices.len(), "Scan complete");
        self.devices = devices;
        Ok(())
    }

    async fn poll(&mut self, probe: &dyn CommandProbe) -> Result<(), CollectorError> {
        let devices: Vec<ScanDevice> = self.devices.values().cloned().collect();
        for dev in devices {
            let key = dev.key();
            let info = match self.device_info(probe, &dev, &dev.typ).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::debug!(device = %key, error = %e, "Device poll failed");
                    self.polled.remove(&key);
                    continue;
                }
            };
            if info.has_no_data() {
                tracing::debug!(device = %key, exit_status = info.exit_status(), "Device skipped");
                self.polled.remove(&key);
                continue;
            }

            for attr in info.attributes() {
                if attr.name.is_empty() {
                    continue;
                }
                let chart_id = format!("{}normalized", attribute_prefix(&dev, attr));
                if !self.charts.contains(&chart_id) {
                    self.charts.add_all(attribute_charts(&dev, attr))?;
                }
            }
            self.polled.insert(key, device_samples(&dev, &info));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SmartctlCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartctlCollector")
            .field("config", &self.config)
            .field("devices", &self.devices.len())
            .field("charts", &self.charts.len())
            .finish_non_exhaustive()
    }
}

fn device_samples(dev: &ScanDevice, info: &DeviceInfo) -> Samples {
    let p = device_prefix(dev);
    let mut samples = Samples::new();

    if let Some(passed) = info.smart_status.as_ref().and_then(|s| s.passed) {
        samples.insert(format!("{p}smart_status_passed"), i64::from(passed));
        samples.insert(format!("{p}smart_status_failed"), i64::from(!passed));
    }
    if let Some(t) = info.temperature.as_ref().and_then(|t| t.current) {
        samples.insert(format!("{p}temperature"), t);
    }
    if let Some(secs) = info.power_on_seconds() {
        samples.insert(format!("{p}power_on_time"), secs);
    }
    if let Some(n) = info.power_cycle_count {
        samples.insert(format!("{p}power_cycle_count"), n);
    }
    for attr in info.attributes() {
        if attr.name.is_empty() {
            continue;
        }
        let ap = attribute_prefix(dev, attr);
        if let Some(v) = attr.value {
            samples.insert(format!("{ap}normalized"), v);
        }
        if let Some(v) = attr.raw.value {
            samples.insert(format!("{ap}raw"), v);
        }
    }
    samples
}

fn is_due(last: Option<Instant>, every: Duration) -> bool {
    last.is_none_or(|t| t.elapsed() >= every)
}

#[async_trait::async_trait]
impl Collector for SmartctlCollector {
    type Config = SmartctlConfig;

    fn module(&self) -> &'static str {
        "smartctl"
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn charts(&self) -> &Charts {
        &self.charts
    }

    fn charts_mut(&mut self) -> &mut Charts {
        &mut self.charts
    }

    async fn init(&mut self) -> Result<(), CollectorError> {
        self.config.validate()?;
        self.selector = Some(self.config.selector()?);
        if self.probe.is_none() {
            let exec = Executor::lookup(SMARTCTL, self.config.job.timeout)?;
            tracing::debug!(path = %exec.path().display(), "Using smartctl");
            self.probe = Some(Arc::new(exec));
        }
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let probe = self
            .probe
            .clone()
            .ok_or_else(|| CollectorError::Transient("collector not initialized".into()))?;

        if self.devices.is_empty() || is_due(self.last_scan, self.config.scan_every) {
            self.scan(probe.as_ref()).await?;
            self.last_scan = Some(Instant::now());
            self.last_poll = None;
        }
        if is_due(self.last_poll, self.config.poll_devices_every) {
            self.poll(probe.as_ref()).await?;
            self.last_poll = Some(Instant::now());
        }

        let mut samples: Samples = self
            .polled
            .values()
            .flat_map(|s| s.iter().map(|(k, v)| (k.clone(), *v)))
            .collect();
        samples.retain(|k, _| self.charts.declares(k));
        Ok(samples)
    }

    async fn cleanup(&mut self) {
        self.probe = None;
    }
}

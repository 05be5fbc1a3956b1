//! MegaRAID collector backed by `storcli`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::charts::{Charts, PrefixTracker, Samples};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::exec::{CommandProbe, Executor};

use super::charts::{
    BBU_STATUSES, CONTROLLER_STATUSES, bbu_charts, bbu_prefix, controller_charts,
    controller_prefix, drive_charts, drive_prefix,
};
use super::parse::{StorController, StorDrive, parse_controllers, parse_drives};

const STORCLI: &str = "storcli";
const SHOW_CONTROLLERS: &[&str] = &["/cALL", "show", "all", "J", "nolog"];
const SHOW_DRIVES: &[&str] = &["/cALL/eALL/sALL", "show", "all", "J", "nolog"];

/// `BBU Status` values that mean the battery is fine (including charging).
const BBU_HEALTHY: &[i64] = &[0, 8, 4096];

/// Configuration for the storcli collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorcliConfig {
    #[serde(flatten)]
    pub job: JobOptions,
}

impl StorcliConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
        }
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()
    }
}

job_builders!(StorcliConfig);

/// MegaRAID collector.
pub struct StorcliCollector {
    config: StorcliConfig,
    charts: Charts,
    probe: Option<Arc<dyn CommandProbe>>,
    controllers: PrefixTracker,
    bbus: PrefixTracker,
    drives: PrefixTracker,
}

impl StorcliCollector {
    pub fn new(config: StorcliConfig) -> Self {
        Self {
            config,
            charts: Charts::new(),
            probe: None,
            controllers: PrefixTracker::new(),
            bbus: PrefixTracker::new(),
            drives: PrefixTracker::new(),
        }
    }

    /// Use `probe` instead of locating `storcli`.
    pub fn with_probe(mut self, probe: Arc<dyn CommandProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn update_charts(
        &mut self,
        controllers: &[StorController],
        drives: &[StorDrive],
    ) -> Result<(), CollectorError> {
        let cntrl_now: HashMap<String, String> = controllers
            .iter()
            .map(|c| (c.number.clone(), controller_prefix(c)))
            .collect();
        for key in self.controllers.sync(&mut self.charts, cntrl_now) {
            if let Some(cntrl) = controllers.iter().find(|c| c.number == key) {
                self.charts.add_all(controller_charts(cntrl))?;
            }
        }

        let mut bbu_now = HashMap::new();
        for cntrl in controllers {
            for idx in 0..cntrl.bbus.len() {
                bbu_now.insert(format!("{}/{idx}", cntrl.number), bbu_prefix(cntrl, idx));
            }
        }
        for key in self.bbus.sync(&mut self.charts, bbu_now) {
            for cntrl in controllers {
                for (idx, bbu) in cntrl.bbus.iter().enumerate() {
                    if key == format!("{}/{idx}", cntrl.number) {
                        self.charts.add_all(bbu_charts(cntrl, idx, bbu))?;
                    }
                }
            }
        }

        let drives_now = drives.iter().map(|d| (d.key(), drive_prefix(d))).collect();
        for key in self.drives.sync(&mut self.charts, drives_now) {
            if let Some(drive) = drives.iter().find(|d| d.key() == key) {
                self.charts.add_all(drive_charts(drive))?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StorcliCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorcliCollector")
            .field("config", &self.config)
            .field("charts", &self.charts.len())
            .finish_non_exhaustive()
    }
}

fn write_state(samples: &mut Samples, id: &str, states: &[&str], current: &str) {
    for state in states {
        samples.insert(format!("{id}_{state}"), i64::from(*state == current));
    }
}

fn controller_samples(samples: &mut Samples, cntrl: &StorController) {
    let p = controller_prefix(cntrl);

    let status = cntrl.controller_status.to_lowercase().replace(' ', "_");
    if !CONTROLLER_STATUSES.contains(&status.as_str()) {
        tracing::debug!(controller = %cntrl.number, status = %cntrl.controller_status, "Unknown controller status");
    }
    write_state(samples, &format!("{p}status"), CONTROLLER_STATUSES, &status);

    let bbu = match cntrl.bbu_status {
        None => "na",
        Some(code) if BBU_HEALTHY.contains(&code) => "healthy",
        Some(_) => "unhealthy",
    };
    write_state(samples, &format!("{p}bbu_status"), BBU_STATUSES, bbu);

    if let Some(t) = cntrl.roc_temperature {
        samples.insert(format!("{p}roc_temperature"), t);
    }
    if let Some(n) = cntrl.memory_correctable_errors {
        samples.insert(format!("{p}memory_correctable_errors"), n);
    }
    if let Some(n) = cntrl.memory_uncorrectable_errors {
        samples.insert(format!("{p}memory_uncorrectable_errors"), n);
    }

    for (idx, b) in cntrl.bbus.iter().enumerate() {
        if let Some(t) = b.temperature {
            samples.insert(format!("{}temperature", bbu_prefix(cntrl, idx)), t);
        }
    }
}

fn drive_samples(samples: &mut Samples, drive: &StorDrive) {
    let p = drive_prefix(drive);
    let counters = [
        ("media_error_count", drive.media_error_count),
        ("other_error_count", drive.other_error_count),
        ("predictive_failure_count", drive.predictive_failure_count),
        ("temperature", drive.temperature),
    ];
    for (name, value) in counters {
        if let Some(v) = value {
            samples.insert(format!("{p}{name}"), v);
        }
    }
    if let Some(active) = drive.smart_alert_flagged {
        samples.insert(format!("{p}smart_alert_status_active"), i64::from(active));
        samples.insert(format!("{p}smart_alert_status_inactive"), i64::from(!active));
    }
}

#[async_trait::async_trait]
impl Collector for StorcliCollector {
    type Config = StorcliConfig;

    fn module(&self) -> &'static str {
        "storcli"
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
        if self.probe.is_none() {
            let exec = Executor::lookup(STORCLI, self.config.job.timeout)?;
            tracing::debug!(path = %exec.path().display(), "Using storcli");
            self.probe = Some(Arc::new(exec));
        }
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let probe = self
            .probe
            .clone()
            .ok_or_else(|| CollectorError::Transient("collector not initialized".into()))?;

        let output = probe.run_args(SHOW_CONTROLLERS).await?;
        let controllers =
            parse_controllers(&output).map_err(|e| CollectorError::Parse(e.to_string()))?;
        if controllers.is_empty() {
            return Err(CollectorError::Parse("no controllers found".into()));
        }

        // Controllers without drives answer the drive query with a failure.
        let drives = match probe.run_args(SHOW_DRIVES).await {
            Ok(output) => parse_drives(&output).unwrap_or_else(|e| {
                tracing::debug!(job = %self.config.job.name, error = %e, "Ignoring drive output");
                Vec::new()
            }),
            Err(e) => {
                tracing::debug!(job = %self.config.job.name, error = %e, "Drive query failed");
                Vec::new()
            }
        };

        self.update_charts(&controllers, &drives)?;

        let mut samples = Samples::new();
        for cntrl in &controllers {
            controller_samples(&mut samples, cntrl);
        }
        for drive in &drives {
            drive_samples(&mut samples, drive);
        }
        samples.retain(|k, _| self.charts.declares(k));
        Ok(samples)
    }

    async fn cleanup(&mut self) {
        self.probe = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::storcli::parse::fixtures::{CONTROLLERS, DRIVES};
    use crate::exec::testing::ScriptedProbe;

    fn collector(probe: Arc<ScriptedProbe>) -> StorcliCollector {
        StorcliCollector::new(StorcliConfig::new("local")).with_probe(probe)
    }

    #[tokio::test]
    async fn test_collect() {
        let probe = Arc::new(
            ScriptedProbe::new()
                .on("/cALL show", CONTROLLERS)
                .on("/cALL/eALL/sALL show", DRIVES),
        );
        let mut c = collector(probe);
        c.init().await.unwrap();
        let samples = c.collect().await.unwrap();

        assert_eq!(samples["cntrl_0_status_optimal"], 1);
        assert_eq!(samples["cntrl_0_status_degraded"], 0);
        assert_eq!(samples["cntrl_0_bbu_status_healthy"], 1);
        assert_eq!(samples["cntrl_0_roc_temperature"], 48);
        assert_eq!(samples["cntrl_0_memory_uncorrectable_errors"], 0);
        assert_eq!(samples["bbu_0_cntrl_0_temperature"], 26);

        assert_eq!(samples["pd_e252_s0_cntrl_0_other_error_count"], 2);
        assert_eq!(samples["pd_e252_s0_cntrl_0_temperature"], 28);
        assert_eq!(samples["pd_e252_s0_cntrl_0_smart_alert_status_inactive"], 1);
        assert_eq!(samples["pd_e252_s1_cntrl_0_media_error_count"], 17);
        assert_eq!(samples["pd_e252_s1_cntrl_0_smart_alert_status_active"], 1);
        assert!(!c.charts().contains("pd_e252_s1_cntrl_0_temperature"));

        assert!(c.charts().undeclared(&samples).is_empty());
    }

    #[tokio::test]
    async fn test_drive_query_failure_keeps_controllers() {
        let probe = Arc::new(
            ScriptedProbe::new()
                .on("/cALL show", CONTROLLERS)
                .fail("/cALL/eALL/sALL show", 1, ""),
        );
        let mut c = collector(probe);
        c.init().await.unwrap();
        let samples = c.collect().await.unwrap();
        assert_eq!(samples["cntrl_0_status_optimal"], 1);
        assert!(!samples.keys().any(|k| k.starts_with("pd_")));
    }

    #[tokio::test]
    async fn test_degraded_controller_without_bbu() {
        let out = r#"{"Controllers": [{
            "Command Status": {"Controller": 1, "Status": "Success"},
            "Response Data": {
                "Basics": {"Controller": 1, "Model": "PERC H730P"},
                "Status": {"Controller Status": "Partially Degraded", "BBU Status": "NA"}
            }}]}"#;
        let probe = Arc::new(ScriptedProbe::new().on("/cALL show", out));
        let mut c = collector(probe);
        c.init().await.unwrap();
        let samples = c.collect().await.unwrap();
        assert_eq!(samples["cntrl_1_status_partially_degraded"], 1);
        assert_eq!(samples["cntrl_1_status_optimal"], 0);
        assert_eq!(samples["cntrl_1_bbu_status_na"], 1);
        assert!(!c.charts().contains("cntrl_1_roc_temperature"));
    }

    #[tokio::test]
    async fn test_vanished_drive() {
        let probe = Arc::new(
            ScriptedProbe::new()
                .on("/cALL show", CONTROLLERS)
                .on("/cALL/eALL/sALL show", DRIVES),
        );
        let mut c = collector(probe.clone());
        c.init().await.unwrap();
        c.collect().await.unwrap();
        c.charts_mut().take_pending();

        probe.set(
            "/cALL/eALL/sALL show",
            r#"{"Controllers": [{"Command Status": {"Controller": 0, "Status": "Success"},
                "Response Data": {}}]}"#,
        );
        let samples = c.collect().await.unwrap();
        assert!(!samples.keys().any(|k| k.starts_with("pd_")));
        let pending = c.charts_mut().take_pending();
        assert!(!pending.is_empty());
        assert!(pending.iter().all(|ch| ch.is_obsolete() && ch.id.starts_with("pd_")));
    }

    #[tokio::test]
    async fn test_controller_failures() {
        let probe = Arc::new(ScriptedProbe::new().on(
            "/cALL show",
            r#"{"Controllers": [{"Command Status": {"Controller": 0, "Status": "Failure"}}]}"#,
        ));
        let mut c = collector(probe);
        c.init().await.unwrap();
        assert!(matches!(c.gather().await, Err(CollectorError::Parse(_))));

        let mut c = StorcliCollector::new(StorcliConfig::new("local"));
        assert!(matches!(c.gather().await, Err(CollectorError::Transient(_))));
    }
}

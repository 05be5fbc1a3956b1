//! MegaRAID collector backed by the legacy `megacli` tool.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::charts::{Chart, Charts, Dim, PRECISION, PrefixTracker, Samples, clean_id, scaled};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::exec::{CommandProbe, ExecError, Executor};

use super::parse::{Adapter, Bbu, PhysicalDrive, VirtualDrive, parse_bbu_info, parse_ldpd_info};

/// Names the tool is installed under, tried in order.
const MEGACLI_NAMES: &[&str] = &["megacli", "MegaCli64", "MegaCli"];
const LDPD_INFO: &[&str] = &["-LDPDInfo", "-aAll", "-NoLog"];
const BBU_INFO: &[&str] = &["-AdpBbuCmd", "-aAll", "-NoLog"];

const STATES: &[&str] = &["optimal", "partially_degraded", "degraded", "failed"];

const PRIO_ADAPTER: u32 = 2900;
const PRIO_VD: u32 = 2910;
const PRIO_PD: u32 = 2920;
const PRIO_BBU: u32 = 2950;

/// Configuration for the megacli collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MegacliConfig {
    #[serde(flatten)]
    pub job: JobOptions,
}

impl MegacliConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
        }
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()
    }
}

job_builders!(MegacliConfig);

fn adapter_prefix(number: &str) -> String {
    format!("adapter_{}_", clean_id(number))
}

fn vd_prefix(vd: &VirtualDrive) -> String {
    format!("vd_{}_{}", clean_id(&vd.id), adapter_prefix(&vd.adapter))
}

fn pd_prefix(pd: &PhysicalDrive) -> String {
    format!(
        "pd_e{}_s{}_{}",
        clean_id(&pd.enclosure),
        clean_id(&pd.slot),
        adapter_prefix(&pd.adapter)
    )
}

fn bbu_prefix(bbu: &Bbu) -> String {
    format!("bbu_{}", adapter_prefix(&bbu.adapter))
}

fn state_chart(id: String, title: &str, family: &str, context: &str, priority: u32) -> Chart {
    let mut chart = Chart::new(id.clone(), title, "status", family, format!("megacli.{context}"))
        .with_priority(priority);
    for state in STATES {
        chart = chart.with_dim(Dim::new(format!("{id}_{state}"), *state));
    }
    chart
}

fn adapter_charts(adapter: &Adapter) -> Vec<Chart> {
    let p = adapter_prefix(&adapter.number);
    vec![
        state_chart(
            format!("{p}health_state"),
            "Adapter health state",
            "adapters",
            "adapter_health_state",
            PRIO_ADAPTER,
        )
        .with_label("adapter_number", adapter.number.as_str()),
    ]
}

fn vd_charts(vd: &VirtualDrive) -> Vec<Chart> {
    vec![
        state_chart(
            format!("{}state", vd_prefix(vd)),
            "Virtual drive state",
            "virtual drives",
            "virtual_drive_state",
            PRIO_VD,
        )
        .with_label("adapter_number", vd.adapter.as_str())
        .with_label("virtual_drive", vd.id.as_str())
        .with_label("raid_level", vd.raid_level.as_str()),
    ]
}

fn pd_charts(pd: &PhysicalDrive) -> Vec<Chart> {
    let p = pd_prefix(pd);
    let mut charts = vec![
        Chart::new(
            format!("{p}media_errors_rate"),
            "Physical drive media errors rate",
            "errors/s",
            "physical drives",
            "megacli.phys_drive_media_errors_rate",
        )
        .with_priority(PRIO_PD)
        .with_dim(Dim::new(format!("{p}media_error_count"), "media_errors").incremental())
        .with_dim(Dim::new(format!("{p}other_error_count"), "other_errors").incremental()),
        Chart::new(
            format!("{p}predictive_failures_rate"),
            "Physical drive predictive failures rate",
            "failures/s",
            "physical drives",
            "megacli.phys_drive_predictive_failures_rate",
        )
        .with_priority(PRIO_PD + 1)
        .with_dim(
            Dim::new(format!("{p}predictive_failure_count"), "predictive_failures").incremental(),
        ),
    ];
    if pd.temperature.is_some() {
        charts.push(
            Chart::new(
                format!("{p}temperature"),
                "Physical drive temperature",
                "Celsius",
                "physical drives",
                "megacli.phys_drive_temperature",
            )
            .with_priority(PRIO_PD + 2)
            .with_dim(Dim::new(format!("{p}temperature"), "temperature")),
        );
    }
    charts
        .into_iter()
        .map(|c| {
            c.with_label("adapter_number", pd.adapter.as_str())
                .with_label("wwn", pd.wwn.as_str())
                .with_label("slot_number", pd.slot.as_str())
                .with_label("drive_type", pd.pd_type.as_str())
        })
        .collect()
}

fn bbu_charts(bbu: &Bbu) -> Vec<Chart> {
    let p = bbu_prefix(bbu);
    [
        Chart::new(
            format!("{p}relative_charge"),
            "BBU relative charge",
            "percentage",
            "bbu",
            "megacli.bbu_relative_charge",
        )
        .with_priority(PRIO_BBU)
        .with_dim(Dim::new(format!("{p}relative_charge"), "charge")),
        Chart::new(
            format!("{p}recharge_cycles"),
            "BBU recharge cycles",
            "cycles",
            "bbu",
            "megacli.bbu_recharge_cycles",
        )
        .with_priority(PRIO_BBU + 1)
        .with_dim(Dim::new(format!("{p}cycle_count"), "recharge")),
        Chart::new(
            format!("{p}capacity_degradation"),
            "BBU capacity degradation",
            "percent",
            "bbu",
            "megacli.bbu_capacity_degradation",
        )
        .with_priority(PRIO_BBU + 2)
        .with_dim(Dim::new(format!("{p}capacity_degradation_perc"), "cap_degradation").with_divisor(PRECISION)),
        Chart::new(
            format!("{p}temperature"),
            "BBU temperature",
            "Celsius",
            "bbu",
            "megacli.bbu_temperature",
        )
        .with_priority(PRIO_BBU + 3)
        .with_dim(Dim::new(format!("{p}temperature"), "temperature")),
    ]
    .into_iter()
    .map(|c| {
        c.with_label("adapter_number", bbu.adapter.as_str())
            .with_label("battery_type", bbu.battery_type.as_str())
    })
    .collect()
}

/// MegaRAID collector for systems that only ship MegaCLI.
pub struct MegacliCollector {
    config: MegacliConfig,
    charts: Charts,
    probe: Option<Arc<dyn CommandProbe>>,
    adapters: PrefixTracker,
    virtual_drives: PrefixTracker,
    physical_drives: PrefixTracker,
    bbus: PrefixTracker,
}

impl MegacliCollector {
    pub fn new(config: MegacliConfig) -> Self {
        Self {
            config,
            charts: Charts::new(),
            probe: None,
            adapters: PrefixTracker::new(),
            virtual_drives: PrefixTracker::new(),
            physical_drives: PrefixTracker::new(),
            bbus: PrefixTracker::new(),
        }
    }

    /// Use `probe` instead of locating `megacli`.
    pub fn with_probe(mut self, probe: Arc<dyn CommandProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn update_charts(&mut self, adapters: &[Adapter], bbus: &[Bbu]) -> Result<(), CollectorError> {
        let now = adapters
            .iter()
            .map(|a| (a.number.clone(), adapter_prefix(&a.number)))
            .collect();
        for key in self.adapters.sync(&mut self.charts, now) {
            if let Some(a) = adapters.iter().find(|a| a.number == key) {
                self.charts.add_all(adapter_charts(a))?;
            }
        }

        let vds: Vec<&VirtualDrive> = adapters.iter().flat_map(|a| &a.virtual_drives).collect();
        let now = vds.iter().map(|vd| (vd.key(), vd_prefix(vd))).collect();
        for key in self.virtual_drives.sync(&mut self.charts, now) {
            if let Some(vd) = vds.iter().find(|vd| vd.key() == key) {
                self.charts.add_all(vd_charts(vd))?;
            }
        }

        let pds: Vec<&PhysicalDrive> = adapters.iter().flat_map(Adapter::physical_drives).collect();
        let now: HashMap<String, String> = pds.iter().map(|pd| (pd.key(), pd_prefix(pd))).collect();
        for key in self.physical_drives.sync(&mut self.charts, now) {
            if let Some(pd) = pds.iter().find(|pd| pd.key() == key) {
                self.charts.add_all(pd_charts(pd))?;
            }
        }

        let now = bbus.iter().map(|b| (b.adapter.clone(), bbu_prefix(b))).collect();
        for key in self.bbus.sync(&mut self.charts, now) {
            if let Some(b) = bbus.iter().find(|b| b.adapter == key) {
                self.charts.add_all(bbu_charts(b))?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MegacliCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MegacliCollector")
            .field("config", &self.config)
            .field("charts", &self.charts.len())
            .finish_non_exhaustive()
    }
}

fn write_state(samples: &mut Samples, id: &str, current: &str) {
    for state in STATES {
        samples.insert(format!("{id}_{state}"), i64::from(*state == current));
    }
}

fn lookup_megacli(timeout: std::time::Duration) -> Result<Executor, ExecError> {
    let mut last = ExecError::NotFound(MEGACLI_NAMES.join(", "));
    for name in MEGACLI_NAMES {
        match Executor::lookup(name, timeout) {
            Ok(exec) => return Ok(exec),
            Err(e) => last = e,
        }
    }
    Err(last)
}

#[async_trait::async_trait]
impl Collector for MegacliCollector {
    type Config = MegacliConfig;

    fn module(&self) -> &'static str {
        "megacli"
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
            let exec = lookup_megacli(self.config.job.timeout)?;
            tracing::debug!(path = %exec.path().display(), "Using megacli");
            self.probe = Some(Arc::new(exec));
        }
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let probe = self
            .probe
            .clone()
            .ok_or_else(|| CollectorError::Transient("collector not initialized".into()))?;

        let output = probe.run_args(LDPD_INFO).await?;
        let adapters = parse_ldpd_info(&output).map_err(|e| CollectorError::Parse(e.to_string()))?;
        if adapters.is_empty() {
            return Err(CollectorError::Parse("no adapters found".into()));
        }

        // Adapters without a battery make the whole command fail.
        let bbus = match probe.run_args(BBU_INFO).await {
            Ok(out) => parse_bbu_info(&out),
            Err(ExecError::Failed { stdout, .. }) => parse_bbu_info(&stdout),
            Err(e) => {
                tracing::debug!(job = %self.config.job.name, error = %e, "BBU query failed");
                Vec::new()
            }
        };

        self.update_charts(&adapters, &bbus)?;

        let mut samples = Samples::new();
        for adapter in &adapters {
            let ap = adapter_prefix(&adapter.number);
            write_state(&mut samples, &format!("{ap}health_state"), adapter.health_state());
            for vd in &adapter.virtual_drives {
                write_state(
                    &mut samples,
                    &format!("{}state", vd_prefix(vd)),
                    vd.normalized_state(),
                );
            }
            for pd in adapter.physical_drives() {
                let p = pd_prefix(pd);
                let values = [
                    ("media_error_count", pd.media_error_count),
                    ("other_error_count", pd.other_error_count),
                    ("predictive_failure_count", pd.predictive_failure_count),
                    ("temperature", pd.temperature),
                ];
                for (name, value) in values {
                    if let Some(v) = value {
                        samples.insert(format!("{p}{name}"), v);
                    }
                }
            }
        }
        for bbu in &bbus {
            let p = bbu_prefix(bbu);
            if let Some(v) = bbu.relative_charge {
                samples.insert(format!("{p}relative_charge"), v);
            }
            if let Some(v) = bbu.cycle_count {
                samples.insert(format!("{p}cycle_count"), v);
            }
            if let Some(v) = bbu.capacity_degradation() {
                samples.insert(format!("{p}capacity_degradation_perc"), scaled(v));
            }
            if let Some(v) = bbu.temperature {
                samples.insert(format!("{p}temperature"), v);
            }
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
    use crate::collector::megacli::parse::fixtures::{BBU_INFO as BBU_OUT, LDPD_INFO as LDPD_OUT};
    use crate::exec::testing::ScriptedProbe;

    fn collector(probe: Arc<ScriptedProbe>) -> MegacliCollector {
        MegacliCollector::new(MegacliConfig::new("local")).with_probe(probe)
    }

    #[tokio::test]
    async fn test_collect() {
        let probe = Arc::new(
            ScriptedProbe::new()
                .on("-LDPDInfo", LDPD_OUT)
                .fail("-AdpBbuCmd", 1, BBU_OUT),
        );
        let mut c = collector(probe);
        c.init().await.unwrap();
        c.check().await.unwrap();
        let samples = c.collect().await.unwrap();

        assert_eq!(samples["adapter_0_health_state_degraded"], 1);
        assert_eq!(samples["adapter_0_health_state_optimal"], 0);
        assert_eq!(samples["vd_0_adapter_0_state_optimal"], 1);
        assert_eq!(samples["vd_1_adapter_0_state_degraded"], 1);

        assert_eq!(samples["pd_e32_s0_adapter_0_temperature"], 31);
        assert_eq!(samples["pd_e32_s2_adapter_0_media_error_count"], 12);
        assert_eq!(samples["pd_e32_s2_adapter_0_predictive_failure_count"], 3);
        assert!(!c.charts().contains("pd_e32_s2_adapter_0_temperature"));

        assert_eq!(samples["bbu_adapter_0_relative_charge"], 100);
        assert_eq!(samples["bbu_adapter_0_cycle_count"], 30);
        assert_eq!(samples["bbu_adapter_0_capacity_degradation_perc"], 20_000);
        assert_eq!(samples["bbu_adapter_0_temperature"], 27);

        assert!(c.charts().undeclared(&samples).is_empty());
    }

    #[tokio::test]
    async fn test_missing_bbu_is_not_an_error() {
        let probe = Arc::new(ScriptedProbe::new().on("-LDPDInfo", LDPD_OUT));
        let mut c = collector(probe);
        c.init().await.unwrap();
        let samples = c.collect().await.unwrap();
        assert!(!samples.is_empty());
        assert!(!samples.keys().any(|k| k.starts_with("bbu_")));
    }

    #[tokio::test]
    async fn test_rebuilt_virtual_drive() {
        let probe = Arc::new(ScriptedProbe::new().on("-LDPDInfo", LDPD_OUT));
        let mut c = collector(probe.clone());
        c.init().await.unwrap();
        c.collect().await.unwrap();
        c.charts_mut().take_pending();

        let single = LDPD_OUT.split("Virtual Drive: 1").next().unwrap().to_string();
        probe.set("-LDPDInfo", single);
        let samples = c.collect().await.unwrap();
        assert_eq!(samples["adapter_0_health_state_optimal"], 1);

        let pending = c.charts_mut().take_pending();
        let ids: Vec<&str> = pending.iter().map(|ch| ch.id.as_str()).collect();
        assert!(ids.contains(&"vd_1_adapter_0_state"));
        assert!(ids.contains(&"pd_e32_s2_adapter_0_media_errors_rate"));
        assert!(pending.iter().all(|ch| ch.is_obsolete()));
    }

    #[tokio::test]
    async fn test_unparseable_output() {
        let probe = Arc::new(ScriptedProbe::new().on("-LDPDInfo", "Failed to initialize RM\n"));
        let mut c = collector(probe);
        c.init().await.unwrap();
        assert!(matches!(c.gather().await, Err(CollectorError::Parse(_))));

        let probe = Arc::new(ScriptedProbe::new().on("-LDPDInfo", ""));
        let mut c = collector(probe);
        c.init().await.unwrap();
        assert!(matches!(c.gather().await, Err(CollectorError::Parse(_))));
    }
}

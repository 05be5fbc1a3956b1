//! HPE Smart Array collector.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::charts::{Charts, PrefixTracker, Samples};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::exec::{CommandProbe, Executor};

use super::charts::{
    array_charts, array_prefix, cache_present, controller_charts, controller_prefix,
    has_battery, logical_drive_charts, logical_drive_prefix, physical_drive_charts,
    physical_drive_prefix,
};
use super::parse::{Controller, parse_ssacli};

const SSACLI: &str = "ssacli";
const SHOW_CONFIG_DETAIL: &[&str] = &["ctrl", "all", "show", "config", "detail"];

/// Configuration for the Smart Array collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HpssaConfig {
    #[serde(flatten)]
    pub job: JobOptions,
}

impl HpssaConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
        }
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()
    }
}

job_builders!(HpssaConfig);

/// HPE Smart Array collector backed by `ssacli`.
pub struct HpssaCollector {
    config: HpssaConfig,
    charts: Charts,
    probe: Option<Arc<dyn CommandProbe>>,
    controllers: PrefixTracker,
    arrays: PrefixTracker,
    logical_drives: PrefixTracker,
    physical_drives: PrefixTracker,
}

impl HpssaCollector {
    pub fn new(config: HpssaConfig) -> Self {
        Self {
            config,
            charts: Charts::new(),
            probe: None,
            controllers: PrefixTracker::new(),
            arrays: PrefixTracker::new(),
            logical_drives: PrefixTracker::new(),
            physical_drives: PrefixTracker::new(),
        }
    }

    /// Use `probe` instead of locating `ssacli`.
    pub fn with_probe(mut self, probe: Arc<dyn CommandProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn update_charts(&mut self, controllers: &[Controller]) -> Result<(), CollectorError> {
        let mut cntrl_now = HashMap::new();
        let mut arr_now = HashMap::new();
        let mut ld_now = HashMap::new();
        let mut pd_now = HashMap::new();
        for cntrl in controllers {
            cntrl_now.insert(cntrl.key(), controller_prefix(cntrl));
            for arr in &cntrl.arrays {
                arr_now.insert(arr.key(), array_prefix(cntrl, arr));
                for ld in &arr.logical_drives {
                    ld_now.insert(ld.key(), logical_drive_prefix(cntrl, ld));
                }
            }
            for pd in cntrl.physical_drives() {
                pd_now.insert(pd.key(), physical_drive_prefix(cntrl, pd));
            }
        }

        let levels = [
            (&mut self.controllers, cntrl_now),
            (&mut self.arrays, arr_now),
            (&mut self.logical_drives, ld_now),
            (&mut self.physical_drives, pd_now),
        ];
        let mut appeared = Vec::new();
        for (seen, now) in levels {
            appeared.extend(seen.sync(&mut self.charts, now));
        }

        for cntrl in controllers {
            if appeared.contains(&cntrl.key()) {
                self.charts.add_all(controller_charts(cntrl))?;
            }
            for arr in &cntrl.arrays {
                if appeared.contains(&arr.key()) {
                    self.charts.add_all(array_charts(cntrl, arr))?;
                }
                for ld in &arr.logical_drives {
                    if appeared.contains(&ld.key()) {
                        self.charts.add_all(logical_drive_charts(cntrl, ld))?;
                    }
                }
            }
            for pd in cntrl.physical_drives() {
                if appeared.contains(&pd.key()) {
                    self.charts.add_all(physical_drive_charts(cntrl, pd))?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HpssaCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpssaCollector")
            .field("config", &self.config)
            .field("charts", &self.charts.len())
            .finish_non_exhaustive()
    }
}

fn write_status(samples: &mut Samples, prefix: &str, status: &str) {
    if status.is_empty() {
        return;
    }
    let ok = status.eq_ignore_ascii_case("ok");
    samples.insert(format!("{prefix}status_ok"), i64::from(ok));
    samples.insert(format!("{prefix}status_nok"), i64::from(!ok));
}

fn write_temperature(samples: &mut Samples, prefix: &str, raw: &str) {
    if let Ok(t) = raw.trim().parse::<i64>() {
        samples.insert(format!("{prefix}temperature"), t);
    }
}

fn controller_samples(samples: &mut Samples, cntrl: &Controller) {
    let p = controller_prefix(cntrl);
    write_status(samples, &p, &cntrl.controller_status);
    write_temperature(samples, &p, &cntrl.controller_temperature_c);

    let present = cache_present(cntrl);
    samples.insert(format!("{p}cache_presence_present"), i64::from(present));
    samples.insert(format!("{p}cache_presence_not_present"), i64::from(!present));
    if present {
        write_status(samples, &format!("{p}cache_"), &cntrl.cache_status);
        write_temperature(
            samples,
            &format!("{p}cache_module_"),
            &cntrl.cache_module_temperature_c,
        );
    }
    if has_battery(cntrl) {
        write_status(
            samples,
            &format!("{p}cache_battery_"),
            &cntrl.battery_capacitor_status,
        );
    }
}

#[async_trait::async_trait]
impl Collector for HpssaCollector {
    type Config = HpssaConfig;

    fn module(&self) -> &'static str {
        "hpssa"
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
            let exec = Executor::lookup(SSACLI, self.config.job.timeout)?;
            tracing::debug!(path = %exec.path().display(), "Using ssacli");
            self.probe = Some(Arc::new(exec));
        }
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let probe = self
            .probe
            .clone()
            .ok_or_else(|| CollectorError::Transient("collector not initialized".into()))?;

        let output = probe.run_args(SHOW_CONFIG_DETAIL).await?;
        let controllers = parse_ssacli(&output).map_err(|e| CollectorError::Parse(e.to_string()))?;
        if controllers.is_empty() {
            return Err(CollectorError::Parse("no controllers found".into()));
        }

        self.update_charts(&controllers)?;

        let mut samples = Samples::new();
        for cntrl in &controllers {
            controller_samples(&mut samples, cntrl);
            for arr in &cntrl.arrays {
                write_status(&mut samples, &array_prefix(cntrl, arr), &arr.status);
                for ld in &arr.logical_drives {
                    write_status(&mut samples, &logical_drive_prefix(cntrl, ld), &ld.status);
                }
            }
            for pd in cntrl.physical_drives() {
                let p = physical_drive_prefix(cntrl, pd);
                write_status(&mut samples, &p, &pd.status);
                write_temperature(&mut samples, &p, &pd.current_temperature_c);
            }
        }

        // Fields that showed up after the entity's charts were created are dropped.
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
    use crate::exec::testing::ScriptedProbe;

    const TWO_DRIVES: &str = "
HPE Smart Array E208i-p SR Gen10 in Slot 0
   Controller Status: OK
   Cache Board Present: True
   Cache Status: OK
   Controller Temperature (C): 45
   Cache Module Temperature (C): 38
   Battery/Capacitor Count: 1
   Battery/Capacitor Status: Failed

   Array: A
      Status: OK

      Logical Drive: 1
         Status: OK

      physicaldrive 1I:1:1
         Status: OK
         Current Temperature (C): 30

   Unassigned

      physicaldrive 1I:1:2
         Status: Failed
";

    fn collector(probe: Arc<ScriptedProbe>) -> HpssaCollector {
        HpssaCollector::new(HpssaConfig::new("local")).with_probe(probe)
    }

    #[tokio::test]
    async fn test_collect_hierarchy() {
        let probe = Arc::new(ScriptedProbe::new().on("config detail", TWO_DRIVES));
        let mut c = collector(probe.clone());
        c.init().await.unwrap();
        c.check().await.unwrap();

        let samples = c.collect().await.unwrap();
        let cntrl = "cntrl_e208i-p_slot_0_";
        assert_eq!(samples[&format!("{cntrl}status_ok")], 1);
        assert_eq!(samples[&format!("{cntrl}temperature")], 45);
        assert_eq!(samples[&format!("{cntrl}cache_presence_present")], 1);
        assert_eq!(samples[&format!("{cntrl}cache_status_ok")], 1);
        assert_eq!(samples[&format!("{cntrl}cache_module_temperature")], 38);
        assert_eq!(samples[&format!("{cntrl}cache_battery_status_nok")], 1);
        assert_eq!(samples[&format!("array_a_{cntrl}status_ok")], 1);
        assert_eq!(samples[&format!("ld_1_array_a_{cntrl}status_ok")], 1);

        let pd = format!("pd_1i_1_1_ld_1_array_a_{cntrl}");
        assert_eq!(samples[&format!("{pd}status_ok")], 1);
        assert_eq!(samples[&format!("{pd}temperature")], 30);

        let spare = format!("pd_1i_1_2_ld_na_array_na_{cntrl}");
        assert_eq!(samples[&format!("{spare}status_nok")], 1);
        assert!(c.charts().contains(&format!("{spare}status")));
        assert!(!c.charts().contains(&format!("{spare}temperature")));

        assert!(c.charts().undeclared(&samples).is_empty());
        assert_eq!(probe.call_count("ctrl all show config detail"), 2);
    }

    #[tokio::test]
    async fn test_vanished_drive_charts_become_obsolete() {
        let probe = Arc::new(ScriptedProbe::new().on("config detail", TWO_DRIVES));
        let mut c = collector(probe.clone());
        c.init().await.unwrap();
        c.collect().await.unwrap();
        c.charts_mut().take_pending();

        let spare_chart = "pd_1i_1_2_ld_na_array_na_cntrl_e208i-p_slot_0_status";
        assert!(c.charts().contains(spare_chart));

        let without_spare = TWO_DRIVES.split("   Unassigned").next().unwrap().to_string();
        probe.set("config detail", without_spare);
        let samples = c.collect().await.unwrap();
        assert!(!c.charts().contains(spare_chart));
        assert!(!samples.keys().any(|k| k.starts_with("pd_1i_1_2_")));

        let pending = c.charts_mut().take_pending();
        assert!(pending.iter().all(|ch| ch.is_obsolete()));
        assert!(pending.iter().any(|ch| ch.id == spare_chart));

        // The drive comes back: fresh charts under the same ids.
        probe.set("config detail", TWO_DRIVES);
        c.collect().await.unwrap();
        let pending = c.charts_mut().take_pending();
        assert!(pending.iter().any(|ch| ch.id == spare_chart && !ch.is_obsolete()));
    }

    #[tokio::test]
    async fn test_probe_failures() {
        let probe = Arc::new(ScriptedProbe::new().fail("config detail", 1, ""));
        let mut c = collector(probe);
        c.init().await.unwrap();
        assert!(matches!(
            c.gather().await,
            Err(CollectorError::ProbeFailed { code: Some(1), .. })
        ));
        assert!(c.collect().await.unwrap().is_empty());

        let probe = Arc::new(ScriptedProbe::new().on("config detail", "garbage\n"));
        let mut c = collector(probe);
        c.init().await.unwrap();
        assert!(matches!(c.gather().await, Err(CollectorError::Parse(_))));
        assert!(c.check().await.is_err());
    }

    #[tokio::test]
    async fn test_gather_before_init() {
        let mut c = HpssaCollector::new(HpssaConfig::new("local"));
        assert!(matches!(c.gather().await, Err(CollectorError::Transient(_))));
    }

    #[tokio::test]
    async fn test_init_rejects_bad_config() {
        let config = HpssaConfig::new("local").with_timeout(std::time::Duration::ZERO);
        let mut c = HpssaCollector::new(config).with_probe(Arc::new(ScriptedProbe::new()));
        assert!(matches!(c.init().await, Err(CollectorError::Config(_))));
    }
}

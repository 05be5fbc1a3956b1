//! IBM i (AS/400) collector.
//!
//! Queries go through a host-supplied [`SqlClient`] (an IBM i Access ODBC
//! bridge, for instance). Every cycle reads `QSYS2.SYSTEM_STATUS_INFO`;
//! with `collect_active_jobs` enabled each configured job is looked up in
//! `QSYS2.ACTIVE_JOB_INFO`. A job that is not running reports nothing and
//! its charts go obsolete.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::charts::{Chart, ChartKind, Charts, Dim, PRECISION, PrefixTracker, Samples, clean_id, scaled};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::dbdriver::{Dsn, SqlClient, query_rows};

use super::parse::{ActiveJob, ActiveJobTarget, QUERY_SYSTEM_STATUS, SystemStatus};

const PRIO_SYSTEM: u32 = 7000;
const PRIO_JOB: u32 = 7100;

/// Configuration for the IBM i collector.
#[derive(Clone, Serialize, Deserialize)]
pub struct As400Config {
    #[serde(flatten)]
    pub job: JobOptions,
    /// `SYSTEM=host;UID=user;PWD=secret` connection string.
    #[serde(default)]
    pub dsn: String,
    #[serde(default)]
    pub collect_active_jobs: bool,
    /// Jobs as `NUMBER/USER/NAME`.
    #[serde(default)]
    pub active_job_targets: Vec<String>,
}

impl std::fmt::Debug for As400Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("As400Config")
            .field("job", &self.job)
            .field("collect_active_jobs", &self.collect_active_jobs)
            .field("active_job_targets", &self.active_job_targets)
            .finish_non_exhaustive()
    }
}

impl As400Config {
    pub fn new(name: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
            dsn: dsn.into(),
            collect_active_jobs: false,
            active_job_targets: Vec::new(),
        }
    }

    /// Enable active job collection for `target`.
    pub fn with_active_job(mut self, target: impl Into<String>) -> Self {
        self.collect_active_jobs = true;
        self.active_job_targets.push(target.into());
        self
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()?;
        let dsn = Dsn::from_str(&crate::config::expand_env_vars(&self.dsn))
            .map_err(|e| CollectorError::Config(format!("dsn: {e}")))?;
        if dsn.hostname().is_none() {
            return Err(CollectorError::Config(
                "dsn must name the system (SYSTEM= or HOSTNAME=)".into(),
            ));
        }
        self.targets().map(|_| ())
    }

    /// Parsed targets, rejecting duplicates and targets whose chart ids
    /// would clash (`A.B` and `A_B` share one prefix).
    pub fn targets(&self) -> Result<Vec<ActiveJobTarget>, CollectorError> {
        let mut targets: Vec<ActiveJobTarget> = Vec::with_capacity(self.active_job_targets.len());
        let mut prefixes: HashMap<String, String> = HashMap::new();
        for raw in &self.active_job_targets {
            let target = ActiveJobTarget::from_str(raw)
                .map_err(|e| CollectorError::Config(e.to_string()))?;
            if targets.contains(&target) {
                return Err(CollectorError::Config(format!(
                    "duplicate active job target '{target}'"
                )));
            }
            if let Some(other) = prefixes.insert(job_prefix(&target), target.to_string()) {
                return Err(CollectorError::Config(format!(
                    "active job targets '{other}' and '{target}' map to the same chart id"
                )));
            }
            targets.push(target);
        }
        Ok(targets)
    }
}

job_builders!(As400Config);

fn system_charts() -> Vec<Chart> {
    vec![
        Chart::new(
            "cpu_utilization",
            "CPU utilization",
            "percentage",
            "cpu",
            "as400.cpu_utilization",
        )
        .with_kind(ChartKind::Area)
        .with_priority(PRIO_SYSTEM)
        .with_dim(Dim::new("cpu_utilization", "utilization").with_divisor(PRECISION)),
        Chart::new(
            "cpu_configuration",
            "Configured CPUs",
            "cpus",
            "cpu",
            "as400.cpu_configuration",
        )
        .with_priority(PRIO_SYSTEM + 1)
        .with_dim(Dim::new("configured_cpus", "configured")),
        Chart::new(
            "main_storage_size",
            "Main storage size",
            "KiB",
            "memory",
            "as400.main_storage_size",
        )
        .with_priority(PRIO_SYSTEM + 2)
        .with_dim(Dim::new("main_storage_size", "total")),
        Chart::new(
            "temporary_storage",
            "Temporary storage",
            "MiB",
            "memory",
            "as400.temporary_storage",
        )
        .with_priority(PRIO_SYSTEM + 3)
        .with_dim(Dim::new("current_temporary_storage", "current")),
        Chart::new(
            "system_asp_usage",
            "System ASP usage",
            "percentage",
            "storage",
            "as400.system_asp_usage",
        )
        .with_kind(ChartKind::Area)
        .with_priority(PRIO_SYSTEM + 4)
        .with_dim(Dim::new("system_asp_used", "used").with_divisor(PRECISION)),
        Chart::new("jobs", "Jobs", "jobs", "jobs", "as400.jobs")
            .with_priority(PRIO_SYSTEM + 5)
            .with_dim(Dim::new("total_jobs", "total"))
            .with_dim(Dim::new("active_jobs", "active"))
            .with_dim(Dim::new("interactive_jobs", "interactive"))
            .with_dim(Dim::new("batch_jobs_running", "batch")),
        Chart::new(
            "active_threads",
            "Active threads",
            "threads",
            "jobs",
            "as400.active_threads",
        )
        .with_priority(PRIO_SYSTEM + 6)
        .with_dim(Dim::new("active_threads", "threads")),
    ]
}

fn system_samples(s: &SystemStatus, samples: &mut Samples) {
    let counts = [
        ("configured_cpus", s.configured_cpus),
        ("main_storage_size", s.main_storage_size),
        ("current_temporary_storage", s.current_temporary_storage),
        ("total_jobs", s.total_jobs),
        ("active_jobs", s.active_jobs),
        ("interactive_jobs", s.interactive_jobs),
        ("batch_jobs_running", s.batch_jobs_running),
        ("active_threads", s.active_threads),
    ];
    for (key, value) in counts {
        if let Some(v) = value {
            samples.insert(key.to_string(), v);
        }
    }
    if let Some(v) = s.cpu_utilization {
        samples.insert("cpu_utilization".into(), scaled(v));
    }
    if let Some(v) = s.system_asp_used {
        samples.insert("system_asp_used".into(), scaled(v));
    }
}

fn job_prefix(target: &ActiveJobTarget) -> String {
    format!("active_job_{}_", clean_id(&target.to_string()))
}

fn job_charts(target: &ActiveJobTarget, job: &ActiveJob) -> Vec<Chart> {
    let p = job_prefix(target);
    let chart = |suffix: &str, title: &str, units: &str, priority: u32| {
        let mut chart = Chart::new(
            format!("{p}{suffix}"),
            title,
            units,
            "active jobs",
            format!("as400.active_job_{suffix}"),
        )
        .with_priority(PRIO_JOB + priority)
        .with_label("job_number", target.number.as_str())
        .with_label("job_user", target.user.as_str())
        .with_label("job_name", target.name.as_str());
        if let Some(ref subsystem) = job.subsystem {
            chart = chart.with_label("subsystem", subsystem.as_str());
        }
        chart
    };

    vec![
        chart("cpu", "Active job CPU", "percentage", 0)
            .with_dim(Dim::new(format!("{p}cpu_percentage"), "cpu").with_divisor(PRECISION)),
        chart("cpu_time", "Active job CPU time", "seconds", 1)
            .with_dim(Dim::new(format!("{p}cpu_time"), "cpu_time").with_divisor(1000)),
        chart("temporary_storage", "Active job temporary storage", "MiB", 2)
            .with_dim(Dim::new(format!("{p}temporary_storage"), "temporary")),
        chart("threads", "Active job threads", "threads", 3)
            .with_dim(Dim::new(format!("{p}threads"), "threads")),
        chart("disk_io", "Active job disk I/O", "operations/s", 4)
            .with_dim(Dim::new(format!("{p}disk_io"), "disk_io").incremental()),
        chart(
            "interactive_transactions",
            "Active job interactive transactions",
            "transactions/s",
            5,
        )
        .with_dim(Dim::new(format!("{p}interactive_transactions"), "transactions").incremental()),
        chart("elapsed_time", "Active job elapsed time", "seconds", 6)
            .with_dim(Dim::new(format!("{p}elapsed_time"), "elapsed")),
    ]
}

fn job_samples(p: &str, job: &ActiveJob, samples: &mut Samples) {
    let values = [
        ("cpu_time", job.elapsed_cpu_time),
        ("temporary_storage", job.temporary_storage_mb()),
        ("threads", job.threads),
        ("disk_io", job.disk_io),
        ("interactive_transactions", job.interactive_transactions),
        ("elapsed_time", job.elapsed_time),
    ];
    for (suffix, value) in values {
        if let Some(v) = value {
            samples.insert(format!("{p}{suffix}"), v);
        }
    }
    if let Some(pct) = job.cpu_percentage {
        samples.insert(format!("{p}cpu_percentage"), scaled(pct));
    }
}

/// IBM i collector.
pub struct As400Collector {
    config: As400Config,
    charts: Charts,
    client: Option<Arc<dyn SqlClient>>,
    targets: Vec<ActiveJobTarget>,
    jobs: PrefixTracker,
}

impl As400Collector {
    pub fn new(config: As400Config) -> Self {
        Self {
            config,
            charts: Charts::new(),
            client: None,
            targets: Vec::new(),
            jobs: PrefixTracker::new(),
        }
    }

    /// Supply the SQL client. Required before `init`.
    pub fn with_client(mut self, client: Arc<dyn SqlClient>) -> Self {
        self.client = Some(client);
        self
    }

    async fn collect_active_jobs(
        &mut self,
        client: &dyn SqlClient,
        samples: &mut Samples,
    ) -> Result<(), CollectorError> {
        let mut found: Vec<(ActiveJobTarget, ActiveJob)> = Vec::new();
        for target in &self.targets {
            let rows = query_rows(client, &target.query())
                .await
                .map_err(|e| match CollectorError::from(e) {
                    CollectorError::ProbeFailed { code, message } => CollectorError::ProbeFailed {
                        code,
                        message: format!("active job {target}: {message}"),
                    },
                    other => other,
                })?;
            match rows.first() {
                Some(row) => found.push((target.clone(), ActiveJob::from_row(row))),
                None => {
                    tracing::debug!(job = %self.config.job.name, target = %target, "Active job not running");
                }
            }
        }

        let current: HashMap<String, String> = found
            .iter()
            .map(|(t, _)| (t.to_string(), job_prefix(t)))
            .collect();
        let appeared = self.jobs.sync(&mut self.charts, current);
        for (target, job) in &found {
            if appeared.contains(&target.to_string()) {
                self.charts.add_all(job_charts(target, job))?;
            }
            job_samples(&job_prefix(target), job, samples);
        }
        Ok(())
    }
}

impl std::fmt::Debug for As400Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("As400Collector")
            .field("config", &self.config)
            .field("has_client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for As400Collector {
    type Config = As400Config;

    fn module(&self) -> &'static str {
        "as400"
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
        if self.client.is_none() {
            return Err(CollectorError::ProbeUnavailable(
                "no IBM i SQL driver available; supply a client".into(),
            ));
        }
        self.targets = if self.config.collect_active_jobs {
            self.config.targets()?
        } else {
            Vec::new()
        };
        self.charts = Charts::new();
        self.charts.add_all(system_charts())?;
        self.jobs = PrefixTracker::new();
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let Some(client) = self.client.clone() else {
            return Err(CollectorError::Transient("collector not initialized".into()));
        };

        let mut samples = Samples::new();
        let rows = query_rows(client.as_ref(), QUERY_SYSTEM_STATUS).await?;
        if let Some(row) = rows.first() {
            system_samples(&SystemStatus::from_row(row), &mut samples);
        }

        if !self.targets.is_empty() {
            self.collect_active_jobs(client.as_ref(), &mut samples).await?;
        }

        samples.retain(|k, _| self.charts.declares(k));
        Ok(samples)
    }

    async fn cleanup(&mut self) {
        if let Some(client) = self.client.take() {
            client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbdriver::testing::ScriptedClient;

    const DSN: &str = "SYSTEM=ibmi.local;UID=monitor;PWD=secret";

    fn status() -> Vec<Vec<(&'static str, Option<&'static str>)>> {
        vec![vec![
            ("AVERAGE_CPU_UTILIZATION", Some("12.5")),
            ("CONFIGURED_CPUS", Some("4")),
            ("CURRENT_TEMPORARY_STORAGE", Some("5120")),
            ("TOTAL_JOBS_IN_SYSTEM", Some("1520")),
            ("ACTIVE_JOBS_IN_SYSTEM", Some("310")),
        ]]
    }

    fn job_row(storage: &'static str) -> Vec<Vec<(&'static str, Option<&'static str>)>> {
        vec![vec![
            ("JOB_NAME", Some("123456/TESTUSER/JOB1")),
            ("JOB_STATUS", Some("ACTIVE")),
            ("SUBSYSTEM", Some("QBATCH")),
            ("ELAPSED_CPU_TIME", Some("1000")),
            ("ELAPSED_TIME", Some("5000")),
            ("TEMPORARY_STORAGE", Some(storage)),
            ("CPU_PERCENTAGE", Some("25.5")),
            ("ELAPSED_INTERACTIVE_TRANSACTIONS", Some("100")),
            ("ELAPSED_TOTAL_DISK_IO_COUNT", Some("500")),
            ("THREAD_COUNT", Some("8")),
        ]]
    }

    fn collector(client: ScriptedClient, config: As400Config) -> As400Collector {
        As400Collector::new(config).with_client(Arc::new(client))
    }

    const P: &str = "active_job_123456_testuser_job1_";

    #[test]
    fn test_config() {
        let yaml = "\
name: ibmi
dsn: SYSTEM=ibmi.local;UID=monitor;PWD=secret
collect_active_jobs: true
active_job_targets:
  - 123456/QUSER/QZDASOINIT
";
        let config: As400Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert!(!format!("{config:?}").contains("secret"));

        assert!(As400Config::new("x", "").validate().is_err());
        assert!(As400Config::new("x", "UID=a").validate().is_err());
        assert!(As400Config::new("x", DSN).with_active_job("bad").validate().is_err());
        let dup = As400Config::new("x", DSN)
            .with_active_job("123456/U/J")
            .with_active_job("123456/u/j");
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));

        let clash = As400Config::new("x", DSN)
            .with_active_job("123456/USER/A.B")
            .with_active_job("123456/USER/A_B");
        let err = clash.targets().unwrap_err();
        assert!(matches!(err, CollectorError::Config(_)));
        assert!(err.to_string().contains("same chart id"));
        assert!(clash.validate().is_err());
    }

    #[tokio::test]
    async fn test_init_requires_client() {
        let mut c = As400Collector::new(As400Config::new("ibmi", DSN));
        assert!(matches!(
            c.init().await,
            Err(CollectorError::ProbeUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_collect_system_status() {
        let client = ScriptedClient::new().on("SYSTEM_STATUS_INFO", status());
        let mut c = collector(client, As400Config::new("ibmi", DSN));
        c.init().await.unwrap();

        let samples = c.collect().await.unwrap();
        assert_eq!(samples["cpu_utilization"], 12_500);
        assert_eq!(samples["configured_cpus"], 4);
        assert_eq!(samples["current_temporary_storage"], 5120);
        assert_eq!(samples["total_jobs"], 1520);
        assert!(!samples.contains_key("active_threads"));
        assert!(c.charts().undeclared(&samples).is_empty());
    }

    #[tokio::test]
    async fn test_active_job_temporary_storage_in_mb() {
        let client = ScriptedClient::new()
            .on("SYSTEM_STATUS_INFO", status())
            .on("123456/TESTUSER/JOB1", job_row("2048"));
        let mut c = collector(
            client,
            As400Config::new("ibmi", DSN).with_active_job("123456/TESTUSER/JOB1"),
        );
        c.init().await.unwrap();

        let samples = c.collect().await.unwrap();
        assert_eq!(samples[&format!("{P}temporary_storage")], 2);
        assert_eq!(samples[&format!("{P}cpu_percentage")], 25_500);
        assert_eq!(samples[&format!("{P}threads")], 8);
        assert_eq!(samples[&format!("{P}disk_io")], 500);
        assert!(c.charts().undeclared(&samples).is_empty());
        let chart = c.charts().get(&format!("{P}threads")).unwrap();
        assert!(chart.labels.iter().any(|(k, v)| k == "subsystem" && v == "QBATCH"));
    }

    #[tokio::test]
    async fn test_active_jobs_disabled() {
        let client = ScriptedClient::new().on("SYSTEM_STATUS_INFO", status());
        let mut config = As400Config::new("ibmi", DSN).with_active_job("123456/TESTUSER/JOB1");
        config.collect_active_jobs = false;
        let mut c = collector(client, config);
        c.init().await.unwrap();

        let samples = c.gather().await.unwrap();
        assert!(!samples.keys().any(|k| k.starts_with("active_job_")));
    }

    #[tokio::test]
    async fn test_job_not_found_is_not_an_error() {
        let client = ScriptedClient::new()
            .on("SYSTEM_STATUS_INFO", status())
            .on("123456/TESTUSER/JOB1", vec![]);
        let mut c = collector(
            client,
            As400Config::new("ibmi", DSN).with_active_job("123456/TESTUSER/JOB1"),
        );
        c.init().await.unwrap();

        let samples = c.gather().await.unwrap();
        assert_eq!(samples["total_jobs"], 1520);
        assert!(!c.charts().contains(&format!("{P}threads")));
    }

    #[tokio::test]
    async fn test_job_query_error() {
        let client = ScriptedClient::new()
            .on("SYSTEM_STATUS_INFO", status())
            .on("111111/USER1/JOB1", job_row("1024"))
            .fail("222222/USER2/JOB2", "network timeout");
        let mut c = collector(
            client,
            As400Config::new("ibmi", DSN)
                .with_active_job("111111/USER1/JOB1")
                .with_active_job("222222/USER2/JOB2"),
        );
        c.init().await.unwrap();

        let err = c.gather().await.unwrap_err();
        assert!(err.to_string().contains("active job"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_ended_job_goes_obsolete() {
        let client = ScriptedClient::new()
            .on("SYSTEM_STATUS_INFO", status())
            .on("123456/TESTUSER/JOB1", job_row("2048"));
        let mut c = collector(
            client,
            As400Config::new("ibmi", DSN).with_active_job("123456/TESTUSER/JOB1"),
        );
        c.init().await.unwrap();
        c.collect().await.unwrap();
        c.charts_mut().take_pending();

        c.client = Some(Arc::new(
            ScriptedClient::new()
                .on("SYSTEM_STATUS_INFO", status())
                .on("123456/TESTUSER/JOB1", vec![]),
        ));
        c.collect().await.unwrap();
        let pending = c.charts_mut().take_pending();
        assert_eq!(pending.len(), 7);
        assert!(pending.iter().all(|chart| chart.is_obsolete()));
    }
}

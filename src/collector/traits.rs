//! Core collector traits and types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::charts::{ChartError, Charts, Samples};
use crate::exec::ExecError;

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default collection interval (10 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default probe timeout (5 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during collection.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Configuration is invalid. Fatal to the job.
    #[error("config error: {0}")]
    Config(String),

    /// The probe target (binary, file, endpoint) is not available.
    #[error("probe unavailable: {0}")]
    ProbeUnavailable(String),

    /// The probe did not finish before its deadline.
    #[error("probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    /// The probe ran but reported failure.
    #[error("probe failed (code {code:?}): {message}")]
    ProbeFailed { code: Option<i32>, message: String },

    /// The probe output could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The target rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A temporary condition; the next cycle may succeed.
    #[error("transient error: {0}")]
    Transient(String),

    /// Chart registry misuse. Fatal to the job.
    #[error("chart error: {0}")]
    Chart(#[from] ChartError),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// A cycle completed without producing any sample.
    #[error("no samples collected")]
    NoData,
}

impl CollectorError {
    /// Whether the error disables the job rather than emptying one cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Chart(_))
    }
}

impl From<ExecError> for CollectorError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::NotFound(path) => Self::ProbeUnavailable(format!("'{path}' not found")),
            ExecError::Timeout { timeout, .. } => Self::ProbeTimeout(timeout),
            ExecError::Failed {
                exit_code, stderr, ..
            } => Self::ProbeFailed {
                code: exit_code,
                message: stderr,
            },
            ExecError::Io { command, source } => {
                Self::ProbeUnavailable(format!("'{command}': {source}"))
            }
        }
    }
}

/// Schedule for collector execution.
///
/// Supports both fixed interval and cron-based scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between collections.
    ///
    /// Interval is clamped to a minimum of 1 second.
    Interval(Duration),

    /// Cron expression for scheduled execution.
    ///
    /// Uses standard cron syntax: `sec min hour day month weekday` (6-field).
    /// Example: `"0 */5 * * * *"` = every 5 minutes at second 0
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, CollectorError> {
        use std::str::FromStr;

        let expr = expr.as_ref();
        cron::Schedule::from_str(expr)
            .map_err(|e| CollectorError::Config(format!("invalid cron expression: {e}")))?;

        Ok(Self::Cron(expr.to_string()))
    }

    /// Seconds between runs as reported to the consumer. Cron schedules report 1.
    pub fn update_every(&self) -> u64 {
        match self {
            Self::Interval(d) => d.as_secs().max(1),
            Self::Cron(_) => 1,
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {:?}", d),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

/// Configuration trait for collectors.
pub trait CollectorConfig: Send + Sync + 'static {
    /// Unique identifier for this job.
    fn name(&self) -> &str;

    /// Execution schedule (interval or cron).
    fn schedule(&self) -> Schedule;

    /// Timeout for each probe operation.
    fn timeout(&self) -> Duration;
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Options shared by every job, flattened into each module's config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Unique job name.
    pub name: String,
    /// Enable this job (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Collection interval (mutually exclusive with cron).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Cron schedule expression (mutually exclusive with interval).
    #[serde(default)]
    pub cron: Option<String>,
    /// Probe timeout (default: 5s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl JobOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            interval: Some(DEFAULT_INTERVAL),
            cron: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Get schedule from interval or cron.
    pub fn schedule(&self) -> Schedule {
        if let Some(ref cron_expr) = self.cron {
            Schedule::Cron(cron_expr.clone())
        } else {
            Schedule::interval(self.interval.unwrap_or(DEFAULT_INTERVAL))
        }
    }

    /// Validate fields common to every module.
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.name.trim().is_empty() {
            return Err(CollectorError::Config("job name cannot be empty".into()));
        }
        if self.interval.is_some() && self.cron.is_some() {
            return Err(CollectorError::Config(
                "cannot specify both interval and cron".into(),
            ));
        }
        if let Some(ref expr) = self.cron {
            Schedule::cron(expr)?;
        }
        if self.timeout.is_zero() {
            return Err(CollectorError::Config("timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Builder methods shared by every module config.
macro_rules! job_builders {
    ($config:ty) => {
        impl $config {
            /// Set the collection interval.
            pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
                self.job.interval = Some(interval);
                self.job.cron = None;
                self
            }

            /// Set the cron schedule.
            pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
                self.job.cron = Some(cron.into());
                self.job.interval = None;
                self
            }

            /// Set the probe timeout.
            pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
                self.job.timeout = timeout;
                self
            }

            /// Set enabled.
            pub fn with_enabled(mut self, enabled: bool) -> Self {
                self.job.enabled = enabled;
                self
            }
        }

        impl $crate::collector::CollectorConfig for $config {
            fn name(&self) -> &str {
                &self.job.name
            }

            fn schedule(&self) -> $crate::collector::Schedule {
                self.job.schedule()
            }

            fn timeout(&self) -> std::time::Duration {
                self.job.timeout
            }
        }
    };
}
pub(crate) use job_builders;

/// Core collector trait.
///
/// A collector owns its probe (executor, HTTP client, SQL client) and its
/// chart set. The registry drives it through `init`, `check`, repeated
/// `collect` and finally `cleanup`; calls on one instance never overlap.
///
/// Implementors write [`Collector::gather`]. The provided
/// [`Collector::collect`] wraps it so that a failing cycle yields an empty
/// sample set unless the error is fatal.
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Associated configuration type.
    type Config: CollectorConfig;

    /// Module name (e.g. `"hpssa"`).
    fn module(&self) -> &'static str;

    /// Get the collector's configuration.
    fn config(&self) -> &Self::Config;

    /// Charts declared so far.
    fn charts(&self) -> &Charts;

    /// Mutable access for the registry to drain announcements.
    fn charts_mut(&mut self) -> &mut Charts;

    /// Validate configuration and prepare probes.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` on invalid configuration, or
    /// `ProbeUnavailable` if a required executable is missing.
    async fn init(&mut self) -> Result<(), CollectorError>;

    /// Probe, parse and translate one cycle, propagating every error.
    async fn gather(&mut self) -> Result<Samples, CollectorError>;

    /// Release handles. Must be idempotent.
    async fn cleanup(&mut self) {}

    /// Job name.
    fn name(&self) -> &str {
        self.config().name()
    }

    /// Run one cycle and succeed only if it produced samples.
    async fn check(&mut self) -> Result<(), CollectorError> {
        let samples = self.gather().await?;
        if samples.is_empty() {
            return Err(CollectorError::NoData);
        }
        Ok(())
    }

    /// Run one cycle.
    ///
    /// Non-fatal errors are logged at debug level and produce an empty
    /// sample set.
    async fn collect(&mut self) -> Result<Samples, CollectorError> {
        match self.gather().await {
            Ok(samples) => Ok(samples),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::debug!(
                    module = self.module(),
                    job = %self.name(),
                    error = %e,
                    "Collection cycle failed"
                );
                Ok(Samples::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_interval_minimum() {
        let schedule = Schedule::interval(Duration::from_millis(100));
        match schedule {
            Schedule::Interval(d) => assert_eq!(d, MIN_INTERVAL),
            _ => panic!("expected Interval"),
        }
    }

    #[test]
    fn test_schedule_interval_valid() {
        let schedule = Schedule::interval(Duration::from_secs(30));
        assert_eq!(schedule, Schedule::Interval(Duration::from_secs(30)));
        assert_eq!(schedule.update_every(), 30);
    }

    #[test]
    fn test_schedule_cron_valid() {
        let schedule = Schedule::cron("0 */5 * * * *").unwrap();
        match schedule {
            Schedule::Cron(expr) => assert_eq!(expr, "0 */5 * * * *"),
            _ => panic!("expected Cron"),
        }
    }

    #[test]
    fn test_schedule_cron_invalid() {
        let result = Schedule::cron("not a cron");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("invalid cron"));
    }

    #[test]
    fn test_job_options_validate() {
        assert!(JobOptions::new("ok").validate().is_ok());
        assert!(JobOptions::new("  ").validate().is_err());

        let mut job = JobOptions::new("both");
        job.cron = Some("0 * * * * *".into());
        assert!(job.validate().unwrap_err().to_string().contains("both"));

        job.interval = None;
        assert!(job.validate().is_ok());
        assert!(matches!(job.schedule(), Schedule::Cron(_)));

        let mut job = JobOptions::new("zero");
        job.timeout = Duration::ZERO;
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_job_options_yaml_defaults() {
        let job: JobOptions = serde_yaml::from_str("name: local\ninterval: 30s\n").unwrap();
        assert!(job.enabled);
        assert_eq!(job.interval, Some(Duration::from_secs(30)));
        assert_eq!(job.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_error_classification() {
        assert!(CollectorError::Config("x".into()).is_fatal());
        assert!(CollectorError::Chart(ChartError::DuplicateChart("c".into())).is_fatal());
        assert!(!CollectorError::Parse("x".into()).is_fatal());
        assert!(!CollectorError::Auth("x".into()).is_fatal());
        assert!(!CollectorError::ProbeTimeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn test_exec_error_conversion() {
        let err: CollectorError = ExecError::NotFound("ssacli".into()).into();
        assert!(matches!(err, CollectorError::ProbeUnavailable(_)));

        let err: CollectorError = ExecError::Timeout {
            command: "smartctl".into(),
            timeout: Duration::from_secs(2),
        }
        .into();
        assert!(matches!(err, CollectorError::ProbeTimeout(_)));

        let err: CollectorError = ExecError::Failed {
            command: "storcli".into(),
            exit_code: Some(1),
            stderr: "denied".into(),
            stdout: Vec::new(),
        }
        .into();
        assert!(matches!(err, CollectorError::ProbeFailed { code: Some(1), .. }));
    }

    struct Flaky {
        config: JobOptions,
        charts: Charts,
        outcome: fn() -> Result<Samples, CollectorError>,
    }

    impl CollectorConfig for JobOptions {
        fn name(&self) -> &str {
            &self.name
        }

        fn schedule(&self) -> Schedule {
            JobOptions::schedule(self)
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }
    }

    #[async_trait::async_trait]
    impl Collector for Flaky {
        type Config = JobOptions;

        fn module(&self) -> &'static str {
            "flaky"
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
            Ok(())
        }

        async fn gather(&mut self) -> Result<Samples, CollectorError> {
            (self.outcome)()
        }
    }

    fn flaky(outcome: fn() -> Result<Samples, CollectorError>) -> Flaky {
        Flaky {
            config: JobOptions::new("flaky"),
            charts: Charts::new(),
            outcome,
        }
    }

    #[tokio::test]
    async fn test_collect_downgrades_cycle_errors() {
        let mut c = flaky(|| Err(CollectorError::Transient("later".into())));
        assert!(c.collect().await.unwrap().is_empty());
        assert!(c.check().await.is_err());

        let mut c = flaky(|| Err(CollectorError::Config("bad".into())));
        assert!(c.collect().await.is_err());
    }

    #[tokio::test]
    async fn test_check_requires_samples() {
        let mut c = flaky(|| Ok(Samples::new()));
        assert!(matches!(c.check().await, Err(CollectorError::NoData)));

        let mut c = flaky(|| Ok(Samples::from([("x".to_string(), 1)])));
        assert!(c.check().await.is_ok());
        assert_eq!(c.name(), "flaky");
    }
}

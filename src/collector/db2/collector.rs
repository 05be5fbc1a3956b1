//! DB2 LUW collector.
//!
//! Like the IBM i collector this one needs a host-supplied [`SqlClient`]
//! (DB2 CLI bridge). Each cycle reads `MON_GET_DATABASE` counters and
//! connection states; tablespace usage follows unless disabled. A failing
//! tablespace query is logged and skipped.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::charts::{Charts, PrefixTracker, Samples, scaled};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::dbdriver::{Dsn, SqlClient, query_rows};

use super::charts::{database_charts, tablespace_charts, tablespace_prefix};
use super::parse::{
    ConnectionCounts, QUERY_CONNECTIONS, QUERY_DATABASE, QUERY_TABLESPACES, Tablespace,
    database_counters,
};

fn default_true() -> bool {
    true
}

/// Configuration for the DB2 collector.
#[derive(Clone, Serialize, Deserialize)]
pub struct Db2Config {
    #[serde(flatten)]
    pub job: JobOptions,
    /// `DATABASE=SAMPLE;HOSTNAME=db;PORT=50000;UID=user;PWD=secret`.
    #[serde(default)]
    pub dsn: String,
    #[serde(default = "default_true")]
    pub collect_tablespaces: bool,
    /// Regex over tablespace names. Empty matches every tablespace.
    #[serde(default)]
    pub tablespace_selector: String,
}

impl std::fmt::Debug for Db2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db2Config")
            .field("job", &self.job)
            .field("collect_tablespaces", &self.collect_tablespaces)
            .field("tablespace_selector", &self.tablespace_selector)
            .finish_non_exhaustive()
    }
}

impl Db2Config {
    pub fn new(name: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
            dsn: dsn.into(),
            collect_tablespaces: true,
            tablespace_selector: String::new(),
        }
    }

    pub fn with_tablespace_selector(mut self, selector: impl Into<String>) -> Self {
        self.tablespace_selector = selector.into();
        self
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()?;
        let dsn = Dsn::from_str(&crate::config::expand_env_vars(&self.dsn))
            .map_err(|e| CollectorError::Config(format!("dsn: {e}")))?;
        if dsn.database().is_none_or(|db| db.trim().is_empty()) {
            return Err(CollectorError::Config("dsn must name a DATABASE".into()));
        }
        self.selector().map(|_| ())
    }

    pub fn selector(&self) -> Result<Option<Regex>, CollectorError> {
        if self.tablespace_selector.trim().is_empty() {
            return Ok(None);
        }
        Regex::new(self.tablespace_selector.trim())
            .map(Some)
            .map_err(|e| CollectorError::Config(format!("invalid tablespace_selector: {e}")))
    }
}

job_builders!(Db2Config);

/// DB2 collector.
pub struct Db2Collector {
    config: Db2Config,
    charts: Charts,
    client: Option<Arc<dyn SqlClient>>,
    selector: Option<Regex>,
    tablespaces: PrefixTracker,
}

impl Db2Collector {
    pub fn new(config: Db2Config) -> Self {
        Self {
            config,
            charts: Charts::new(),
            client: None,
            selector: None,
            tablespaces: PrefixTracker::new(),
        }
    }

    /// Supply the SQL client. Required before `init`.
    pub fn with_client(mut self, client: Arc<dyn SqlClient>) -> Self {
        self.client = Some(client);
        self
    }

    async fn collect_tablespaces(
        &mut self,
        client: &dyn SqlClient,
        samples: &mut Samples,
    ) -> Result<(), CollectorError> {
        let rows = query_rows(client, QUERY_TABLESPACES).await?;
        let selector = self.selector.as_ref();
        let spaces: Vec<Tablespace> = rows
            .iter()
            .filter_map(Tablespace::from_row)
            .filter(|ts| selector.is_none_or(|re| re.is_match(&ts.name)))
            .collect();

        let current: HashMap<String, String> = spaces
            .iter()
            .map(|ts| (ts.name.clone(), tablespace_prefix(&ts.name)))
            .collect();
        let appeared = self.tablespaces.sync(&mut self.charts, current);
        for ts in spaces.iter().filter(|ts| appeared.contains(&ts.name)) {
            self.charts.add_all(tablespace_charts(ts))?;
        }

        for ts in &spaces {
            let p = tablespace_prefix(&ts.name);
            let normal = i64::from(ts.is_normal());
            samples.insert(format!("{p}utilization"), scaled(ts.utilization()));
            samples.insert(format!("{p}used_bytes"), ts.used_bytes());
            samples.insert(format!("{p}free_bytes"), ts.free_bytes());
            samples.insert(format!("{p}state_normal"), normal);
            samples.insert(format!("{p}state_abnormal"), 1 - normal);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Db2Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db2Collector")
            .field("config", &self.config)
            .field("has_client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for Db2Collector {
    type Config = Db2Config;

    fn module(&self) -> &'static str {
        "db2"
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
                "no DB2 SQL driver available; supply a client".into(),
            ));
        }
        self.selector = self.config.selector()?;
        self.charts = Charts::new();
        self.charts.add_all(database_charts())?;
        self.tablespaces = PrefixTracker::new();
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let Some(client) = self.client.clone() else {
            return Err(CollectorError::Transient("collector not initialized".into()));
        };

        let mut samples = Samples::new();
        let rows = query_rows(client.as_ref(), QUERY_DATABASE).await?;
        for (key, value) in database_counters(&rows) {
            samples.insert(key.to_string(), value);
        }

        let rows = query_rows(client.as_ref(), QUERY_CONNECTIONS).await?;
        let conns = ConnectionCounts::from_rows(&rows);
        samples.insert("connections_total".into(), conns.total);
        samples.insert("connections_executing".into(), conns.executing);
        samples.insert("connections_idle".into(), conns.idle);
        samples.insert("connections_other".into(), conns.other);

        if self.config.collect_tablespaces
            && let Err(e) = self.collect_tablespaces(client.as_ref(), &mut samples).await
        {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::debug!(job = %self.config.job.name, error = %e, "Tablespace query failed");
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

    const DSN: &str = "DATABASE=SAMPLE;HOSTNAME=db2.local;PORT=50000;UID=db2inst1;PWD=secret";

    type Rows = Vec<Vec<(&'static str, Option<&'static str>)>>;

    fn database() -> Rows {
        vec![vec![
            ("LOCK_WAITS", Some("5")),
            ("DEADLOCKS", Some("1")),
            ("TOTAL_APP_COMMITS", Some("1200")),
            ("LOGICAL_READS", Some("90000")),
            ("PHYSICAL_READS", Some("1500")),
        ]]
    }

    fn connections() -> Rows {
        vec![
            vec![("APPL_STATUS", Some("UOWEXEC")), ("CONNECTIONS", Some("2"))],
            vec![("APPL_STATUS", Some("UOWWAIT")), ("CONNECTIONS", Some("8"))],
        ]
    }

    fn tablespace(name: &'static str, state: &'static str) -> Vec<(&'static str, Option<&'static str>)> {
        vec![
            ("TBSP_NAME", Some(name)),
            ("TBSP_TYPE", Some("DMS")),
            ("TBSP_STATE", Some(state)),
            ("TBSP_PAGE_SIZE", Some("4096")),
            ("TBSP_USABLE_PAGES", Some("1000")),
            ("TBSP_USED_PAGES", Some("250")),
            ("TBSP_FREE_PAGES", Some("750")),
        ]
    }

    fn scripted(spaces: Rows) -> ScriptedClient {
        ScriptedClient::new()
            .on("MON_GET_DATABASE", database())
            .on("SNAPAPPL_INFO", connections())
            .on("MON_GET_TABLESPACE", spaces)
    }

    fn collector(client: ScriptedClient, config: Db2Config) -> Db2Collector {
        Db2Collector::new(config).with_client(Arc::new(client))
    }

    #[test]
    fn test_config() {
        let yaml = "\
name: sample
dsn: DATABASE=SAMPLE;HOSTNAME=db2.local;UID=db2inst1;PWD=secret
tablespace_selector: ^USER
";
        let config: Db2Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.collect_tablespaces);
        assert!(config.validate().is_ok());
        assert!(!format!("{config:?}").contains("secret"));

        assert!(Db2Config::new("x", "HOSTNAME=db2.local").validate().is_err());
        assert!(Db2Config::new("x", "DATABASE=").validate().is_err());
        assert!(Db2Config::new("x", "garbage").validate().is_err());
        assert!(
            Db2Config::new("x", DSN)
                .with_tablespace_selector("[")
                .validate()
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_init_requires_client() {
        let mut c = Db2Collector::new(Db2Config::new("db2", DSN));
        let err = c.init().await.unwrap_err();
        assert!(matches!(err, CollectorError::ProbeUnavailable(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_collect() {
        let client = scripted(vec![
            tablespace("USERSPACE1", "NORMAL"),
            tablespace("SYSCATSPACE", "Backup Pending"),
        ]);
        let mut c = collector(client, Db2Config::new("db2", DSN));
        c.init().await.unwrap();

        let samples = c.collect().await.unwrap();
        assert_eq!(samples["commits"], 1200);
        assert_eq!(samples["deadlocks"], 1);
        assert_eq!(samples["connections_total"], 10);
        assert_eq!(samples["connections_idle"], 8);
        assert_eq!(samples["tablespace_userspace1_utilization"], 25_000);
        assert_eq!(samples["tablespace_userspace1_used_bytes"], 250 * 4096);
        assert_eq!(samples["tablespace_userspace1_state_normal"], 1);
        assert_eq!(samples["tablespace_syscatspace_state_abnormal"], 1);
        assert!(!samples.contains_key("rows_read"));
        assert!(c.charts().contains("tablespace_syscatspace_usage"));
        assert!(c.charts().undeclared(&samples).is_empty());
    }

    #[tokio::test]
    async fn test_tablespace_selector_and_disable() {
        let client = scripted(vec![
            tablespace("USERSPACE1", "NORMAL"),
            tablespace("SYSCATSPACE", "NORMAL"),
        ]);
        let mut c = collector(
            client,
            Db2Config::new("db2", DSN).with_tablespace_selector("^USER"),
        );
        c.init().await.unwrap();
        let samples = c.gather().await.unwrap();
        assert!(samples.contains_key("tablespace_userspace1_used_bytes"));
        assert!(!samples.contains_key("tablespace_syscatspace_used_bytes"));

        let mut config = Db2Config::new("db2", DSN);
        config.collect_tablespaces = false;
        let client = ScriptedClient::new()
            .on("MON_GET_DATABASE", database())
            .on("SNAPAPPL_INFO", connections());
        let mut c = collector(client, config);
        c.init().await.unwrap();
        let samples = c.gather().await.unwrap();
        assert!(!samples.keys().any(|k| k.starts_with("tablespace_")));
    }

    #[tokio::test]
    async fn test_tablespace_failure_keeps_cycle() {
        let client = ScriptedClient::new()
            .on("MON_GET_DATABASE", database())
            .on("SNAPAPPL_INFO", connections())
            .fail("MON_GET_TABLESPACE", "SQL0551N not authorized");
        let mut c = collector(client, Db2Config::new("db2", DSN));
        c.init().await.unwrap();

        let samples = c.gather().await.unwrap();
        assert_eq!(samples["lock_waits"], 5);
    }

    #[tokio::test]
    async fn test_database_failure_empties_cycle() {
        let client = ScriptedClient::new().fail("MON_GET_DATABASE", "SQL30081N communication error");
        let mut c = collector(client, Db2Config::new("db2", DSN));
        c.init().await.unwrap();

        assert!(matches!(
            c.gather().await,
            Err(CollectorError::ProbeFailed { .. })
        ));
        assert!(c.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_tablespace_becomes_obsolete() {
        let mut c = collector(
            scripted(vec![
                tablespace("USERSPACE1", "NORMAL"),
                tablespace("TS_OLD", "NORMAL"),
            ]),
            Db2Config::new("db2", DSN),
        );
        c.init().await.unwrap();
        c.collect().await.unwrap();
        c.charts_mut().take_pending();

        c.client = Some(Arc::new(scripted(vec![tablespace("USERSPACE1", "NORMAL")])));
        c.collect().await.unwrap();
        let pending = c.charts_mut().take_pending();
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|chart| chart.id.starts_with("tablespace_ts_old_")));
    }

    #[tokio::test]
    async fn test_cleanup_closes_client() {
        let client = Arc::new(scripted(vec![]));
        let mut c = Db2Collector::new(Db2Config::new("db2", DSN)).with_client(client.clone());
        c.init().await.unwrap();
        c.cleanup().await;
        c.cleanup().await;
        assert!(*client.closed.lock().unwrap());
    }
}

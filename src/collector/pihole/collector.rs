//! Pi-hole collector over the v6 REST API.
//!
//! Logs in with `POST /api/auth`, keeps the session id and sends it as
//! `X-FTL-SID` with every summary request. A 401 drops the session so the
//! next cycle logs in again. `cleanup` deletes the session.

use std::io::ErrorKind;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::charts::{Chart, ChartKind, Charts, Dim, PRECISION, Samples, scaled};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::config::expand_env_vars;
use crate::web::{WebClient, join_url};

use super::parse::{
    PasswordFile, QUERY_TYPES, Session, SessionError, Summary, parse_session, password_file,
};

/// Default web interface address.
pub const DEFAULT_URL: &str = "http://127.0.0.1";

/// Default location of the CLI password FTL writes for local API clients.
pub const DEFAULT_PASSWORD_FILE: &str = "/etc/pihole/cli_pw";

const SID_HEADER: &str = "X-FTL-SID";
const AUTH_PATH: &str = "api/auth";
const SUMMARY_PATH: &str = "api/stats/summary";

const PRIO: u32 = 5000;

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_config_path() -> String {
    DEFAULT_PASSWORD_FILE.to_string()
}

/// Configuration for the Pi-hole collector.
#[derive(Clone, Serialize, Deserialize)]
pub struct PiholeConfig {
    #[serde(flatten)]
    pub job: JobOptions,
    #[serde(default = "default_url")]
    pub url: String,
    /// Web or app password. Supports `${VAR}` and `${VAR:-default}`. When
    /// empty the password is read from the file at `config_path`.
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_config_path")]
    pub config_path: String,
}

impl std::fmt::Debug for PiholeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiholeConfig")
            .field("job", &self.job)
            .field("url", &self.url)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("config_path", &self.config_path)
            .finish()
    }
}

impl PiholeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
            url: default_url(),
            password: String::new(),
            config_path: default_config_path(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()?;
        if self.url.trim().is_empty() {
            return Err(CollectorError::Config("url cannot be empty".into()));
        }
        join_url(&self.url, AUTH_PATH)?;
        Ok(())
    }

    /// Password from config, else from the password file, else empty.
    async fn resolve_password(&self) -> Result<String, CollectorError> {
        let expanded = expand_env_vars(&self.password);
        if !expanded.is_empty() {
            return Ok(expanded);
        }
        if self.config_path.trim().is_empty() {
            return Ok(String::new());
        }

        match tokio::fs::read_to_string(self.config_path.trim()).await {
            Ok(content) => match password_file(&content) {
                PasswordFile::Password(password) => Ok(password),
                PasswordFile::LegacySetupVars => {
                    tracing::warn!(
                        job = %self.job.name,
                        path = %self.config_path,
                        "File holds a v5 password hash the v6 API does not accept, set `password` instead"
                    );
                    Ok(String::new())
                }
                PasswordFile::Empty => Ok(String::new()),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(job = %self.job.name, path = %self.config_path, "Password file not found, logging in without password");
                Ok(String::new())
            }
            Err(e) => Err(CollectorError::Config(format!(
                "failed to read '{}': {e}",
                self.config_path
            ))),
        }
    }
}

job_builders!(PiholeConfig);

fn summary_charts() -> Vec<Chart> {
    let mut types = Chart::new(
        "dns_queries_types",
        "Queries by type",
        "queries",
        "query types",
        "pihole.dns_queries_types",
    )
    .with_kind(ChartKind::Stacked)
    .with_priority(PRIO + 7);
    for t in QUERY_TYPES {
        types = types.with_dim(Dim::new(format!("query_type_{t}"), *t));
    }

    vec![
        Chart::new(
            "dns_queries_total",
            "Total queries",
            "queries",
            "queries",
            "pihole.dns_queries_total",
        )
        .with_priority(PRIO)
        .with_dim(Dim::new("queries_total", "queries")),
        Chart::new(
            "dns_queries",
            "Queries by outcome",
            "queries",
            "queries",
            "pihole.dns_queries",
        )
        .with_kind(ChartKind::Stacked)
        .with_priority(PRIO + 1)
        .with_dim(Dim::new("queries_cached", "cached"))
        .with_dim(Dim::new("queries_blocked", "blocked"))
        .with_dim(Dim::new("queries_forwarded", "forwarded")),
        Chart::new(
            "dns_queries_percentage",
            "Blocked queries",
            "percentage",
            "queries",
            "pihole.dns_queries_percentage",
        )
        .with_kind(ChartKind::Area)
        .with_priority(PRIO + 2)
        .with_dim(Dim::new("percent_blocked", "blocked").with_divisor(PRECISION)),
        Chart::new(
            "unique_domains",
            "Unique domains",
            "domains",
            "queries",
            "pihole.unique_domains",
        )
        .with_priority(PRIO + 3)
        .with_dim(Dim::new("unique_domains", "domains")),
        Chart::new("clients", "Clients", "clients", "clients", "pihole.clients")
            .with_priority(PRIO + 4)
            .with_dim(Dim::new("clients_active", "active"))
            .with_dim(Dim::new("clients_total", "total")),
        Chart::new(
            "blocklist_domains",
            "Domains on blocklist",
            "domains",
            "blocklist",
            "pihole.blocklist_domains",
        )
        .with_priority(PRIO + 5)
        .with_dim(Dim::new("domains_being_blocked", "blocklist")),
        Chart::new(
            "blocklist_last_update",
            "Time since gravity update",
            "seconds",
            "blocklist",
            "pihole.blocklist_last_update",
        )
        .with_priority(PRIO + 6)
        .with_dim(Dim::new("gravity_last_update_seconds_ago", "ago")),
        types,
    ]
}

fn summary_samples(summary: &Summary, now: i64) -> Samples {
    let mut samples = Samples::new();
    let q = &summary.queries;
    let counts = [
        ("queries_total", q.total),
        ("queries_blocked", q.blocked),
        ("queries_forwarded", q.forwarded),
        ("queries_cached", q.cached),
        ("unique_domains", q.unique_domains),
        ("clients_active", summary.clients.active),
        ("clients_total", summary.clients.total),
        ("domains_being_blocked", summary.gravity.domains_being_blocked),
    ];
    for (key, value) in counts {
        if let Some(v) = value {
            samples.insert(key.to_string(), v);
        }
    }
    if let Some(pct) = q.percent_blocked {
        samples.insert("percent_blocked".into(), scaled(pct));
    }
    if let Some(ts) = summary.gravity.last_update.filter(|ts| *ts > 0) {
        samples.insert("gravity_last_update_seconds_ago".into(), (now - ts).max(0));
    }

    if !q.types.is_empty() {
        for t in QUERY_TYPES {
            samples.insert(format!("query_type_{t}"), 0);
        }
        for (t, count) in summary.query_types() {
            samples.insert(format!("query_type_{t}"), count);
        }
    }
    samples
}

/// Pi-hole collector.
pub struct PiholeCollector {
    config: PiholeConfig,
    charts: Charts,
    client: Option<WebClient>,
    password: String,
    session: Option<Session>,
}

impl PiholeCollector {
    pub fn new(config: PiholeConfig) -> Self {
        Self {
            config,
            charts: Charts::new(),
            client: None,
            password: String::new(),
            session: None,
        }
    }

    async fn login(&self, client: &WebClient) -> Result<Session, CollectorError> {
        let url = join_url(&self.config.url, AUTH_PATH)?;
        let request = client
            .inner()
            .post(url)
            .json(&json!({ "password": self.password }));
        let body = client.fetch(request).await?;

        parse_session(&body).map_err(|e| match e {
            SessionError::Missing => CollectorError::Config(format!(
                "{e}; check the url points at a Pi-hole v6 web interface"
            )),
            SessionError::Rejected(_) => CollectorError::Auth(e.to_string()),
            SessionError::Malformed(_) => CollectorError::Transient(e.to_string()),
        })
    }

    async fn summary(&self, client: &WebClient, session: &Session) -> Result<Summary, CollectorError> {
        let url = join_url(&self.config.url, SUMMARY_PATH)?;
        let mut request = client.inner().get(url);
        if let Some(ref sid) = session.sid {
            request = request.header(SID_HEADER, sid);
        }
        Ok(client.send_json(request).await?)
    }

    async fn logout(&self, client: &WebClient, sid: &str) {
        let url = match join_url(&self.config.url, AUTH_PATH) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(job = %self.config.job.name, error = %e, "Cannot build logout url");
                return;
            }
        };
        let request = client.inner().delete(url).header(SID_HEADER, sid);
        if let Err(e) = client.send(request).await {
            tracing::debug!(job = %self.config.job.name, error = %e, "Logout failed");
        }
    }
}

impl std::fmt::Debug for PiholeCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiholeCollector")
            .field("config", &self.config)
            .field("logged_in", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for PiholeCollector {
    type Config = PiholeConfig;

    fn module(&self) -> &'static str {
        "pihole"
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
        self.password = self.config.resolve_password().await?;
        self.client = Some(WebClient::new(self.config.job.timeout)?);
        self.session = None;
        self.charts = Charts::new();
        self.charts.add_all(summary_charts())?;
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let Some(client) = self.client.clone() else {
            return Err(CollectorError::Transient("collector not initialized".into()));
        };

        let session = match self.session.clone() {
            Some(session) => session,
            None => {
                let session = self.login(&client).await?;
                tracing::debug!(job = %self.config.job.name, with_sid = session.sid.is_some(), "Logged in");
                self.session = Some(session.clone());
                session
            }
        };

        let summary = match self.summary(&client, &session).await {
            Ok(summary) => summary,
            Err(e @ CollectorError::Auth(_)) => {
                self.session = None;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let mut samples = summary_samples(&summary, chrono::Utc::now().timestamp());
        samples.retain(|k, _| self.charts.declares(k));
        Ok(samples)
    }

    async fn cleanup(&mut self) {
        if let (Some(client), Some(session)) = (self.client.take(), self.session.take())
            && let Some(sid) = session.sid
        {
            self.logout(&client, &sid).await;
        }
    }
}

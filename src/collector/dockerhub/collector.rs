//! Docker Hub repository collector.
//!
//! Fetches every configured repository concurrently, one request each, and
//! reports pull and star counts, status and time since the last push. A
//! repository that fails is skipped for the cycle; the cycle fails only when
//! every repository does.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::charts::{Chart, ChartKind, Charts, Dim, Samples, clean_id};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::web::{WebClient, join_url};

use super::parse::RepositoryInfo;

/// Default API endpoint for repository lookups.
pub const DEFAULT_URL: &str = "https://hub.docker.com/v2/repositories";

const PRIO: u32 = 4000;

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

/// Configuration for the Docker Hub collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerhubConfig {
    #[serde(flatten)]
    pub job: JobOptions,
    /// Repository API base URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Repositories as `namespace/name` (`library/nginx`).
    #[serde(default)]
    pub repositories: Vec<String>,
}

impl DockerhubConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
            url: default_url(),
            repositories: Vec::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_repository(mut self, repo: impl Into<String>) -> Self {
        self.repositories.push(repo.into());
        self
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()?;
        if self.url.trim().is_empty() {
            return Err(CollectorError::Config("url cannot be empty".into()));
        }
        if self.repositories.is_empty() {
            return Err(CollectorError::Config(
                "at least one repository is required".into(),
            ));
        }

        let mut ids = HashSet::new();
        for repo in &self.repositories {
            if repo.trim().is_empty() {
                return Err(CollectorError::Config(
                    "repository name cannot be empty".into(),
                ));
            }
            if !ids.insert(clean_id(repo.trim())) {
                return Err(CollectorError::Config(format!(
                    "duplicate repository '{repo}'"
                )));
            }
            join_url(&self.url, repo.trim())?;
        }
        Ok(())
    }
}

job_builders!(DockerhubConfig);

fn repo_charts(repos: &[String]) -> Vec<Chart> {
    let mut pulls = Chart::new("pulls", "Pulls", "pulls", "pulls", "dockerhub.pulls")
        .with_kind(ChartKind::Stacked)
        .with_priority(PRIO + 1);
    let mut rate = Chart::new(
        "pulls_rate",
        "Pull rate",
        "pulls/s",
        "pulls",
        "dockerhub.pulls_rate",
    )
    .with_priority(PRIO + 2);
    let mut stars = Chart::new("stars", "Stars", "stars", "stars", "dockerhub.stars")
        .with_kind(ChartKind::Stacked)
        .with_priority(PRIO + 3);
    let mut status = Chart::new("status", "Status", "status", "status", "dockerhub.status")
        .with_priority(PRIO + 4);
    let mut updated = Chart::new(
        "last_updated",
        "Time since last update",
        "seconds",
        "status",
        "dockerhub.last_updated",
    )
    .with_priority(PRIO + 5);

    for repo in repos {
        let id = clean_id(repo);
        let name = repo.as_str();
        pulls = pulls.with_dim(Dim::new(format!("pull_count_{id}"), name));
        rate = rate.with_dim(Dim::new(format!("pull_rate_{id}"), name).incremental());
        stars = stars.with_dim(Dim::new(format!("star_count_{id}"), name));
        status = status.with_dim(Dim::new(format!("status_{id}"), name));
        updated = updated.with_dim(Dim::new(format!("last_updated_{id}"), name));
    }

    vec![
        Chart::new(
            "pulls_sum",
            "Pulls summary",
            "pulls",
            "pulls",
            "dockerhub.pulls_sum",
        )
        .with_priority(PRIO)
        .with_dim(Dim::new("pull_sum", "sum")),
        pulls,
        rate,
        stars,
        status,
        updated,
    ]
}

/// Docker Hub collector.
pub struct DockerhubCollector {
    config: DockerhubConfig,
    charts: Charts,
    client: Option<WebClient>,
    repos: Vec<String>,
}

impl DockerhubCollector {
    pub fn new(config: DockerhubConfig) -> Self {
        Self {
            config,
            charts: Charts::new(),
            client: None,
            repos: Vec::new(),
        }
    }

    fn add_repo_samples(samples: &mut Samples, repo: &str, info: &RepositoryInfo) {
        let id = clean_id(repo);
        if let Some(pulls) = info.pull_count {
            samples.insert(format!("pull_count_{id}"), pulls);
            samples.insert(format!("pull_rate_{id}"), pulls);
            *samples.entry("pull_sum".to_string()).or_default() += pulls;
        }
        if let Some(stars) = info.star_count {
            samples.insert(format!("star_count_{id}"), stars);
        }
        if let Some(status) = info.status {
            samples.insert(format!("status_{id}"), status);
        }
        if let Some(age) = info.seconds_since_update(Utc::now()) {
            samples.insert(format!("last_updated_{id}"), age);
        }
    }
}

impl std::fmt::Debug for DockerhubCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerhubCollector")
            .field("config", &self.config)
            .field("initialized", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for DockerhubCollector {
    type Config = DockerhubConfig;

    fn module(&self) -> &'static str {
        "dockerhub"
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
        self.repos = self
            .config
            .repositories
            .iter()
            .map(|r| r.trim().to_string())
            .collect();
        self.client = Some(WebClient::new(self.config.job.timeout)?);
        self.charts = Charts::new();
        self.charts.add_all(repo_charts(&self.repos))?;
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let Some(client) = self.client.as_ref() else {
            return Err(CollectorError::Transient("collector not initialized".into()));
        };

        let mut tasks = JoinSet::new();
        for repo in &self.repos {
            let url = join_url(&self.config.url, repo)?;
            let client = client.clone();
            let repo = repo.clone();
            tasks.spawn(async move {
                let result = client.get_json::<RepositoryInfo>(&url).await;
                (repo, result)
            });
        }

        let mut samples = Samples::new();
        let mut last_error = None;
        while let Some(joined) = tasks.join_next().await {
            let (repo, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    last_error = Some(CollectorError::Transient(format!("request task failed: {e}")));
                    continue;
                }
            };
            match result {
                Ok(info) => {
                    if !info.has_metrics() {
                        tracing::debug!(job = %self.config.job.name, repository = %repo, "Repository response has no metrics");
                    }
                    Self::add_repo_samples(&mut samples, &repo, &info);
                }
                Err(e) => {
                    tracing::debug!(job = %self.config.job.name, repository = %repo, error = %e, "Repository request failed");
                    last_error = Some(e.into());
                }
            }
        }

        if samples.is_empty()
            && let Some(e) = last_error
        {
            return Err(e);
        }
        Ok(samples)
    }

    async fn cleanup(&mut self) {
        self.client = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;

    use super::*;

    async fn repository(Path((namespace, name)): Path<(String, String)>) -> impl IntoResponse {
        match (namespace.as_str(), name.as_str()) {
            ("library", "nginx") => (
                StatusCode::OK,
                r#"{"name":"nginx","pull_count":1000,"star_count":100,"status":1,
                    "last_updated":"2020-01-01T00:00:00Z"}"#,
            ),
            ("library", "redis") => (StatusCode::OK, r#"{"pull_count":"250","star_count":7}"#),
            ("library", "broken") => (StatusCode::OK, "{invalid json"),
            _ => (StatusCode::NOT_FOUND, r#"{"detail":"Not found"}"#),
        }
    }

    async fn serve() -> String {
        let app = Router::new().route("/v2/repositories/{namespace}/{name}", get(repository));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v2/repositories")
    }

    fn config(url: &str, repos: &[&str]) -> DockerhubConfig {
        repos.iter().fold(
            DockerhubConfig::new("hub")
                .with_url(url)
                .with_timeout(Duration::from_secs(2)),
            |c, r| c.with_repository(*r),
        )
    }

    #[test]
    fn test_config_yaml() {
        let yaml = "\
name: hub
repositories:
  - library/nginx
  - library/redis
";
        let config: DockerhubConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.repositories.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(DockerhubConfig::new("hub").validate().is_err());
        assert!(
            DockerhubConfig::new("hub")
                .with_repository(" ")
                .validate()
                .is_err()
        );
        let dup = DockerhubConfig::new("hub")
            .with_repository("library/nginx")
            .with_repository("library/nginx");
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));

        let bad_url = DockerhubConfig::new("hub")
            .with_url("not a url")
            .with_repository("library/nginx");
        assert!(matches!(bad_url.validate(), Err(CollectorError::Config(_))));
    }

    #[tokio::test]
    async fn test_collect_pull_and_star_counts() {
        let url = serve().await;
        let mut c = DockerhubCollector::new(config(&url, &["library/nginx", "library/redis"]));
        c.init().await.unwrap();

        let samples = c.collect().await.unwrap();
        assert_eq!(samples["pull_count_library_nginx"], 1000);
        assert_eq!(samples["star_count_library_nginx"], 100);
        assert_eq!(samples["pull_rate_library_nginx"], 1000);
        assert_eq!(samples["status_library_nginx"], 1);
        assert!(samples["last_updated_library_nginx"] > 0);
        assert_eq!(samples["pull_count_library_redis"], 250);
        assert_eq!(samples["pull_sum"], 1250);
        assert!(!samples.contains_key("status_library_redis"));
        assert!(c.charts().undeclared(&samples).is_empty());
        assert_eq!(c.charts().len(), 6);
    }

    #[tokio::test]
    async fn test_failed_repository_is_skipped() {
        let url = serve().await;
        let mut c = DockerhubCollector::new(config(
            &url,
            &["library/nginx", "library/missing", "library/broken"],
        ));
        c.init().await.unwrap();

        let samples = c.gather().await.unwrap();
        assert_eq!(samples["pull_sum"], 1000);
        assert!(!samples.contains_key("pull_count_library_missing"));
    }

    #[tokio::test]
    async fn test_all_repositories_failing() {
        let url = serve().await;
        let mut c = DockerhubCollector::new(config(&url, &["library/missing"]));
        c.init().await.unwrap();
        assert!(matches!(
            c.gather().await,
            Err(CollectorError::ProbeFailed { code: Some(404), .. })
        ));
        assert!(c.collect().await.unwrap().is_empty());

        let mut c = DockerhubCollector::new(config(&url, &["library/broken"]));
        c.init().await.unwrap();
        assert!(matches!(c.gather().await, Err(CollectorError::Parse(_))));
    }

    #[tokio::test]
    async fn test_gather_before_init() {
        let mut c = DockerhubCollector::new(DockerhubConfig::new("hub").with_repository("a/b"));
        assert!(matches!(c.gather().await, Err(CollectorError::Transient(_))));
        c.cleanup().await;
        c.cleanup().await;
    }
}

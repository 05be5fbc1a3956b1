//! Lease file collector.
//!
//! Reads the lease file, keeps the last block per address, and reports
//! lease counts by binding state. Configured pools additionally get the
//! number of active leases and their utilization.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::charts::{Chart, ChartKind, Charts, Dim, PRECISION, Samples, clean_id, scaled};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::iprange::{IpRange, parse_ranges};

use super::parse::{BindingState, Lease, parse_leases};

/// Default lease file location.
pub const DEFAULT_LEASES_PATH: &str = "/var/lib/dhcp/dhcpd.leases";

fn default_leases_path() -> String {
    DEFAULT_LEASES_PATH.to_string()
}

/// A named group of address ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    /// Whitespace-separated ranges: `10.0.0.0/24 10.0.1.10-10.0.1.20`.
    pub networks: String,
}

/// Configuration for the lease file collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IscDhcpdConfig {
    #[serde(flatten)]
    pub job: JobOptions,
    /// Lease file path. Empty means the default.
    #[serde(default = "default_leases_path")]
    pub leases_path: String,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

impl IscDhcpdConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
            leases_path: default_leases_path(),
            pools: Vec::new(),
        }
    }

    /// Set the lease file path.
    pub fn with_leases_path(mut self, path: impl Into<String>) -> Self {
        self.leases_path = path.into();
        self
    }

    /// Add a pool.
    pub fn with_pool(mut self, name: impl Into<String>, networks: impl Into<String>) -> Self {
        self.pools.push(PoolConfig {
            name: name.into(),
            networks: networks.into(),
        });
        self
    }

    /// Lease file path with the default applied.
    pub fn leases_path(&self) -> PathBuf {
        if self.leases_path.trim().is_empty() {
            PathBuf::from(DEFAULT_LEASES_PATH)
        } else {
            PathBuf::from(self.leases_path.trim())
        }
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()?;
        self.build_pools().map(|_| ())
    }

    fn build_pools(&self) -> Result<Vec<Pool>, CollectorError> {
        let mut pools: Vec<Pool> = Vec::with_capacity(self.pools.len());
        for cfg in &self.pools {
            if cfg.name.trim().is_empty() {
                return Err(CollectorError::Config("pool name cannot be empty".into()));
            }
            let id = clean_id(&cfg.name);
            if pools.iter().any(|p| p.id == id) {
                return Err(CollectorError::Config(format!(
                    "duplicate pool name '{}'",
                    cfg.name
                )));
            }
            let ranges = parse_ranges(&cfg.networks).map_err(|e| {
                CollectorError::Config(format!("pool '{}': {e}", cfg.name))
            })?;
            // Leases are IPv4 only.
            if ranges.iter().any(|r| r.start().is_ipv6()) {
                return Err(CollectorError::Config(format!(
                    "pool '{}': IPv6 ranges are not supported",
                    cfg.name
                )));
            }
            let size = ranges.iter().map(IpRange::size).sum();
            pools.push(Pool {
                name: cfg.name.clone(),
                id,
                ranges,
                size,
            });
        }
        Ok(pools)
    }
}

job_builders!(IscDhcpdConfig);

#[derive(Debug, Clone)]
struct Pool {
    name: String,
    id: String,
    ranges: Vec<IpRange>,
    size: u128,
}

impl Pool {
    fn contains(&self, ip: Ipv4Addr) -> bool {
        self.ranges.iter().any(|r| r.contains(IpAddr::V4(ip)))
    }
}

/// ISC DHCP lease collector.
pub struct IscDhcpdCollector {
    config: IscDhcpdConfig,
    charts: Charts,
    pools: Vec<Pool>,
    modified: Option<SystemTime>,
    cache: Samples,
}

impl IscDhcpdCollector {
    pub fn new(config: IscDhcpdConfig) -> Self {
        Self {
            config,
            charts: Charts::new(),
            pools: Vec::new(),
            modified: None,
            cache: Samples::new(),
        }
    }

    fn base_charts(&self) -> Vec<Chart> {
        let mut charts = vec![
            Chart::new(
                "dhcpd_leases",
                "Active leases",
                "leases",
                "leases",
                "isc_dhcpd.active_leases_total",
            )
            .with_priority(1000)
            .with_dim(Dim::new("active_leases_total", "active")),
        ];

        let mut by_state = Chart::new(
            "dhcpd_leases_by_state",
            "Leases by binding state",
            "leases",
            "leases",
            "isc_dhcpd.leases_by_state",
        )
        .with_kind(ChartKind::Stacked)
        .with_priority(1001);
        for state in BindingState::ALL {
            by_state = by_state.with_dim(Dim::new(format!("leases_{state}"), state.as_ref()));
        }
        charts.push(by_state);

        if self.pools.is_empty() {
            return charts;
        }

        let mut utilization = Chart::new(
            "dhcpd_utilization",
            "Pool utilization",
            "percent",
            "pools",
            "isc_dhcpd.pool_utilization",
        )
        .with_kind(ChartKind::Area)
        .with_priority(1010);
        let mut active = Chart::new(
            "dhcpd_pool_active_leases",
            "Active leases per pool",
            "leases",
            "pools",
            "isc_dhcpd.pool_active_leases",
        )
        .with_priority(1011);
        for pool in &self.pools {
            utilization = utilization.with_dim(
                Dim::new(format!("pool_{}_utilization", pool.id), pool.name.as_str())
                    .with_divisor(PRECISION),
            );
            active = active.with_dim(Dim::new(
                format!("pool_{}_active_leases", pool.id),
                pool.name.as_str(),
            ));
        }
        charts.push(utilization);
        charts.push(active);
        charts
    }

    fn samples(&self, leases: &BTreeMap<Ipv4Addr, Lease>) -> Samples {
        let mut samples = Samples::new();
        for state in BindingState::ALL {
            samples.insert(format!("leases_{state}"), 0);
        }
        for state in leases.values().filter_map(|l| l.binding_state) {
            *samples.entry(format!("leases_{state}")).or_default() += 1;
        }

        let active: Vec<Ipv4Addr> = leases
            .values()
            .filter(|l| l.is_active())
            .map(|l| l.ip)
            .collect();
        samples.insert("active_leases_total".into(), active.len() as i64);

        for pool in &self.pools {
            let count = active.iter().filter(|ip| pool.contains(**ip)).count();
            let utilization = if pool.size == 0 {
                0.0
            } else {
                count as f64 * 100.0 / pool.size as f64
            };
            samples.insert(format!("pool_{}_active_leases", pool.id), count as i64);
            samples.insert(format!("pool_{}_utilization", pool.id), scaled(utilization));
        }
        samples
    }
}

impl std::fmt::Debug for IscDhcpdCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IscDhcpdCollector")
            .field("config", &self.config)
            .field("pools", &self.pools.len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for IscDhcpdCollector {
    type Config = IscDhcpdConfig;

    fn module(&self) -> &'static str {
        "isc_dhcpd"
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
        self.config.job.validate()?;
        self.pools = self.config.build_pools()?;
        self.charts = Charts::new();
        self.charts.add_all(self.base_charts())?;
        self.modified = None;
        self.cache.clear();
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let path = self.config.leases_path();
        let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                CollectorError::ProbeUnavailable(format!("'{}' not found", path.display()))
            }
            _ => CollectorError::ProbeUnavailable(format!("'{}': {e}", path.display())),
        })?;

        let modified = meta.modified().ok();
        if modified.is_some() && modified == self.modified && !self.cache.is_empty() {
            return Ok(self.cache.clone());
        }

        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| CollectorError::ProbeUnavailable(format!("'{}': {e}", path.display())))?;
        let parsed = parse_leases(&data).map_err(|e| CollectorError::Parse(e.to_string()))?;

        // Later blocks for the same address supersede earlier ones.
        let leases: BTreeMap<Ipv4Addr, Lease> = parsed.into_iter().map(|l| (l.ip, l)).collect();
        tracing::debug!(job = %self.config.job.name, leases = leases.len(), "Parsed lease file");

        let samples = self.samples(&leases);
        self.modified = modified;
        self.cache = samples.clone();
        Ok(samples)
    }
}

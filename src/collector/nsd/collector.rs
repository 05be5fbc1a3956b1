//! NSD collector backed by `nsd-control`.
//!
//! Counters come from `stats_noreset`, so they keep growing and are charted
//! as incremental dimensions. The chart set is fixed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::charts::{Chart, ChartKind, Charts, Dim, Samples};
use crate::collector::traits::job_builders;
use crate::collector::{Collector, CollectorError, JobOptions};
use crate::exec::{CommandProbe, Executor};

use super::parse::parse_stats;

const NSD_CONTROL: &str = "nsd-control";
const STATS_NORESET: &[&str] = &["stats_noreset"];

const PRIO: u32 = 3000;

const QUERY_TYPES: &[&str] = &[
    "A", "NS", "CNAME", "SOA", "PTR", "HINFO", "MX", "TXT", "AAAA", "SRV", "NAPTR", "DS",
    "DNSKEY", "SPF", "NSEC", "NSEC3", "RRSIG", "SSHFP", "TLSA", "SVCB", "HTTPS", "CAA", "IXFR",
    "AXFR", "ANY", "OTHER",
];
const OPCODES: &[&str] = &["QUERY", "IQUERY", "STATUS", "NOTIFY", "UPDATE", "OTHER"];
const CLASSES: &[&str] = &["IN", "CS", "CH", "HS"];
const PROTOCOLS: &[&str] = &["udp", "udp6", "tcp", "tcp6", "tls", "tls6"];
const RCODES: &[&str] = &[
    "NOERROR", "FORMERR", "SERVFAIL", "NXDOMAIN", "NOTIMP", "REFUSED", "YXDOMAIN", "YXRRSET",
    "NXRRSET", "NOTAUTH", "NOTZONE", "BADVERS",
];

/// Configuration for the NSD collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsdConfig {
    #[serde(flatten)]
    pub job: JobOptions,
}

impl NsdConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobOptions::new(name),
        }
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        self.job.validate()
    }
}

job_builders!(NsdConfig);

fn counter_chart(
    id: &str,
    title: &str,
    units: &str,
    family: &str,
    priority: u32,
    prefix: &str,
    names: &[&str],
) -> Chart {
    let mut chart = Chart::new(id, title, units, family, format!("nsd.{id}"))
        .with_kind(ChartKind::Stacked)
        .with_priority(priority);
    for name in names {
        chart = chart.with_dim(Dim::new(format!("{prefix}{name}"), *name).incremental());
    }
    chart
}

fn nsd_charts() -> Vec<Chart> {
    vec![
        Chart::new("queries", "Queries", "queries/s", "queries", "nsd.queries")
            .with_priority(PRIO)
            .with_dim(Dim::new("num.queries", "queries").incremental()),
        counter_chart(
            "queries_by_type",
            "Queries by type",
            "queries/s",
            "queries",
            PRIO + 1,
            "num.type.",
            QUERY_TYPES,
        ),
        counter_chart(
            "queries_by_opcode",
            "Queries by opcode",
            "queries/s",
            "queries",
            PRIO + 2,
            "num.opcode.",
            OPCODES,
        ),
        counter_chart(
            "queries_by_class",
            "Queries by class",
            "queries/s",
            "queries",
            PRIO + 3,
            "num.class.",
            CLASSES,
        ),
        counter_chart(
            "queries_by_protocol",
            "Queries by protocol",
            "queries/s",
            "queries",
            PRIO + 4,
            "num.",
            PROTOCOLS,
        ),
        counter_chart(
            "answers_by_rcode",
            "Answers by rcode",
            "answers/s",
            "answers",
            PRIO + 5,
            "num.rcode.",
            RCODES,
        ),
        Chart::new("errors", "Errors", "errors/s", "errors", "nsd.errors")
            .with_priority(PRIO + 6)
            .with_dim(Dim::new("num.rxerr", "query").incremental())
            .with_dim(Dim::new("num.txerr", "answer").incremental()),
        Chart::new("drops", "Drops", "drops/s", "errors", "nsd.drops")
            .with_priority(PRIO + 7)
            .with_dim(Dim::new("num.dropped", "query").incremental()),
        Chart::new("zones", "Zones", "zones", "zones", "nsd.zones")
            .with_priority(PRIO + 8)
            .with_dim(Dim::new("zone.master", "master"))
            .with_dim(Dim::new("zone.slave", "slave")),
        Chart::new(
            "zone_transfers_requests",
            "Zone transfers",
            "requests/s",
            "zones",
            "nsd.zone_transfers_requests",
        )
        .with_priority(PRIO + 9)
        .with_dim(Dim::new("num.raxfr", "AXFR").incremental())
        .with_dim(Dim::new("num.rixfr", "IXFR").incremental()),
        Chart::new(
            "zone_transfer_memory",
            "Zone transfer memory",
            "bytes",
            "zones",
            "nsd.zone_transfer_memory",
        )
        .with_priority(PRIO + 10)
        .with_dim(Dim::new("size.xfrd.mem", "used")),
        Chart::new(
            "database_size",
            "Database size",
            "bytes",
            "database",
            "nsd.database_size",
        )
        .with_priority(PRIO + 11)
        .with_dim(Dim::new("size.db.disk", "disk"))
        .with_dim(Dim::new("size.db.mem", "mem")),
        Chart::new("uptime", "Uptime", "seconds", "uptime", "nsd.uptime")
            .with_priority(PRIO + 12)
            .with_dim(Dim::new("time.boot", "uptime")),
    ]
}

/// NSD authoritative DNS server collector.
pub struct NsdCollector {
    config: NsdConfig,
    charts: Charts,
    probe: Option<Arc<dyn CommandProbe>>,
}

impl NsdCollector {
    pub fn new(config: NsdConfig) -> Self {
        Self {
            config,
            charts: Charts::new(),
            probe: None,
        }
    }

    /// Use `probe` instead of locating `nsd-control`.
    pub fn with_probe(mut self, probe: Arc<dyn CommandProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

impl std::fmt::Debug for NsdCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NsdCollector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for NsdCollector {
    type Config = NsdConfig;

    fn module(&self) -> &'static str {
        "nsd"
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
            let exec = Executor::lookup(NSD_CONTROL, self.config.job.timeout)?;
            tracing::debug!(path = %exec.path().display(), "Using nsd-control");
            self.probe = Some(Arc::new(exec));
        }
        if self.charts.is_empty() {
            self.charts.add_all(nsd_charts())?;
        }
        Ok(())
    }

    async fn gather(&mut self) -> Result<Samples, CollectorError> {
        let probe = self
            .probe
            .clone()
            .ok_or_else(|| CollectorError::Transient("collector not initialized".into()))?;

        let output = probe.run_args(STATS_NORESET).await?;
        let stats = parse_stats(&output).map_err(|e| CollectorError::Parse(e.to_string()))?;

        let samples: Samples = stats
            .into_iter()
            .filter(|(k, _)| self.charts.declares(k))
            .map(|(k, v)| (k, v as i64))
            .collect();
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

    const STATS: &str = "\
server0.queries=30
num.queries=30
time.boot=86400.123456
time.elapsed=10.5
size.db.disk=1048576
size.db.mem=524288
size.xfrd.mem=83886080
num.type.A=20
num.type.AAAA=8
num.type.TYPE252=2
num.opcode.QUERY=30
num.class.IN=30
num.rcode.NOERROR=25
num.rcode.NXDOMAIN=5
num.udp=28
num.tcp=2
num.rxerr=1
num.txerr=0
num.dropped=3
num.raxfr=1
num.rixfr=0
zone.master=4
zone.slave=2
";

    #[tokio::test]
    async fn test_collect() {
        let probe = Arc::new(ScriptedProbe::new().on("stats_noreset", STATS));
        let mut c = NsdCollector::new(NsdConfig::new("local")).with_probe(probe);
        c.init().await.unwrap();
        c.check().await.unwrap();

        let samples = c.collect().await.unwrap();
        assert_eq!(samples["num.queries"], 30);
        assert_eq!(samples["time.boot"], 86400);
        assert_eq!(samples["num.type.AAAA"], 8);
        assert_eq!(samples["num.rcode.NXDOMAIN"], 5);
        assert_eq!(samples["num.udp"], 28);
        assert_eq!(samples["zone.slave"], 2);
        assert_eq!(samples["size.xfrd.mem"], 83_886_080);

        // Per-server and unknown keys have no dimension.
        assert!(!samples.contains_key("server0.queries"));
        assert!(!samples.contains_key("num.type.TYPE252"));
        assert!(!samples.contains_key("time.elapsed"));
        assert!(c.charts().undeclared(&samples).is_empty());
    }

    #[tokio::test]
    async fn test_init_declares_fixed_charts_once() {
        let probe = Arc::new(ScriptedProbe::new());
        let mut c = NsdCollector::new(NsdConfig::new("local")).with_probe(probe);
        c.init().await.unwrap();
        let n = c.charts().len();
        assert_eq!(n, 13);
        c.init().await.unwrap();
        assert_eq!(c.charts().len(), n);
        assert!(c.charts().declares("num.rcode.SERVFAIL"));
    }

    #[tokio::test]
    async fn test_probe_errors() {
        let probe = Arc::new(ScriptedProbe::new().fail("stats_noreset", 1, ""));
        let mut c = NsdCollector::new(NsdConfig::new("local")).with_probe(probe);
        c.init().await.unwrap();
        assert!(matches!(
            c.gather().await,
            Err(CollectorError::ProbeFailed { .. })
        ));

        let probe = Arc::new(ScriptedProbe::new().on("stats_noreset", "error: connection refused\n"));
        let mut c = NsdCollector::new(NsdConfig::new("local")).with_probe(probe);
        c.init().await.unwrap();
        assert!(matches!(c.gather().await, Err(CollectorError::Parse(_))));
        assert!(c.collect().await.unwrap().is_empty());
    }
}

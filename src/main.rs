//! Strobe Binary Entry Point
//!
//! Loads the job configuration, schedules every enabled job and writes the
//! plugin protocol to stdout. Logs go to stderr.

use std::time::Duration;

use clap::Parser;
use strobe::{
    collector::as400::As400Collector,
    collector::db2::Db2Collector,
    collector::dockerhub::DockerhubCollector,
    collector::hpssa::HpssaCollector,
    collector::isc_dhcpd::IscDhcpdCollector,
    collector::megacli::MegacliCollector,
    collector::nsd::NsdCollector,
    collector::pihole::PiholeCollector,
    collector::postgres::PostgresCollector,
    collector::smartctl::SmartctlCollector,
    collector::storcli::StorcliCollector,
    collector::{Collector, CollectorRegistry},
    config::{AppConfig, parse_duration},
    output::OutputBuilder,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Strobe - pull-based metric collectors
#[derive(Parser, Debug)]
#[command(name = "strobe", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "/etc/strobe/strobe.yaml",
        env = "STROBE_CONFIG"
    )]
    config: String,

    /// Run only the jobs of this module
    #[arg(short, long, env = "STROBE_MODULE")]
    module: Option<String>,

    /// Run one check cycle per job, report and exit
    #[arg(long)]
    check: bool,

    /// Time allowed for jobs to finish on shutdown
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    shutdown_timeout: Duration,
}

/// Build a collector for every enabled job and evaluate `$body` with it
/// bound to `$c`. Yields one `bool` per job.
macro_rules! for_each_enabled_job {
    ($collectors:expr, |$c:ident| $body:expr) => {{
        let mut outcomes: Vec<bool> = Vec::new();
        for_each_enabled_job!(@each $collectors, $c, $body, outcomes,
            isc_dhcpd: IscDhcpdCollector,
            hpssa: HpssaCollector,
            smartctl: SmartctlCollector,
            storcli: StorcliCollector,
            megacli: MegacliCollector,
            nsd: NsdCollector,
            dockerhub: DockerhubCollector,
            pihole: PiholeCollector,
            postgres: PostgresCollector,
            as400: As400Collector,
            db2: Db2Collector);
        outcomes
    }};
    (@each $collectors:expr, $c:ident, $body:expr, $outcomes:ident, $($field:ident: $collector:ident),+) => {
        $(
            for config in &$collectors.$field {
                if !config.job.enabled {
                    tracing::debug!(module = stringify!($field), job = %config.job.name, "Skipping disabled job");
                    continue;
                }
                let $c = $collector::new(config.clone());
                $outcomes.push($body);
            }
        )+
    };
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the plugin protocol
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,strobe=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    tracing::info!(path = %cli.config, "Loading configuration");
    let mut config = AppConfig::load_with_collector_path(&cli.config)?;
    if let Some(ref module) = cli.module {
        config.collectors.retain_module(module)?;
    }
    tracing::info!(jobs = config.collectors.job_count(), "Configuration loaded");

    if cli.check {
        let outcomes = for_each_enabled_job!(config.collectors, |c| check_job(c).await);
        let failed = outcomes.iter().filter(|ok| !**ok).count();
        tracing::info!(jobs = outcomes.len(), failed, "Check complete");
        if failed > 0 {
            return Err(format!("{failed} job(s) failed their check").into());
        }
        return Ok(());
    }

    let handles = OutputBuilder::new()
        .plugin_name(config.output.plugin_name.as_str())
        .channel_capacity(config.output.channel_capacity)
        .build(std::io::stdout());
    let registry = CollectorRegistry::new(handles.writer.clone()).await?;

    let outcomes = for_each_enabled_job!(config.collectors, |c| spawn_job(&registry, c).await);
    let spawned = outcomes.iter().filter(|ok| **ok).count();
    tracing::info!(
        spawned,
        failed = outcomes.len() - spawned,
        "Jobs started"
    );
    if spawned == 0 {
        tracing::warn!("No job could be started, exiting");
        registry.shutdown_with_timeout(cli.shutdown_timeout).await?;
        handles.shutdown()?;
        return Ok(());
    }

    registry.start().await?;
    shutdown_signal().await;

    tracing::info!("Shutting down collectors...");
    if let Err(e) = registry.shutdown_with_timeout(cli.shutdown_timeout).await {
        tracing::error!(error = %e, "Failed to shutdown collectors");
    }
    if let Err(e) = handles.shutdown() {
        tracing::error!(error = %e, "Failed to shutdown output");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Register a job. Failures are logged by the registry.
async fn spawn_job<C: Collector>(registry: &CollectorRegistry, collector: C) -> bool {
    registry.spawn(collector).await.is_ok()
}

/// Initialise a job, run one cycle and release it.
async fn check_job<C: Collector>(mut collector: C) -> bool {
    let module = collector.module();
    let name = collector.name().to_string();

    let result = match collector.init().await {
        Ok(()) => collector.check().await,
        Err(e) => Err(e),
    };
    collector.cleanup().await;

    match result {
        Ok(()) => {
            tracing::info!(module, job = %name, "Check passed");
            true
        }
        Err(e) => {
            tracing::error!(module, job = %name, error = %e, "Check failed");
            false
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}

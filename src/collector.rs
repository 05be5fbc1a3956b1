//! Collector Layer
//!
//! Pull-based collectors, one module per kind of target. A configured
//! instance is a job; each job runs on its own schedule and hands its
//! samples to the output layer.
//!
//! # Architecture
//!
//! - [`Collector`]: Core trait for implementing data collectors
//! - [`Schedule`]: Execution schedule (interval or cron)
//! - [`CollectorRegistry`]: Manages job lifecycle and graceful shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use strobe::collector::CollectorRegistry;
//! use strobe::collector::nsd::{NsdCollector, NsdConfig};
//! use strobe::output::OutputBuilder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = OutputBuilder::new().build(std::io::stdout());
//! let registry = CollectorRegistry::new(handles.writer.clone()).await?;
//! let config = NsdConfig::new("local").with_interval(Duration::from_secs(10));
//! registry.spawn(NsdCollector::new(config)).await?;
//! registry.start().await?;
//! # Ok(())
//! # }
//! ```

mod registry;
mod traits;

pub mod as400;
pub mod db2;
pub mod dockerhub;
pub mod hpssa;
pub mod isc_dhcpd;
pub mod megacli;
pub mod nsd;
pub mod pihole;
pub mod postgres;
pub mod smartctl;
pub mod storcli;

pub use registry::{CollectorRegistry, DEFAULT_SHUTDOWN_TIMEOUT, JobInfo};
pub use traits::{
    Collector, CollectorConfig, CollectorError, DEFAULT_INTERVAL, DEFAULT_TIMEOUT, JobOptions,
    MIN_INTERVAL, Schedule,
};

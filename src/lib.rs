//! Strobe - pull-based metric collectors
//!
//! This crate provides the collectors, scheduling and output plumbing of the
//! `strobe` plugin. It can be embedded by other Rust programs (for example to
//! supply an IBM i or DB2 SQL client), or run as the standalone `strobe`
//! binary that speaks the external-plugin text protocol on stdout.
//!
//! # Architecture
//!
//! - **Collectors**: RAID controllers, S.M.A.R.T., DHCP leases, DNS servers,
//!   web APIs and databases ([`collector`])
//! - **Charts**: chart and dimension declarations per job ([`charts`])
//! - **Probes**: external commands ([`exec`]), HTTP ([`web`]) and SQL
//!   ([`dbdriver`])
//! - **Output**: a writer thread rendering frames ([`output`])
//! - **Configuration**: YAML job files ([`config`])

pub mod charts;
pub mod collector;
pub mod config;
pub mod dbdriver;
pub mod exec;
pub mod iprange;
pub mod output;
pub mod web;

pub use charts::{Chart, Charts, Dim, Samples};
pub use collector::{Collector, CollectorError, CollectorRegistry, Schedule};
pub use config::{AppConfig, ConfigError};
pub use output::{OutputBuilder, OutputHandles, OutputWriter};

//! IBM i (AS/400) system status and active jobs.

mod collector;
mod parse;

pub use collector::{As400Collector, As400Config};
pub use parse::{ActiveJob, ActiveJobTarget, SystemStatus, TargetError};

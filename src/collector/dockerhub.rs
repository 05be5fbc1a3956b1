//! Docker Hub repository statistics.

mod collector;
mod parse;

pub use collector::{DEFAULT_URL, DockerhubCollector, DockerhubConfig};
pub use parse::RepositoryInfo;

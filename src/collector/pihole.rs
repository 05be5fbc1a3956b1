//! Pi-hole DNS sinkhole statistics via the v6 web API.
//!
//! - [`PiholeCollector`]: session login, query summary and blocklist state
//! - [`parse_session`]: interpretation of `POST /api/auth` bodies

mod collector;
mod parse;

pub use collector::{DEFAULT_PASSWORD_FILE, DEFAULT_URL, PiholeCollector, PiholeConfig};
pub use parse::{
    PasswordFile, QUERY_TYPES, Session, SessionError, Summary, parse_session, password_file,
};

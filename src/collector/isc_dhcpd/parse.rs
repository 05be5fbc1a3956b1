//! ISC DHCPD lease file parser.
//!
//! The server appends a new `lease <ip> { ... }` block every time a lease
//! changes, so an address can appear several times; the last block wins.
//! Parsing is line based and tolerant:
//!
//! - comments (`# ...`) and blank lines are ignored
//! - CRLF line endings, tabs and missing `;` terminators are accepted
//! - blocks with an invalid address, and blocks left unterminated, are skipped
//! - non-lease blocks (`failover peer`, `host`, `class`) are ignored

use std::net::Ipv4Addr;

use chrono::{DateTime, NaiveDateTime};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Lease binding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BindingState {
    Active,
    Free,
    Released,
    Abandoned,
    Reserved,
    Backup,
    Expired,
}

impl BindingState {
    pub const ALL: [BindingState; 7] = [
        Self::Active,
        Self::Free,
        Self::Released,
        Self::Abandoned,
        Self::Reserved,
        Self::Backup,
        Self::Expired,
    ];
}

/// Lease expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEnd {
    /// `ends never;`
    Never,
    At(NaiveDateTime),
}

/// One lease block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub starts: Option<NaiveDateTime>,
    pub ends: Option<LeaseEnd>,
    pub binding_state: Option<BindingState>,
    pub hardware_address: Option<String>,
    pub uid: Option<String>,
    pub client_hostname: Option<String>,
}

impl Lease {
    fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            starts: None,
            ends: None,
            binding_state: None,
            hardware_address: None,
            uid: None,
            client_hostname: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.binding_state == Some(BindingState::Active)
    }

    fn apply(&mut self, statement: &str) {
        let tokens: Vec<&str> = statement.split_whitespace().collect();
        match tokens.as_slice() {
            ["starts", rest @ ..] => self.starts = parse_time(rest),
            ["ends", "never"] => self.ends = Some(LeaseEnd::Never),
            ["ends", rest @ ..] => self.ends = parse_time(rest).map(LeaseEnd::At),
            ["binding", "state", state] => self.binding_state = state.parse().ok(),
            ["hardware", "ethernet", mac] => self.hardware_address = Some(mac.to_string()),
            ["uid", ..] => self.uid = quoted_value(statement, "uid"),
            ["client-hostname", ..] => {
                self.client_hostname = quoted_value(statement, "client-hostname")
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseParseError {
    #[error("no valid lease among {attempted} lease blocks")]
    NoValidLeases { attempted: usize },
}

enum Block {
    /// Outside any block.
    None,
    /// Inside a lease block with a valid address.
    Lease(Lease),
    /// Inside a block we ignore; the value is the brace depth.
    Skip(usize),
}

/// Parse the contents of a lease file.
///
/// # Errors
/// Returns [`LeaseParseError::NoValidLeases`] only when lease blocks were
/// present and none of them could be parsed. An empty file yields no leases.
pub fn parse_leases(input: &[u8]) -> Result<Vec<Lease>, LeaseParseError> {
    let text = String::from_utf8_lossy(input);
    let mut leases = Vec::new();
    let mut attempted = 0;
    let mut block = Block::None;

    for raw in text.lines() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = lease_header(line) {
            // A new header inside an open lease means the previous one was cut off.
            attempted += 1;
            let (addr, body) = match rest.split_once('{') {
                Some((addr, body)) => (addr.trim(), Some(body)),
                None => (rest.trim(), None),
            };
            block = match addr.parse::<Ipv4Addr>() {
                Ok(ip) => Block::Lease(Lease::new(ip)),
                Err(_) => Block::Skip(1),
            };
            if let Some(body) = body {
                block = feed(block, body, &mut leases);
            }
            continue;
        }

        block = feed(block, line, &mut leases);
    }

    if leases.is_empty() && attempted > 0 {
        return Err(LeaseParseError::NoValidLeases { attempted });
    }
    Ok(leases)
}

/// Feed one line of content to the current block.
fn feed(block: Block, line: &str, leases: &mut Vec<Lease>) -> Block {
    match block {
        Block::Lease(mut lease) => {
            let (content, closed) = match find_unquoted(line, '}') {
                Some(pos) => (&line[..pos], true),
                None => (line, false),
            };
            for statement in split_statements(content) {
                lease.apply(statement);
            }
            if closed {
                leases.push(lease);
                Block::None
            } else {
                Block::Lease(lease)
            }
        }
        Block::Skip(depth) => {
            let depth = depth + count_unquoted(line, '{');
            match depth.checked_sub(count_unquoted(line, '}')) {
                Some(0) | None => Block::None,
                Some(d) => Block::Skip(d),
            }
        }
        Block::None => {
            let opens = count_unquoted(line, '{');
            let closes = count_unquoted(line, '}');
            if opens > closes {
                Block::Skip(opens - closes)
            } else {
                Block::None
            }
        }
    }
}

fn lease_header(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("lease")?;
    rest.starts_with(char::is_whitespace).then_some(rest)
}

/// Characters of `line` outside double quotes, with their byte offsets.
/// Inside quotes a backslash escapes the next character.
fn unquoted(line: &str) -> impl Iterator<Item = (usize, char)> + '_ {
    let mut in_quotes = false;
    let mut escaped = false;
    line.char_indices().filter(move |&(_, c)| {
        if escaped {
            escaped = false;
            return false;
        }
        match c {
            '\\' if in_quotes => {
                escaped = true;
                false
            }
            '"' => {
                in_quotes = !in_quotes;
                false
            }
            _ => !in_quotes,
        }
    })
}

fn find_unquoted(line: &str, needle: char) -> Option<usize> {
    unquoted(line).find(|&(_, c)| c == needle).map(|(i, _)| i)
}

fn count_unquoted(line: &str, needle: char) -> usize {
    unquoted(line).filter(|&(_, c)| c == needle).count()
}

/// Split on `;` outside quotes, dropping empty statements.
fn split_statements(content: &str) -> impl Iterator<Item = &str> {
    let mut bounds: Vec<usize> = unquoted(content)
        .filter(|&(_, c)| c == ';')
        .map(|(i, _)| i)
        .collect();
    bounds.push(content.len());

    let mut start = 0;
    bounds.into_iter().filter_map(move |end| {
        let statement = content[start..end].trim();
        start = end + 1;
        (!statement.is_empty()).then_some(statement)
    })
}

/// Drop a trailing `# comment`, ignoring `#` inside quotes.
fn strip_comment(line: &str) -> &str {
    match find_unquoted(line, '#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// `starts 2 2024/01/16 10:00:00` or `starts epoch 1705399200`.
fn parse_time(tokens: &[&str]) -> Option<NaiveDateTime> {
    match tokens {
        ["epoch", secs, ..] => {
            DateTime::from_timestamp(secs.parse().ok()?, 0).map(|dt| dt.naive_utc())
        }
        [_weekday, date, time, ..] => {
            NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y/%m/%d %H:%M:%S").ok()
        }
        _ => None,
    }
}

fn quoted_value(statement: &str, keyword: &str) -> Option<String> {
    let value = statement.strip_prefix(keyword)?.trim();
    let value = value.strip_prefix('"').unwrap_or(value);
    let value = value.strip_suffix('"').unwrap_or(value);
    (!value.is_empty()).then(|| value.replace("\\\"", "\""))
}

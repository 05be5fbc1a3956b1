//! IP address ranges.
//!
//! Accepted forms:
//! - single address: `192.168.0.1`, `2001:db8::1`
//! - CIDR: `192.168.0.0/24` (IPv4 prefixes shorter than /31 exclude the
//!   network and broadcast addresses)
//! - inclusive range: `192.168.0.10-192.168.0.20`

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpRangeError {
    #[error("empty ip range")]
    Empty,

    #[error("invalid ip address '{0}'")]
    Address(String),

    #[error("invalid prefix length in '{0}'")]
    Prefix(String),

    #[error("range start is greater than end in '{0}'")]
    Reversed(String),

    #[error("range '{0}' mixes address families")]
    MixedFamilies(String),
}

/// Inclusive range of addresses of a single family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpRange {
    start: IpAddr,
    end: IpAddr,
}

impl IpRange {
    /// # Errors
    /// Fails if the addresses belong to different families or `start > end`.
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self, IpRangeError> {
        let text = format!("{start}-{end}");
        match (start, end) {
            (IpAddr::V4(a), IpAddr::V4(b)) if a > b => Err(IpRangeError::Reversed(text)),
            (IpAddr::V6(a), IpAddr::V6(b)) if a > b => Err(IpRangeError::Reversed(text)),
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                Ok(Self { start, end })
            }
            _ => Err(IpRangeError::MixedFamilies(text)),
        }
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.start, self.end, ip) {
            (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(ip)) => s <= ip && ip <= e,
            (IpAddr::V6(s), IpAddr::V6(e), IpAddr::V6(ip)) => s <= ip && ip <= e,
            _ => false,
        }
    }

    /// Number of addresses, saturating at `u128::MAX`.
    pub fn size(&self) -> u128 {
        match (self.start, self.end) {
            (IpAddr::V4(s), IpAddr::V4(e)) => u128::from(u32::from(e) - u32::from(s)) + 1,
            (IpAddr::V6(s), IpAddr::V6(e)) => {
                (u128::from(e) - u128::from(s)).saturating_add(1)
            }
            _ => 0,
        }
    }

    fn parse_cidr(s: &str, addr: &str, prefix: &str) -> Result<Self, IpRangeError> {
        let ip = parse_addr(addr)?;
        let prefix: u32 = prefix
            .parse()
            .map_err(|_| IpRangeError::Prefix(s.to_string()))?;

        match ip {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return Err(IpRangeError::Prefix(s.to_string()));
                }
                let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
                let mut start = u32::from(v4) & mask;
                let mut end = start | !mask;
                if prefix < 31 {
                    start += 1;
                    end -= 1;
                }
                Ok(Self {
                    start: IpAddr::V4(Ipv4Addr::from(start)),
                    end: IpAddr::V4(Ipv4Addr::from(end)),
                })
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(IpRangeError::Prefix(s.to_string()));
                }
                let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
                let start = u128::from(v6) & mask;
                let end = start | !mask;
                Ok(Self {
                    start: IpAddr::V6(Ipv6Addr::from(start)),
                    end: IpAddr::V6(Ipv6Addr::from(end)),
                })
            }
        }
    }
}

impl FromStr for IpRange {
    type Err = IpRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IpRangeError::Empty);
        }

        if let Some((addr, prefix)) = s.split_once('/') {
            return Self::parse_cidr(s, addr, prefix);
        }

        if let Some((start, end)) = s.split_once('-') {
            let start = parse_addr(start)?;
            let end = parse_addr(end)?;
            return Self::new(start, end);
        }

        let ip = parse_addr(s)?;
        Ok(Self { start: ip, end: ip })
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Parse a whitespace-separated list of ranges.
///
/// # Errors
/// Fails on the first invalid range, or if the list is empty.
pub fn parse_ranges(s: &str) -> Result<Vec<IpRange>, IpRangeError> {
    let ranges = s
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<Vec<IpRange>, _>>()?;
    if ranges.is_empty() {
        return Err(IpRangeError::Empty);
    }
    Ok(ranges)
}

fn parse_addr(s: &str) -> Result<IpAddr, IpRangeError> {
    let s = s.trim();
    s.parse()
        .map_err(|_| IpRangeError::Address(s.to_string()))
}

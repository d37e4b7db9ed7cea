//! Validated client addresses

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::LookupError;

/// Private and reserved ranges. An address inside any of them is never
/// treated as a meaningful public client address.
const NON_PUBLIC_RANGES: &[&str] = &[
    // private
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "fc00::/7",
    // reserved
    "0.0.0.0/8",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "240.0.0.0/4",
    "::/128",
    "::1/128",
    "::ffff:0:0/96",
    "fe80::/10",
    "2001:db8::/32",
];

fn non_public_ranges() -> &'static [IpNet] {
    static RANGES: OnceLock<Vec<IpNet>> = OnceLock::new();
    RANGES.get_or_init(|| {
        NON_PUBLIC_RANGES
            .iter()
            .filter_map(|cidr| cidr.parse().ok())
            .collect()
    })
}

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A syntactically valid IPv4 or IPv6 address. Never a hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientAddress(IpAddr);

impl ClientAddress {
    /// Parse an IP literal, ignoring surrounding whitespace
    pub fn parse(raw: &str) -> Result<Self, LookupError> {
        raw.trim()
            .parse::<IpAddr>()
            .map(Self)
            .map_err(|_| LookupError::InvalidAddress(raw.to_string()))
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }

    pub fn family(&self) -> AddressFamily {
        match self.0 {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// True unless the address is in a private or reserved range
    pub fn is_public(&self) -> bool {
        !non_public_ranges().iter().any(|net| net.contains(&self.0))
    }
}

impl FromStr for ClientAddress {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<IpAddr> for ClientAddress {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

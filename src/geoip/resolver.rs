//! Country resolution

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::countries::country_name;
use super::database::DatabaseHandle;
use crate::error::LookupError;
use crate::proxy::ClientAddress;

/// Result of a successful country lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoRecord {
    /// ISO 3166-1 alpha-2 code, uppercase. Empty if the database knows the
    /// address but not its country.
    pub country_code: String,
    /// Display name as stored in the database
    pub country_name: String,
}

impl GeoRecord {
    pub fn new(country_code: impl Into<String>, country_name: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into().trim().to_ascii_uppercase(),
            country_name: country_name.into(),
        }
    }

    /// Record for a known country code, named from the built-in table
    pub fn from_code(code: &str) -> Option<Self> {
        country_name(code).map(|name| Self::new(code, name))
    }

    /// True if the record carries a usable country code
    pub fn has_country(&self) -> bool {
        !self.country_code.is_empty()
    }

    /// Name for display, falling back to the code
    pub fn display_name(&self) -> &str {
        if self.country_name.is_empty() {
            &self.country_code
        } else {
            &self.country_name
        }
    }
}

impl fmt::Display for GeoRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.country_code)
    }
}

/// Maps a client address to a country using a validated database.
///
/// `Ok(None)` means the database has no entry for the address (private and
/// loopback ranges, unallocated space). `Err` is reserved for I/O and
/// decoding failures.
pub trait CountryResolver: Send + Sync {
    fn lookup(
        &self,
        db: &DatabaseHandle,
        ip: &ClientAddress,
    ) -> Result<Option<GeoRecord>, LookupError>;
}

/// In-memory CIDR table. The most specific matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct StaticCountryResolver {
    entries: Vec<(IpNet, GeoRecord)>,
}

impl StaticCountryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, net: IpNet, record: GeoRecord) {
        self.entries.push((net.trunc(), record));
    }

    /// Builder style insert of `cidr` for a known country code
    pub fn with_range(mut self, cidr: &str, code: &str) -> anyhow::Result<Self> {
        let net: IpNet = cidr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid network {}: {}", cidr, e))?;
        let record = GeoRecord::from_code(code)
            .ok_or_else(|| anyhow::anyhow!("Unknown country code: {}", code))?;
        self.insert(net, record);
        Ok(self)
    }

    /// Parse a table with one `CIDR CODE [NAME...]` entry per line.
    ///
    /// Blank lines and `#` comments are ignored. Without a name the built-in
    /// country table supplies one.
    pub fn parse_table(text: &str) -> anyhow::Result<Self> {
        let mut resolver = Self::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(cidr), Some(code)) = (fields.next(), fields.next()) else {
                anyhow::bail!("Line {}: expected `CIDR CODE [NAME]`", idx + 1);
            };
            let net: IpNet = cidr
                .parse()
                .map_err(|e| anyhow::anyhow!("Line {}: invalid network {}: {}", idx + 1, cidr, e))?;

            let name = fields.collect::<Vec<_>>().join(" ");
            let record = if name.is_empty() {
                GeoRecord::from_code(code)
                    .ok_or_else(|| anyhow::anyhow!("Line {}: unknown country code {}", idx + 1, code))?
            } else {
                GeoRecord::new(code, name)
            };
            resolver.insert(net, record);
        }
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CountryResolver for StaticCountryResolver {
    fn lookup(
        &self,
        _db: &DatabaseHandle,
        ip: &ClientAddress,
    ) -> Result<Option<GeoRecord>, LookupError> {
        let addr = ip.ip();
        let found = self
            .entries
            .iter()
            .filter(|(net, _)| net.contains(&addr))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, record)| record.clone());

        debug!("Static lookup for {} ({:?}): {:?}", ip, ip.family(), found);
        Ok(found)
    }
}

//! Persisted login counters
//!
//! Counts are best-effort statistics: concurrent increments may lose an
//! update, but a store never leaves a half-written document behind.

pub mod file;
pub mod memory;

pub use file::JsonFileCounterStore;
pub use memory::MemoryCounterStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::Result;

/// The independent counter maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    /// Denied attempts by country code
    Denied,
    /// Allowed attempts by country code
    Allowed,
    /// Attempts whose country could not be resolved, by IP
    Unresolved,
}

impl CounterKind {
    pub const ALL: [CounterKind; 3] = [CounterKind::Denied, CounterKind::Allowed, CounterKind::Unresolved];

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::Denied => "denied",
            CounterKind::Allowed => "allowed",
            CounterKind::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CounterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "denied" => Ok(CounterKind::Denied),
            "allowed" => Ok(CounterKind::Allowed),
            "unresolved" => Ok(CounterKind::Unresolved),
            other => anyhow::bail!("Unknown counter: {}", other),
        }
    }
}

/// Durable, incrementable, enumerable counters
pub trait CounterStore: Send + Sync {
    /// Add one to `key` in the `kind` map
    fn increment(&self, kind: CounterKind, key: &str) -> Result<()>;

    /// Current values of the `kind` map
    fn snapshot(&self, kind: CounterKind) -> BTreeMap<String, u64>;

    /// Remember the country of the last successful login of `identity`
    fn record_last_country(&self, identity: &str, country_code: &str) -> Result<()>;

    fn last_country(&self, identity: &str) -> Option<String>;
}

/// Serialized form shared by the stores
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterDocument {
    pub denied: BTreeMap<String, u64>,
    pub allowed: BTreeMap<String, u64>,
    pub unresolved: BTreeMap<String, u64>,
    pub last_login_country: BTreeMap<String, String>,
}

impl CounterDocument {
    pub fn map(&self, kind: CounterKind) -> &BTreeMap<String, u64> {
        match kind {
            CounterKind::Denied => &self.denied,
            CounterKind::Allowed => &self.allowed,
            CounterKind::Unresolved => &self.unresolved,
        }
    }

    pub fn map_mut(&mut self, kind: CounterKind) -> &mut BTreeMap<String, u64> {
        match kind {
            CounterKind::Denied => &mut self.denied,
            CounterKind::Allowed => &mut self.allowed,
            CounterKind::Unresolved => &mut self.unresolved,
        }
    }

    pub fn increment(&mut self, kind: CounterKind, key: &str) {
        let count = self.map_mut(kind).entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }
}

//! Configuration Types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::geoip::{known_country_codes, DEFAULT_BUILD_DATE_TTL, DEFAULT_SEARCH_DEPTH};
use crate::policy::{set_policy, PolicyMode, PolicySet};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub geoip: GeoipConfig,
    pub policy: PolicyConfig,
    pub proxy: ProxyConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

/// GeoIP database configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeoipConfig {
    /// Database file; empty means not configured
    pub database_path: String,
    /// Optional `CIDR CODE [NAME]` table used instead of a MaxMind DB reader
    pub static_table: Option<PathBuf>,
    /// Extra directories searched by database discovery
    pub search_paths: Vec<PathBuf>,
    pub search_depth: usize,
    #[serde(with = "humantime_serde")]
    pub build_date_cache_ttl: Duration,
    /// Lookups slower than this are treated as failed
    #[serde(with = "humantime_serde")]
    pub lookup_deadline: Option<Duration>,
}

/// Country policy configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub mode: PolicyMode,
    /// Comma separated country codes
    pub countries: String,
}

/// Reverse proxy configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Header carrying the client address, normalized on load
    pub header: Option<String>,
    /// Silence the "proxy detected" warning while no header is set
    pub disable_warning: bool,
}

/// Counter persistence configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// JSON counter file; counters stay in memory without one
    pub path: Option<PathBuf>,
    pub track_last_login_country: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for GeoipConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            static_table: None,
            search_paths: Vec::new(),
            search_depth: DEFAULT_SEARCH_DEPTH,
            build_date_cache_ttl: DEFAULT_BUILD_DATE_TTL,
            lookup_deadline: None,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            path: None,
            track_last_login_country: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PolicyConfig {
    /// Sanitized policy over the built-in country universe
    pub fn policy_set(&self) -> PolicySet {
        set_policy(self.mode, &self.countries, &known_country_codes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.geoip.build_date_cache_ttl, Duration::from_secs(20));
        assert_eq!(config.policy.mode, PolicyMode::Whitelist);
        assert!(config.stats.track_last_login_country);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_document() {
        let config: Config = toml::from_str(
            r#"
[geoip]
database_path = "/var/lib/GeoIP/GeoLite2-Country.mmdb"
search_paths = ["/usr/share/GeoIP"]
search_depth = 2
build_date_cache_ttl = "1m"
lookup_deadline = "250ms"

[policy]
mode = "blacklist"
countries = "CN,RU"

[proxy]
header = "X-Real-IP"

[stats]
path = "/var/lib/countrygate/counters.json"
track_last_login_country = false

[logging]
level = "debug"
"#,
        )
        .unwrap();

        assert_eq!(config.geoip.lookup_deadline, Some(Duration::from_millis(250)));
        assert_eq!(config.geoip.build_date_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.policy.mode, PolicyMode::Blacklist);
        assert_eq!(config.policy.policy_set().to_list(), "CN,RU");
        assert_eq!(config.proxy.header.as_deref(), Some("X-Real-IP"));
        assert!(!config.proxy.disable_warning);
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[policy]\nmode = \"greylist\"\n");
        assert!(result.is_err());
    }
}

//! Configuration Manager

use super::Config;
use crate::geoip::known_country_codes;
use crate::policy::{sanitize_country_list, PolicyMode};
use crate::proxy::normalize_header_name;
use crate::Result;
use anyhow::{bail, Context};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Deploy-time switch disabling every country check
pub const OVERRIDE_ENV: &str = "COUNTRYGATE_OVERRIDE";

/// Deepest directory recursion allowed for database discovery
const MAX_SEARCH_DEPTH: usize = 16;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let mut config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config.normalize();
            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        config.apply_env()?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Whether the deploy-time override is switched on
    pub fn override_from_env() -> bool {
        std::env::var(OVERRIDE_ENV)
            .map(|v| is_truthy(&v))
            .unwrap_or(false)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl Config {
    /// Override fields with `COUNTRYGATE_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_var("COUNTRYGATE_DATABASE_PATH") {
            self.geoip.database_path = path;
        }

        if let Some(table) = env_var("COUNTRYGATE_STATIC_TABLE") {
            self.geoip.static_table = Some(PathBuf::from(table));
        }

        if let Some(deadline) = env_var("COUNTRYGATE_LOOKUP_DEADLINE") {
            self.geoip.lookup_deadline = Some(
                humantime::parse_duration(&deadline)
                    .with_context(|| format!("Invalid COUNTRYGATE_LOOKUP_DEADLINE: {}", deadline))?,
            );
        }

        if let Some(mode) = env_var("COUNTRYGATE_POLICY_MODE") {
            self.policy.mode = mode
                .parse::<PolicyMode>()
                .with_context(|| format!("Invalid COUNTRYGATE_POLICY_MODE: {}", mode))?;
        }

        if let Some(countries) = env_var("COUNTRYGATE_COUNTRIES") {
            self.policy.countries = countries;
        }

        if let Some(header) = env_var("COUNTRYGATE_PROXY_HEADER") {
            self.proxy.header = Some(header);
        }

        if let Some(path) = env_var("COUNTRYGATE_STATS_PATH") {
            self.stats.path = Some(PathBuf::from(path));
        }

        if let Some(log_level) = env_var("COUNTRYGATE_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        Ok(())
    }

    /// Canonicalize operator input: the country list is sanitized and the
    /// proxy header name normalized. Invalid codes are dropped silently.
    pub fn normalize(&mut self) {
        self.policy.countries =
            sanitize_country_list(&self.policy.countries, &known_country_codes()).join(",");

        self.proxy.header = self
            .proxy
            .header
            .as_deref()
            .map(normalize_header_name)
            .filter(|h| !h.is_empty());
        if self.proxy.header.is_some() {
            self.proxy.disable_warning = false;
        }

        self.geoip.database_path = self.geoip.database_path.trim().to_string();
        self.logging.level = self.logging.level.trim().to_lowercase();
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_geoip_config()
            .with_context(|| "GeoIP configuration validation failed")?;

        self.validate_proxy_config()
            .with_context(|| "Proxy configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_geoip_config(&self) -> Result<()> {
        if self.geoip.search_depth > MAX_SEARCH_DEPTH {
            bail!("geoip.search_depth cannot exceed {}", MAX_SEARCH_DEPTH);
        }

        if self.geoip.build_date_cache_ttl.as_secs() > 3600 {
            bail!("geoip.build_date_cache_ttl cannot exceed 1 hour");
        }

        if let Some(deadline) = self.geoip.lookup_deadline {
            if deadline.is_zero() {
                bail!("geoip.lookup_deadline must be greater than 0");
            }
        }

        Ok(())
    }

    fn validate_proxy_config(&self) -> Result<()> {
        let Some(header) = &self.proxy.header else {
            return Ok(());
        };

        let valid = Regex::new(r"^[A-Za-z0-9_-]{1,128}$").context("Invalid header pattern")?;
        if !valid.is_match(header) {
            bail!("proxy.header contains invalid characters: {:?}", header);
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        database: Option<&str>,
        mode: Option<PolicyMode>,
        countries: Option<&str>,
        proxy_header: Option<&str>,
        stats_path: Option<&Path>,
    ) {
        if let Some(database) = database {
            self.geoip.database_path = database.trim().to_string();
            tracing::info!("CLI override: database path set to {}", self.geoip.database_path);
        }

        if let Some(mode) = mode {
            self.policy.mode = mode;
            tracing::info!("CLI override: policy mode set to {}", mode);
        }

        if let Some(countries) = countries {
            self.policy.countries = countries.to_string();
            tracing::info!("CLI override: countries set to {}", countries);
        }

        if let Some(header) = proxy_header {
            self.proxy.header = Some(header.to_string());
            tracing::info!("CLI override: proxy header set to {}", header);
        }

        if let Some(path) = stats_path {
            self.stats.path = Some(path.to_path_buf());
            tracing::info!("CLI override: stats path set to {}", path.display());
        }

        self.normalize();
    }
}

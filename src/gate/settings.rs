//! Immutable settings snapshot for one evaluation

use std::time::Duration;

use crate::config::{Config, ConfigManager, ProxyConfig};
use crate::policy::PolicySet;

/// Everything an evaluation reads, taken once per login attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateSettings {
    pub database_path: String,
    pub policy: PolicySet,
    pub proxy: ProxyConfig,
    /// Deploy-time switch disabling every country check
    pub override_active: bool,
    pub lookup_deadline: Option<Duration>,
    pub track_last_login_country: bool,
}

impl GateSettings {
    pub fn from_config(config: &Config, override_active: bool) -> Self {
        Self {
            database_path: config.geoip.database_path.clone(),
            policy: config.policy.policy_set(),
            proxy: config.proxy.clone(),
            override_active,
            lookup_deadline: config.geoip.lookup_deadline,
            track_last_login_country: config.stats.track_last_login_country,
        }
    }

    /// Snapshot with the override read from the environment
    pub fn from_config_and_env(config: &Config) -> Self {
        Self::from_config(config, ConfigManager::override_from_env())
    }
}

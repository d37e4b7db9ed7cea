//! Outcome of one login evaluation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geoip::GeoRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a decision was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    OverrideActive,
    PolicyEmpty,
    CountryUnresolved,
    AllowedByPolicy,
    DeniedByPolicy,
}

impl VerdictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictReason::OverrideActive => "override_active",
            VerdictReason::PolicyEmpty => "policy_empty",
            VerdictReason::CountryUnresolved => "country_unresolved",
            VerdictReason::AllowedByPolicy => "allowed_by_policy",
            VerdictReason::DeniedByPolicy => "denied_by_policy",
        }
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow or deny with its reason and, when known, the resolved country
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: VerdictReason,
    pub country: Option<GeoRecord>,
}

impl Verdict {
    pub fn allow(reason: VerdictReason) -> Self {
        Self {
            decision: Decision::Allow,
            reason,
            country: None,
        }
    }

    pub fn deny(country: GeoRecord) -> Self {
        Self {
            decision: Decision::Deny,
            reason: VerdictReason::DeniedByPolicy,
            country: Some(country),
        }
    }

    pub fn with_country(mut self, country: GeoRecord) -> Self {
        self.country = Some(country);
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }

    /// Country name shown to a denied user
    pub fn country_name(&self) -> Option<&str> {
        self.country.as_ref().map(GeoRecord::display_name)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.decision, self.reason)?;
        if let Some(country) = &self.country {
            write!(f, " {}", country)?;
        }
        Ok(())
    }
}

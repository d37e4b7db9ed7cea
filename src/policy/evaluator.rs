//! Country policy evaluation

use tracing::debug;

use super::types::{PolicyMode, PolicySet};
use crate::verdict::{Decision, VerdictReason};

/// Judges a resolved country against a [`PolicySet`]
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    policy: PolicySet,
}

impl PolicyEvaluator {
    pub fn new(policy: PolicySet) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicySet {
        &self.policy
    }

    /// True when the policy has no countries and therefore never denies
    pub fn is_inert(&self) -> bool {
        self.policy.is_empty()
    }

    /// Evaluate a resolved country code.
    ///
    /// An empty policy allows with `policy_empty`. Otherwise the login is
    /// allowed iff `(mode == Blacklist) XOR (code is listed)`. Returns `None`
    /// for a non-empty policy and no country; the caller decides that case.
    pub fn evaluate(&self, country_code: Option<&str>) -> Option<(Decision, VerdictReason)> {
        if self.policy.is_empty() {
            return Some((Decision::Allow, VerdictReason::PolicyEmpty));
        }

        let code = country_code.map(str::trim).filter(|c| !c.is_empty())?;
        let is_blacklist = self.policy.mode() == PolicyMode::Blacklist;
        let is_member = self.policy.contains(code);
        let allowed = is_blacklist ^ is_member;

        debug!(
            "Policy {} with {} listed: {} member={} allowed={}",
            self.policy.mode(),
            self.policy.codes().len(),
            code,
            is_member,
            allowed
        );

        Some(if allowed {
            (Decision::Allow, VerdictReason::AllowedByPolicy)
        } else {
            (Decision::Deny, VerdictReason::DeniedByPolicy)
        })
    }
}

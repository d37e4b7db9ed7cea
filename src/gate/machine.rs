//! Per-attempt login gate

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::GateSettings;
use crate::error::{AuthError, DatabaseError, LookupError};
use crate::geoip::{
    database_message, CountryResolver, DatabaseHandle, DatabaseInspector, GeoRecord,
};
use crate::metrics::GateMetrics;
use crate::notice::{Notice, NoticeSink};
use crate::policy::PolicyEvaluator;
use crate::proxy::{detect_possible_proxy, ClientAddress, ProxyHeaderResolver, ProxySignal, RequestHeaders};
use crate::stats::{CounterKind, CounterStore};
use crate::verdict::{Decision, Verdict, VerdictReason};

/// An authenticated identity whose last login country can be remembered
pub trait Authenticated {
    fn identity(&self) -> &str;
}

impl Authenticated for String {
    fn identity(&self) -> &str {
        self
    }
}

impl Authenticated for &str {
    fn identity(&self) -> &str {
        self
    }
}

/// Evaluation steps. There is no error state; every failure moves forward
/// to an allowing verdict.
#[derive(Debug)]
enum GateState {
    Start,
    ResolvingIp,
    ResolvingCountry(ClientAddress),
    EvaluatingPolicy(GeoRecord),
    Done(Verdict),
}

/// Result of a settings check
#[derive(Debug)]
pub struct SettingsReport {
    pub database: Result<DatabaseHandle, DatabaseError>,
    pub proxy_signals: Vec<ProxySignal>,
}

/// Decides, once per authentication attempt, whether the client's country
/// may log in.
///
/// Collaborators are injected; the gate keeps no per-attempt state.
pub struct LoginGate {
    resolver: Arc<dyn CountryResolver>,
    counters: Arc<dyn CounterStore>,
    notices: Arc<dyn NoticeSink>,
    inspector: Arc<DatabaseInspector>,
    metrics: Option<GateMetrics>,
}

impl LoginGate {
    pub fn new(
        resolver: Arc<dyn CountryResolver>,
        counters: Arc<dyn CounterStore>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            resolver,
            counters,
            notices,
            inspector: Arc::new(DatabaseInspector::default()),
            metrics: None,
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<DatabaseInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_metrics(mut self, metrics: GateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&GateMetrics> {
        self.metrics.as_ref()
    }

    pub fn counters(&self) -> &Arc<dyn CounterStore> {
        &self.counters
    }

    /// Hook for the host authentication pipeline.
    ///
    /// An upstream failure is passed through untouched. Otherwise the
    /// identity is returned unless its country is denied.
    pub fn authenticate<I: Authenticated>(
        &self,
        settings: &GateSettings,
        upstream: Result<I, AuthError>,
        peer: &str,
        headers: &RequestHeaders,
    ) -> Result<I, AuthError> {
        let identity = match upstream {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Upstream authentication failed ({}), skipping country check", e.code);
                return Err(e);
            }
        };

        let verdict = self.evaluate(settings, peer, headers);
        self.admit(settings, &verdict, &identity).map(|()| identity)
    }

    /// Apply a verdict to an authenticated identity.
    ///
    /// A denial becomes an `invalid_country` error. A login allowed by the
    /// policy records the identity's country when tracking is enabled.
    pub fn admit(
        &self,
        settings: &GateSettings,
        verdict: &Verdict,
        identity: &dyn Authenticated,
    ) -> Result<(), AuthError> {
        match verdict.decision {
            Decision::Allow => {
                if settings.track_last_login_country && verdict.reason == VerdictReason::AllowedByPolicy {
                    if let Some(country) = verdict.country.as_ref().filter(|c| c.has_country()) {
                        if let Err(e) = self
                            .counters
                            .record_last_country(identity.identity(), &country.country_code)
                        {
                            error!("Failed to record last login country: {:#}", e);
                        }
                    }
                }
                Ok(())
            }
            Decision::Deny => Err(AuthError::invalid_country(
                verdict.country_name().unwrap_or_default(),
            )),
        }
    }

    /// Evaluate one login attempt. Never fails; every path ends in a verdict.
    pub fn evaluate(&self, settings: &GateSettings, peer: &str, headers: &RequestHeaders) -> Verdict {
        let evaluator = PolicyEvaluator::new(settings.policy.clone());
        let mut state = GateState::Start;

        let verdict = loop {
            debug!("Login gate state: {:?}", state);
            state = match state {
                GateState::Start => {
                    if settings.override_active {
                        GateState::Done(Verdict::allow(VerdictReason::OverrideActive))
                    } else if evaluator.is_inert() {
                        GateState::Done(Verdict::allow(VerdictReason::PolicyEmpty))
                    } else {
                        GateState::ResolvingIp
                    }
                }
                GateState::ResolvingIp => {
                    match ProxyHeaderResolver::from_config(&settings.proxy).resolve(peer, headers) {
                        Ok(address) => GateState::ResolvingCountry(address),
                        Err(e) => {
                            self.notices.publish(Notice::warning(e.to_string()));
                            match ClientAddress::parse(peer) {
                                Ok(address) => GateState::Done(self.unresolved(&address.to_string())),
                                Err(_) => {
                                    debug!("Peer {:?} is not an IP address, not counted", peer.trim());
                                    GateState::Done(Verdict::allow(VerdictReason::CountryUnresolved))
                                }
                            }
                        }
                    }
                }
                GateState::ResolvingCountry(address) => match self.resolve_country(settings, &address) {
                    Ok(Some(record)) if record.has_country() => GateState::EvaluatingPolicy(record),
                    Ok(_) => {
                        debug!("No country known for {}", address);
                        GateState::Done(self.unresolved(&address.to_string()))
                    }
                    Err(e) => {
                        warn!("Country lookup for {} failed: {}", address, e);
                        if let Some(metrics) = &self.metrics {
                            metrics.record_lookup_error();
                        }
                        self.notices.publish(Notice::warning(e.to_string()));
                        GateState::Done(self.unresolved(&address.to_string()))
                    }
                },
                GateState::EvaluatingPolicy(record) => {
                    match evaluator.evaluate(Some(&record.country_code)) {
                        Some((Decision::Deny, _)) => {
                            self.count(CounterKind::Denied, &record.country_code);
                            GateState::Done(Verdict::deny(record))
                        }
                        Some((Decision::Allow, reason)) => {
                            self.count(CounterKind::Allowed, &record.country_code);
                            GateState::Done(Verdict::allow(reason).with_country(record))
                        }
                        None => GateState::Done(Verdict::allow(VerdictReason::CountryUnresolved)),
                    }
                }
                GateState::Done(verdict) => break verdict,
            };
        };

        info!("Login from {}: {}", peer.trim(), verdict);
        if let Some(metrics) = &self.metrics {
            metrics.record_verdict(&verdict);
        }
        verdict
    }

    /// Validate the database and look up `address` within the deadline
    fn resolve_country(
        &self,
        settings: &GateSettings,
        address: &ClientAddress,
    ) -> Result<Option<GeoRecord>, LookupError> {
        let started = Instant::now();

        let db = self
            .inspector
            .validate(settings.database_path.as_str())
            .map_err(|e| LookupError::Database(database_message(&e)))?;
        let result = self.resolver.lookup(&db, address);

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_lookup(elapsed);
        }

        match settings.lookup_deadline {
            Some(deadline) if elapsed > deadline => Err(LookupError::DeadlineExceeded {
                elapsed_ms: elapsed.as_millis(),
            }),
            _ => result,
        }
    }

    fn unresolved(&self, key: &str) -> Verdict {
        self.count(CounterKind::Unresolved, key);
        Verdict::allow(VerdictReason::CountryUnresolved)
    }

    fn count(&self, kind: CounterKind, key: &str) {
        if let Err(e) = self.counters.increment(kind, key) {
            error!("Failed to update {} counter for {}: {:#}", kind, key, e);
        }
    }

    /// Check the stored settings and publish notices for anything the
    /// operator has to fix
    pub fn check_settings(
        &self,
        settings: &GateSettings,
        peer: &str,
        headers: &RequestHeaders,
    ) -> SettingsReport {
        let database = self.inspector.validate(settings.database_path.as_str());
        if let Err(e) = &database {
            warn!("GeoIP database check failed: {}", e);
            self.notices.publish(Notice::error(database_message(e)));
        }

        let proxy_signals = detect_possible_proxy(peer, headers);
        if settings.proxy.header.is_none() && !settings.proxy.disable_warning && !proxy_signals.is_empty() {
            let names: Vec<&str> = proxy_signals.iter().map(|s| s.header.as_str()).collect();
            self.notices.publish(Notice::warning(format!(
                "Reverse proxy detected but no Client IP header set. Candidate headers: {}",
                names.join(", ")
            )));
        }

        SettingsReport {
            database,
            proxy_signals,
        }
    }

    /// Country of the last allowed login of `identity`
    pub fn last_login_country(&self, identity: &str) -> Option<String> {
        self.counters.last_country(identity)
    }
}

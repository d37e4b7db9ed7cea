//! Login Gate Integration Tests

use anyhow::Result;
use countrygate::config::ProxyConfig;
use countrygate::error::{AuthError, LookupError};
use countrygate::gate::{GateSettings, LoginGate};
use countrygate::geoip::{
    known_country_codes, CountryResolver, DatabaseHandle, DatabaseInspector, GeoRecord,
    StaticCountryResolver,
};
use countrygate::metrics::GateMetrics;
use countrygate::notice::{NoticeQueue, Severity};
use countrygate::policy::{set_policy, PolicyMode};
use countrygate::proxy::{ClientAddress, RequestHeaders};
use countrygate::stats::{CounterKind, CounterStore, MemoryCounterStore};
use countrygate::verdict::{Decision, VerdictReason};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tempfile::TempDir;

const TRAILER: &str =
    "GEO-106FREE 20141007 Build 1 Copyright (c) 2014 MaxMind Inc All Rights Reserved";

struct Harness {
    gate: LoginGate,
    counters: Arc<MemoryCounterStore>,
    notices: Arc<NoticeQueue>,
    _dir: TempDir,
    database_path: String,
}

fn write_database(dir: &Path) -> Result<String> {
    let path = dir.join("GeoIP.dat");
    let mut bytes = vec![0u8; 256];
    bytes.extend_from_slice(TRAILER.as_bytes());
    fs::write(&path, bytes)?;
    Ok(path.to_string_lossy().into_owned())
}

fn harness_with(resolver: Arc<dyn CountryResolver>) -> Result<Harness> {
    let dir = TempDir::new()?;
    let database_path = write_database(dir.path())?;
    let counters = Arc::new(MemoryCounterStore::new());
    let notices = Arc::new(NoticeQueue::new());
    let gate = LoginGate::new(resolver, counters.clone(), notices.clone())
        .with_inspector(Arc::new(DatabaseInspector::uncached()))
        .with_metrics(GateMetrics::new()?);

    Ok(Harness {
        gate,
        counters,
        notices,
        _dir: dir,
        database_path,
    })
}

fn harness() -> Result<Harness> {
    let resolver = StaticCountryResolver::new()
        .with_range("1.2.3.0/24", "CN")?
        .with_range("8.8.8.0/24", "US")?
        .with_range("5.6.7.0/24", "FR")?
        .with_range("2a00:1450::/32", "DE")?;
    harness_with(Arc::new(resolver))
}

fn settings(h: &Harness, mode: PolicyMode, countries: &str) -> GateSettings {
    GateSettings {
        database_path: h.database_path.clone(),
        policy: set_policy(mode, countries, &known_country_codes()),
        track_last_login_country: true,
        ..GateSettings::default()
    }
}

/// Resolver that always fails, as an unreadable database would
struct FailingResolver;

impl CountryResolver for FailingResolver {
    fn lookup(&self, _db: &DatabaseHandle, _ip: &ClientAddress) -> Result<Option<GeoRecord>, LookupError> {
        Err(LookupError::Database("simulated read failure".to_string()))
    }
}

/// Resolver slower than any sensible deadline
struct SlowResolver(Duration);

impl CountryResolver for SlowResolver {
    fn lookup(&self, _db: &DatabaseHandle, _ip: &ClientAddress) -> Result<Option<GeoRecord>, LookupError> {
        sleep(self.0);
        Ok(GeoRecord::from_code("CN"))
    }
}

#[test]
fn test_blacklisted_country_is_denied() -> Result<()> {
    let h = harness()?;
    let settings = settings(&h, PolicyMode::Blacklist, "CN");

    let result = h
        .gate
        .authenticate(&settings, Ok("alice".to_string()), "1.2.3.4", &RequestHeaders::new());

    let err = result.unwrap_err();
    assert!(err.is_invalid_country());
    assert!(err.message.contains("China"));
    assert_eq!(h.counters.snapshot(CounterKind::Denied).get("CN"), Some(&1));
    assert!(h.notices.is_empty());
    Ok(())
}

#[test]
fn test_whitelist_denies_unlisted_country() -> Result<()> {
    let h = harness()?;
    let settings = settings(&h, PolicyMode::Whitelist, "US,DE");

    let verdict = h.gate.evaluate(&settings, "5.6.7.8", &RequestHeaders::new());
    assert_eq!(verdict.decision, Decision::Deny);
    assert_eq!(verdict.reason, VerdictReason::DeniedByPolicy);
    assert_eq!(verdict.country_name(), Some("France"));
    Ok(())
}

#[test]
fn test_whitelist_allows_listed_country() -> Result<()> {
    let h = harness()?;
    let settings = settings(&h, PolicyMode::Whitelist, "US,DE");

    let verdict = h.gate.evaluate(&settings, "2a00:1450:4001::1", &RequestHeaders::new());
    assert_eq!(verdict.decision, Decision::Allow);
    assert_eq!(verdict.reason, VerdictReason::AllowedByPolicy);
    assert_eq!(h.counters.snapshot(CounterKind::Allowed).get("DE"), Some(&1));
    Ok(())
}

#[test]
fn test_loopback_address_is_unresolved() -> Result<()> {
    let h = harness()?;
    let settings = settings(&h, PolicyMode::Whitelist, "US");

    let verdict = h.gate.evaluate(&settings, "127.0.0.1", &RequestHeaders::new());
    assert_eq!(verdict.decision, Decision::Allow);
    assert_eq!(verdict.reason, VerdictReason::CountryUnresolved);
    assert_eq!(h.counters.snapshot(CounterKind::Unresolved).get("127.0.0.1"), Some(&1));
    assert!(h.notices.is_empty());
    Ok(())
}

#[test]
fn test_override_skips_every_check() -> Result<()> {
    let h = harness_with(Arc::new(FailingResolver))?;
    let mut settings = settings(&h, PolicyMode::Whitelist, "US");
    settings.override_active = true;

    let verdict = h.gate.evaluate(&settings, "1.2.3.4", &RequestHeaders::new());
    assert_eq!(verdict.reason, VerdictReason::OverrideActive);
    assert!(h.notices.is_empty());
    assert!(h.counters.snapshot(CounterKind::Unresolved).is_empty());
    Ok(())
}

#[test]
fn test_empty_policy_is_inert() -> Result<()> {
    let h = harness_with(Arc::new(FailingResolver))?;
    let settings = settings(&h, PolicyMode::Whitelist, "");

    let verdict = h.gate.evaluate(&settings, "1.2.3.4", &RequestHeaders::new());
    assert!(verdict.is_allowed());
    assert_eq!(verdict.reason, VerdictReason::PolicyEmpty);
    assert!(h.notices.is_empty());
    Ok(())
}

#[test]
fn test_upstream_error_passes_through() -> Result<()> {
    let h = harness()?;
    let settings = settings(&h, PolicyMode::Blacklist, "CN");
    let upstream = AuthError::new("incorrect_password", "Wrong password");

    let result = h
        .gate
        .authenticate::<String>(&settings, Err(upstream.clone()), "1.2.3.4", &RequestHeaders::new());

    assert_eq!(result.unwrap_err(), upstream);
    assert!(h.counters.snapshot(CounterKind::Denied).is_empty());
    Ok(())
}

#[test]
fn test_lookup_failure_fails_open() -> Result<()> {
    let h = harness_with(Arc::new(FailingResolver))?;
    let settings = settings(&h, PolicyMode::Whitelist, "US");

    let result = h
        .gate
        .authenticate(&settings, Ok("bob".to_string()), "1.2.3.4", &RequestHeaders::new());
    assert_eq!(result?, "bob");

    assert_eq!(h.counters.snapshot(CounterKind::Unresolved).get("1.2.3.4"), Some(&1));
    let notices = h.notices.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].severity, Severity::Warning);
    assert!(notices[0].text.contains("simulated read failure"));

    let metrics = h.gate.metrics().unwrap();
    assert_eq!(metrics.lookup_errors(), 1);
    Ok(())
}

#[test]
fn test_missing_database_fails_open() -> Result<()> {
    let h = harness()?;
    let mut settings = settings(&h, PolicyMode::Blacklist, "CN");
    fs::remove_file(&h.database_path)?;

    let verdict = h.gate.evaluate(&settings, "1.2.3.4", &RequestHeaders::new());
    assert_eq!(verdict.reason, VerdictReason::CountryUnresolved);
    assert_eq!(h.notices.len(), 1);

    settings.database_path = String::new();
    let verdict = h.gate.evaluate(&settings, "1.2.3.4", &RequestHeaders::new());
    assert_eq!(verdict.reason, VerdictReason::CountryUnresolved);
    assert_eq!(h.counters.snapshot(CounterKind::Unresolved).get("1.2.3.4"), Some(&2));
    Ok(())
}

#[test]
fn test_slow_lookup_exceeds_deadline() -> Result<()> {
    let h = harness_with(Arc::new(SlowResolver(Duration::from_millis(50))))?;
    let mut settings = settings(&h, PolicyMode::Blacklist, "CN");
    settings.lookup_deadline = Some(Duration::from_millis(5));

    let verdict = h.gate.evaluate(&settings, "1.2.3.4", &RequestHeaders::new());
    assert!(verdict.is_allowed());
    assert_eq!(verdict.reason, VerdictReason::CountryUnresolved);
    assert!(h.notices.drain()[0].text.contains("deadline"));

    settings.lookup_deadline = None;
    let verdict = h.gate.evaluate(&settings, "1.2.3.4", &RequestHeaders::new());
    assert_eq!(verdict.decision, Decision::Deny);
    Ok(())
}

#[test]
fn test_client_ip_from_proxy_header() -> Result<()> {
    let h = harness()?;
    let mut settings = settings(&h, PolicyMode::Blacklist, "CN");
    settings.proxy = ProxyConfig {
        header: Some("HTTP_X_REAL_IP".to_string()),
        disable_warning: false,
    };

    let mut headers = RequestHeaders::new();
    headers.insert("X-Real-IP", "1.2.3.4");
    let verdict = h.gate.evaluate(&settings, "10.0.0.5", &headers);
    assert_eq!(verdict.decision, Decision::Deny);

    // Missing header: the peer address is not used instead
    let verdict = h.gate.evaluate(&settings, "10.0.0.5", &RequestHeaders::new());
    assert_eq!(verdict.reason, VerdictReason::CountryUnresolved);
    let notices = h.notices.drain();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].text.contains("X_REAL_IP"));
    Ok(())
}

#[test]
fn test_invalid_peer_is_not_counted() -> Result<()> {
    let h = harness()?;
    let settings = settings(&h, PolicyMode::Blacklist, "CN");

    let verdict = h.gate.evaluate(&settings, "  not-an-ip ", &RequestHeaders::new());
    assert!(verdict.is_allowed());
    assert_eq!(verdict.reason, VerdictReason::CountryUnresolved);
    assert!(h.counters.snapshot(CounterKind::Unresolved).is_empty());
    assert_eq!(h.notices.drain()[0].severity, Severity::Warning);
    Ok(())
}

#[test]
fn test_last_login_country_is_recorded() -> Result<()> {
    let h = harness()?;
    let mut settings = settings(&h, PolicyMode::Blacklist, "CN");

    h.gate
        .authenticate(&settings, Ok("carol".to_string()), "8.8.8.8", &RequestHeaders::new())?;
    assert_eq!(h.gate.last_login_country("carol").as_deref(), Some("US"));

    settings.track_last_login_country = false;
    h.gate
        .authenticate(&settings, Ok("dave".to_string()), "8.8.8.8", &RequestHeaders::new())?;
    assert_eq!(h.gate.last_login_country("dave"), None);
    Ok(())
}

#[test]
fn test_verdicts_reach_metrics() -> Result<()> {
    let h = harness()?;
    let settings = settings(&h, PolicyMode::Blacklist, "CN");

    let denied = h.gate.evaluate(&settings, "1.2.3.4", &RequestHeaders::new());
    h.gate.evaluate(&settings, "1.2.3.5", &RequestHeaders::new());

    let metrics = h.gate.metrics().unwrap();
    assert_eq!(metrics.verdict_count(&denied), 2);
    assert!(metrics.render().contains("countrygate_verdicts_total"));
    Ok(())
}

#[test]
fn test_check_settings_reports_problems() -> Result<()> {
    let h = harness()?;
    let mut settings = settings(&h, PolicyMode::Blacklist, "CN");
    settings.database_path = "/nonexistent/GeoIP.dat".to_string();

    let mut headers = RequestHeaders::new();
    headers.insert("X-Forwarded-For", "8.8.8.8");
    let report = h.gate.check_settings(&settings, "10.0.0.1", &headers);

    assert!(report.database.is_err());
    assert!(!report.proxy_signals.is_empty());
    let severities: Vec<Severity> = h.notices.drain().iter().map(|n| n.severity).collect();
    assert_eq!(severities, vec![Severity::Error, Severity::Warning]);

    settings.proxy.disable_warning = true;
    settings.database_path = h.database_path.clone();
    let report = h.gate.check_settings(&settings, "10.0.0.1", &headers);
    assert!(report.database.is_ok());
    assert!(h.notices.is_empty());
    Ok(())
}

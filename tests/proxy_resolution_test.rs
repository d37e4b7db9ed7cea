//! Client IP Header Integration Tests

use anyhow::Result;
use countrygate::config::ProxyConfig;
use countrygate::geoip::{validate_database, CountryResolver, GeoRecord, StaticCountryResolver};
use countrygate::notice::{NoticeQueue, Severity};
use countrygate::proxy::{
    check_proxy_header, detect_possible_proxy, sanitize_proxy_settings, ClientAddress,
    ProxyHeaderResolver, RequestHeaders,
};
use std::fs;
use tempfile::TempDir;

fn request(lines: &[&str]) -> RequestHeaders {
    let mut headers = RequestHeaders::new();
    for line in lines {
        assert!(headers.insert_line(line));
    }
    headers
}

#[test]
fn test_header_check_reports_country() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("GeoIP.dat");
    fs::write(
        &path,
        b"\0\0\0GEO-106FREE 20141007 Build 1 Copyright (c) 2014 MaxMind Inc All Rights Reserved",
    )?;
    let db = validate_database(&path)?;
    let resolver = StaticCountryResolver::parse_table("81.2.69.0/24 GB\n# comment\n")?;

    let geo = |ip: &ClientAddress| -> Option<GeoRecord> { resolver.lookup(&db, ip).ok().flatten() };
    let headers = request(&["X-Real-IP: 81.2.69.160", "X-Client-IP: 8.8.8.8"]);

    let check = check_proxy_header("HTTP_X_REAL_IP", "10.0.0.1", &headers, Some(&geo));
    assert_eq!(check.status, Severity::Success);
    assert_eq!(check.header, "X_REAL_IP");
    assert_eq!(
        check.message,
        "Found IP 81.2.69.160 which is located in United Kingdom (GB)."
    );

    let check = check_proxy_header("X-Client-IP", "10.0.0.1", &headers, Some(&geo));
    assert_eq!(check.status, Severity::Warning);
    assert!(check.is_acceptable());
    assert_eq!(
        check.message,
        "Found IP 8.8.8.8 which could not be resolved to a country."
    );
    Ok(())
}

#[test]
fn test_operator_submission_round() {
    let notices = NoticeQueue::new();
    let current = ProxyConfig::default();
    let headers = request(&["X-Forwarded-For: 203.0.113.7, 10.0.0.2", "X-Real-IP: 203.0.113.7"]);

    // Detected proxy, no header chosen, warning not silenced
    let stored = sanitize_proxy_settings(&current, "", false, "10.0.0.2", &headers, &notices);
    assert_eq!(stored, ProxyConfig::default());
    assert_eq!(notices.drain().len(), 1);
    assert_eq!(detect_possible_proxy("10.0.0.2", &headers).len(), 2);

    // A header that is not present is rejected
    let stored = sanitize_proxy_settings(&current, "X-Cluster-Client-IP", false, "10.0.0.2", &headers, &notices);
    assert_eq!(stored.header, None);
    assert_eq!(notices.drain()[0].severity, Severity::Error);

    // A working header is stored and drives resolution
    let stored = sanitize_proxy_settings(&current, "x-real-ip", true, "10.0.0.2", &headers, &notices);
    assert_eq!(stored.header.as_deref(), Some("X_REAL_IP"));
    assert!(!stored.disable_warning);
    assert!(notices.is_empty());

    let address = ProxyHeaderResolver::from_config(&stored)
        .resolve("10.0.0.2", &headers)
        .map(|a| a.to_string());
    assert_eq!(address.as_deref(), Ok("203.0.113.7"));
}

#[test]
fn test_list_valued_header_is_rejected() {
    let headers = request(&["X-Forwarded-For: 203.0.113.7, 10.0.0.2"]);
    let resolver = ProxyHeaderResolver::new(Some("X-Forwarded-For"));

    let err = resolver.resolve("10.0.0.2", &headers).unwrap_err();
    assert!(err.to_string().contains("does not contain a valid IP address"));
}

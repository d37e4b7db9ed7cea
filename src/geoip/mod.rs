//! GeoIP database handling and country resolution

pub mod countries;
pub mod database;
pub mod discovery;
#[cfg(feature = "geoip")]
pub mod maxmind;
pub mod resolver;

pub use countries::{country_name, is_known_country, known_country_codes, COUNTRIES};
pub use database::{
    looks_like_geo_database, parse_legacy_trailer, sentinel_build_date, validate_database,
    DatabaseFormat, DatabaseHandle, DatabaseInspector, DEFAULT_BUILD_DATE_TTL,
};
pub use discovery::{discover_candidate_databases, DatabaseCandidate, DEFAULT_SEARCH_DEPTH};
#[cfg(feature = "geoip")]
pub use maxmind::MaxMindCountryResolver;
pub use resolver::{CountryResolver, GeoRecord, StaticCountryResolver};

use std::path::Path;

use crate::error::DatabaseError;

/// Outcome of submitting a new database path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedPath {
    /// Path to store
    pub path: String,
    /// Validation message for the submitted path
    pub message: String,
    /// Whether the submitted path is valid
    pub valid: bool,
}

/// Decide which database path to keep when an operator submits `submitted`.
///
/// A valid submission is stored. Otherwise a currently valid path is kept,
/// else the non-empty submission is stored so it can be corrected, else the
/// path is cleared.
pub fn sanitize_database_path(
    inspector: &DatabaseInspector,
    current: &str,
    submitted: &str,
) -> SanitizedPath {
    let submitted = submitted.trim();
    match inspector.validate(submitted) {
        Ok(handle) => SanitizedPath {
            path: submitted.to_string(),
            message: handle.describe(),
            valid: true,
        },
        Err(err) => {
            let current_valid =
                !current.is_empty() && inspector.validate(Path::new(current)).is_ok();
            let path = if current_valid {
                current.to_string()
            } else {
                submitted.to_string()
            };
            SanitizedPath {
                path,
                message: database_message(&err),
                valid: false,
            }
        }
    }
}

/// Operator facing message for a rejected database, including the
/// filesystem detail when one may be shown
pub fn database_message(err: &DatabaseError) -> String {
    match err.detail() {
        Some(detail) => format!("{} ({})", err, detail),
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TRAILER: &[u8] = b"GEO-106FREE 20141007 Build 1 Copyright (c) 2014 MaxMind Inc All Rights Reserved";

    #[test]
    fn test_sanitize_database_path() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("GeoIP.dat");
        std::fs::write(&good, TRAILER).unwrap();
        let good = good.to_string_lossy().to_string();
        let bad = dir.path().join("GeoLite.dat").to_string_lossy().to_string();
        let inspector = DatabaseInspector::uncached();

        let kept = sanitize_database_path(&inspector, &good, &bad);
        assert_eq!(kept.path, good);
        assert!(!kept.valid);
        assert!(kept.message.starts_with("The specified GeoIP database file does not exist"));

        let stored = sanitize_database_path(&inspector, "", &bad);
        assert_eq!(stored.path, bad);

        let cleared = sanitize_database_path(&inspector, "", "  ");
        assert_eq!(cleared.path, "");
        assert_eq!(cleared.message, "You have not specified a GeoIP database.");

        let accepted = sanitize_database_path(&inspector, &bad, &good);
        assert!(accepted.valid);
        assert_eq!(accepted.path, good);
        assert_eq!(
            accepted.message,
            "The GeoIP database file (published on 07-10-2014) is valid."
        );
    }
}

//! GeoIP database validation
//!
//! A database is only handed to resolvers after it passed every check here:
//! it exists, can be opened, and its trailer carries a vendor signature. The
//! build date is informational; a malformed date never rejects a database.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::error::DatabaseError;

/// Bytes at the end of a legacy database holding the copyright trailer
const LEGACY_TRAILER_LEN: u64 = 100;

/// Upper bound of a MaxMind DB metadata section
const MMDB_METADATA_MAX_LEN: u64 = 128 * 1024;

/// Marker opening the metadata section of a MaxMind DB file
const MMDB_METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Default lifetime of a cached build date
pub const DEFAULT_BUILD_DATE_TTL: Duration = Duration::from_secs(20);

/// On-disk database flavour, recognized by its trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseFormat {
    /// Legacy GeoIP `.dat` with a copyright trailer
    Legacy,
    /// MaxMind DB (`.mmdb`)
    MaxMind,
}

/// Build date used when the trailer's date token cannot be parsed
pub fn sentinel_build_date() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1, 0).unwrap_or_default()
}

/// A database file that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    path: PathBuf,
    format: DatabaseFormat,
    build_date: DateTime<Utc>,
}

impl DatabaseHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> DatabaseFormat {
        self.format
    }

    pub fn build_date(&self) -> DateTime<Utc> {
        self.build_date
    }

    /// True if the build date could not be read from the file
    pub fn has_sentinel_date(&self) -> bool {
        self.build_date == sentinel_build_date()
    }

    /// Publication day as the vendor states it
    pub fn publish_day(&self) -> String {
        self.build_date
            .with_timezone(&New_York)
            .format("%d-%m-%Y")
            .to_string()
    }

    /// Operator facing validity message
    pub fn describe(&self) -> String {
        format!(
            "The GeoIP database file (published on {}) is valid.",
            self.publish_day()
        )
    }
}

/// Check whether a path superficially looks like a GeoIP database file.
///
/// The path must end in `.dat` or `.mmdb` and either contain `geoip` or
/// `geolite` anywhere, or `geo` in the file name.
pub fn looks_like_geo_database(path: &Path) -> bool {
    let full = path.to_string_lossy().to_lowercase();
    if !(full.ends_with(".dat") || full.ends_with(".mmdb")) {
        return false;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    full.contains("geoip") || full.contains("geolite") || file_name.contains("geo")
}

/// Validate a database file without caching
pub fn validate_database(path: impl AsRef<Path>) -> Result<DatabaseHandle, DatabaseError> {
    DatabaseInspector::uncached().validate(path)
}

#[derive(Debug, Clone)]
struct CachedBuildDate {
    len: u64,
    modified: Option<SystemTime>,
    format: DatabaseFormat,
    build_date: DateTime<Utc>,
    cached_at: Instant,
}

/// Validates database files, caching parsed build dates for a short time.
///
/// A cache entry is only reused while the file keeps its size and
/// modification time, so replacing the database invalidates it.
#[derive(Debug)]
pub struct DatabaseInspector {
    ttl: Duration,
    cache: Mutex<HashMap<PathBuf, CachedBuildDate>>,
}

impl Default for DatabaseInspector {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_DATE_TTL)
    }
}

impl DatabaseInspector {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Inspector that never reuses a parsed build date
    pub fn uncached() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Validate `path`, producing a usable handle or the reason it was rejected
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<DatabaseHandle, DatabaseError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(DatabaseError::NotConfigured);
        }

        self.check(path).map_err(|err| {
            debug!("GeoIP database {} rejected: {:?}", path.display(), err);
            if looks_like_geo_database(path) {
                err
            } else {
                DatabaseError::Invalid
            }
        })
    }

    /// Drop the cached build date of `path`
    pub fn invalidate(&self, path: &Path) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn check(&self, path: &Path) -> Result<DatabaseHandle, DatabaseError> {
        let metadata = std::fs::metadata(path).map_err(|e| DatabaseError::Missing {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        if !metadata.is_file() {
            return Err(DatabaseError::InvalidFormat {
                path: path.to_path_buf(),
            });
        }

        let mut file = File::open(path).map_err(|e| DatabaseError::Unreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        let len = metadata.len();
        let modified = metadata.modified().ok();

        if let Some(cached) = self.cached(path, len, modified) {
            return Ok(DatabaseHandle {
                path: path.to_path_buf(),
                format: cached.format,
                build_date: cached.build_date,
            });
        }

        let (format, build_date) = read_signature(path, &mut file, len).ok_or_else(|| {
            DatabaseError::InvalidFormat {
                path: path.to_path_buf(),
            }
        })?;

        if build_date != sentinel_build_date() && !self.ttl.is_zero() {
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(
                    path.to_path_buf(),
                    CachedBuildDate {
                        len,
                        modified,
                        format,
                        build_date,
                        cached_at: Instant::now(),
                    },
                );
        }

        Ok(DatabaseHandle {
            path: path.to_path_buf(),
            format,
            build_date,
        })
    }

    fn cached(&self, path: &Path, len: u64, modified: Option<SystemTime>) -> Option<CachedBuildDate> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(path)?;
        if entry.len == len && entry.modified == modified && entry.cached_at.elapsed() < self.ttl {
            return Some(entry.clone());
        }
        cache.remove(path);
        None
    }
}

/// Read the file tail and identify the database format and build date
fn read_signature(path: &Path, file: &mut File, len: u64) -> Option<(DatabaseFormat, DateTime<Utc>)> {
    let tail = read_tail(file, len, LEGACY_TRAILER_LEN).ok()?;
    if let Some(build_date) = parse_legacy_trailer(&tail) {
        return Some((DatabaseFormat::Legacy, build_date));
    }

    let tail = read_tail(file, len, MMDB_METADATA_MAX_LEN).ok()?;
    if contains(&tail, MMDB_METADATA_MARKER) {
        return Some((DatabaseFormat::MaxMind, maxmind_build_date(path)?));
    }

    None
}

fn read_tail(file: &mut File, len: u64, max: u64) -> std::io::Result<Vec<u8>> {
    let start = len.saturating_sub(max);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.by_ref().take(max).read_to_end(&mut buf)?;
    Ok(buf)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Parse the copyright trailer of a legacy database.
///
/// The trailer looks like
/// `GEO-106FREE 20141007 Build 1 Copyright (c) 2014 MaxMind Inc All Rights Reserved`.
/// Returns `None` when the vendor signature is missing. A malformed or
/// missing date token yields the sentinel build date.
pub fn parse_legacy_trailer(tail: &[u8]) -> Option<DateTime<Utc>> {
    let text = String::from_utf8_lossy(tail);
    if !text.to_lowercase().contains("maxmind inc") {
        return None;
    }

    let start = text.find("GEO-").unwrap_or(0);
    let mut trailer = &text[start..];
    if let Some(end) = trailer.find("Reserved") {
        trailer = &trailer[..end + "Reserved".len()];
    }

    let token = trailer.split(' ').nth(1).unwrap_or_default();
    match parse_build_day(token) {
        Some(date) => Some(date),
        None => {
            warn!("GeoIP database trailer has a malformed build date: {:?}", token);
            Some(sentinel_build_date())
        }
    }
}

/// Interpret a `YYYYMMDD` token as midnight in the vendor's time zone
fn parse_build_day(token: &str) -> Option<DateTime<Utc>> {
    if token.len() != 8 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day = NaiveDate::parse_from_str(token, "%Y%m%d").ok()?;
    let midnight = day.and_hms_opt(0, 0, 0)?;
    New_York
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(feature = "geoip")]
fn maxmind_build_date(path: &Path) -> Option<DateTime<Utc>> {
    match maxminddb::Reader::open_readfile(path) {
        Ok(reader) => {
            let epoch = i64::try_from(reader.metadata.build_epoch).unwrap_or_default();
            Some(DateTime::<Utc>::from_timestamp(epoch, 0).unwrap_or_else(|| {
                warn!("MaxMind DB {} has an invalid build epoch", path.display());
                sentinel_build_date()
            }))
        }
        Err(e) => {
            debug!("MaxMind DB {} failed to open: {}", path.display(), e);
            None
        }
    }
}

#[cfg(not(feature = "geoip"))]
fn maxmind_build_date(path: &Path) -> Option<DateTime<Utc>> {
    warn!(
        "MaxMind DB {} recognized but build date unavailable (geoip feature disabled)",
        path.display()
    );
    Some(sentinel_build_date())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const TRAILER: &str = "GEO-106FREE 20141007 Build 1 Copyright (c) 2014 MaxMind Inc All Rights Reserved";

    fn write_file(dir: &TempDir, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(body).unwrap();
        path
    }

    fn legacy_db(trailer: &str) -> Vec<u8> {
        let mut body = vec![0u8; 4096];
        body.extend_from_slice(&[0xff, 0xff, 0xff]);
        body.extend_from_slice(trailer.as_bytes());
        body
    }

    #[test]
    fn test_looks_like_geo_database() {
        assert!(looks_like_geo_database(Path::new("/srv/GeoIP.dat")));
        assert!(looks_like_geo_database(Path::new("/srv/geolite/city.dat")));
        assert!(looks_like_geo_database(Path::new("/srv/data/mygeo.dat")));
        assert!(looks_like_geo_database(Path::new("/srv/GeoLite2-Country.mmdb")));
        assert!(!looks_like_geo_database(Path::new("/srv/GeoIP.txt")));
        assert!(!looks_like_geo_database(Path::new("/etc/passwd")));
        assert!(!looks_like_geo_database(Path::new("/srv/geo/countries.dat")));
    }

    #[test]
    fn test_parse_legacy_trailer() {
        let date = parse_legacy_trailer(TRAILER.as_bytes()).unwrap();
        // midnight in New York is 04:00 UTC during daylight saving time
        assert_eq!(date.to_rfc3339(), "2014-10-07T04:00:00+00:00");

        let winter = TRAILER.replace("20141007", "20150106");
        let date = parse_legacy_trailer(winter.as_bytes()).unwrap();
        assert_eq!(date.to_rfc3339(), "2015-01-06T05:00:00+00:00");
    }

    #[test]
    fn test_trailer_without_signature() {
        assert!(parse_legacy_trailer(b"GEO-106FREE 20141007 Build 1 Copyright").is_none());
        assert!(parse_legacy_trailer(b"").is_none());
    }

    #[test]
    fn test_signature_without_edition_token() {
        let tail = b"FREE 2014 Build 1 Copyright (c) 2014 MaxMind Inc All Rights Reserved";
        assert_eq!(parse_legacy_trailer(tail), Some(sentinel_build_date()));

        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "GeoIP.dat", &legacy_db(std::str::from_utf8(tail).unwrap()));
        let handle = validate_database(&path).unwrap();
        assert_eq!(handle.format(), DatabaseFormat::Legacy);
        assert_eq!(handle.build_date().to_rfc3339(), "1970-01-01T00:00:01+00:00");
        assert!(handle.has_sentinel_date());
    }

    #[test]
    fn test_malformed_date_uses_sentinel() {
        let bad = TRAILER.replace("20141007", "2014-10-7");
        assert_eq!(parse_legacy_trailer(bad.as_bytes()), Some(sentinel_build_date()));

        let impossible = TRAILER.replace("20141007", "20141399");
        assert_eq!(parse_legacy_trailer(impossible.as_bytes()), Some(sentinel_build_date()));
    }

    #[test]
    fn test_validate_not_configured() {
        assert_eq!(validate_database(""), Err(DatabaseError::NotConfigured));
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = TempDir::new().unwrap();

        let err = validate_database(dir.path().join("GeoIP.dat")).unwrap_err();
        assert!(matches!(err, DatabaseError::Missing { .. }));
        assert!(err.detail().is_some());

        // nothing is revealed about files that do not look like a database
        let err = validate_database(dir.path().join("shadow")).unwrap_err();
        assert_eq!(err, DatabaseError::Invalid);
    }

    #[test]
    fn test_validate_valid_legacy_database() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "GeoIP.dat", &legacy_db(TRAILER));

        let handle = validate_database(&path).unwrap();
        assert_eq!(handle.format(), DatabaseFormat::Legacy);
        assert_eq!(handle.path(), path.as_path());
        assert_eq!(handle.publish_day(), "07-10-2014");
        assert_eq!(
            handle.describe(),
            "The GeoIP database file (published on 07-10-2014) is valid."
        );
        assert!(!handle.has_sentinel_date());
    }

    #[test]
    fn test_validate_corrupted_database() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "GeoLiteCity.dat", &[0x42; 512]);
        assert_eq!(
            validate_database(&path),
            Err(DatabaseError::InvalidFormat { path: path.clone() })
        );

        let other = write_file(&dir, "notes.bin", &[0x42; 512]);
        assert_eq!(validate_database(&other), Err(DatabaseError::Invalid));
    }

    #[test]
    fn test_validate_directory() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("GeoIP.dat");
        std::fs::create_dir(&sub).unwrap();
        assert!(matches!(validate_database(&sub), Err(DatabaseError::InvalidFormat { .. })));
    }

    #[test]
    fn test_small_file_is_read_whole() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "GeoIP.dat", TRAILER.as_bytes());
        assert!(validate_database(&path).is_ok());
    }

    #[test]
    fn test_cache_invalidated_when_file_changes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "GeoIP.dat", &legacy_db(TRAILER));
        let inspector = DatabaseInspector::new(Duration::from_secs(600));

        assert_eq!(inspector.validate(&path).unwrap().publish_day(), "07-10-2014");

        // a replacement with a different size must not reuse the cached date
        let newer = TRAILER.replace("20141007", "20150203") + " ";
        write_file(&dir, "GeoIP.dat", &legacy_db(&newer));
        assert_eq!(inspector.validate(&path).unwrap().publish_day(), "03-02-2015");

        // a corrupted replacement is rejected even though a date was cached
        write_file(&dir, "GeoIP.dat", &[0u8; 10]);
        assert!(inspector.validate(&path).is_err());
    }
}

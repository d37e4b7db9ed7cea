//! MaxMind DB country resolver

use chrono::{DateTime, Utc};
use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::database::{DatabaseFormat, DatabaseHandle};
use super::resolver::{CountryResolver, GeoRecord};
use crate::error::LookupError;
use crate::proxy::ClientAddress;

struct OpenReader {
    build_date: DateTime<Utc>,
    reader: Arc<Reader<Vec<u8>>>,
}

/// Country resolver reading `geoip2::Country` records.
///
/// Readers are opened on first use and reused while the database keeps the
/// build date it was validated with.
#[derive(Default)]
pub struct MaxMindCountryResolver {
    readers: Mutex<HashMap<PathBuf, OpenReader>>,
}

impl MaxMindCountryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn reader(&self, db: &DatabaseHandle) -> Result<Arc<Reader<Vec<u8>>>, LookupError> {
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(open) = readers.get(db.path()) {
            if open.build_date == db.build_date() {
                return Ok(open.reader.clone());
            }
        }

        debug!("Opening MaxMind DB {}", db.path().display());
        let reader = Arc::new(Reader::open_readfile(db.path()).map_err(map_error)?);
        readers.insert(
            db.path().to_path_buf(),
            OpenReader {
                build_date: db.build_date(),
                reader: reader.clone(),
            },
        );
        Ok(reader)
    }
}

impl CountryResolver for MaxMindCountryResolver {
    fn lookup(
        &self,
        db: &DatabaseHandle,
        ip: &ClientAddress,
    ) -> Result<Option<GeoRecord>, LookupError> {
        if db.format() != DatabaseFormat::MaxMind {
            return Err(LookupError::Database(format!(
                "{} is not a MaxMind DB file",
                db.path().display()
            )));
        }

        let reader = self.reader(db)?;
        match reader.lookup::<geoip2::Country>(ip.ip()) {
            Ok(record) => {
                let Some(country) = record.country else {
                    debug!("GeoIP lookup for {}: no country data", ip);
                    return Ok(Some(GeoRecord::new("", "")));
                };
                let code = country.iso_code.unwrap_or_default();
                let name = country
                    .names
                    .and_then(|names| names.get("en").copied())
                    .unwrap_or_default();
                debug!("GeoIP lookup for {}: {}", ip, code);
                Ok(Some(GeoRecord::new(code, name)))
            }
            Err(MaxMindDBError::AddressNotFoundError(_)) => {
                debug!("GeoIP lookup for {}: not found", ip);
                Ok(None)
            }
            Err(e) => {
                warn!("GeoIP lookup failed for {}: {}", ip, e);
                Err(map_error(e))
            }
        }
    }
}

fn map_error(err: MaxMindDBError) -> LookupError {
    LookupError::Database(err.to_string())
}

//! Error types for the login gate

use std::path::PathBuf;
use thiserror::Error;

/// Reasons a GeoIP database file is rejected.
///
/// `Missing` and `Unreadable` are only produced when the file name looks like
/// a GeoIP database; every other path collapses into `Invalid` so that the
/// message does not reveal anything about arbitrary files on disk.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("You have not specified a GeoIP database.")]
    NotConfigured,

    #[error("The specified GeoIP database file does not exist or your file access permissions aren't sufficient.")]
    Missing { path: PathBuf, detail: String },

    #[error("The specified GeoIP database file is not readable.")]
    Unreadable { path: PathBuf, detail: String },

    #[error("The specified GeoIP database file has an invalid format.")]
    InvalidFormat { path: PathBuf },

    #[error("The specified GeoIP database file is invalid.")]
    Invalid,
}

impl DatabaseError {
    /// Underlying filesystem detail, if it may be shown to the operator
    pub fn detail(&self) -> Option<&str> {
        match self {
            DatabaseError::Missing { detail, .. } | DatabaseError::Unreadable { detail, .. } => {
                Some(detail)
            }
            _ => None,
        }
    }
}

/// Failures while resolving an address to a country
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Invalid IP address: [{0}]")]
    InvalidAddress(String),

    #[error("GeoIP database I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoIP database error: {0}")]
    Database(String),

    #[error("GeoIP lookup exceeded its deadline ({elapsed_ms} ms)")]
    DeadlineExceeded { elapsed_ms: u128 },
}

/// Problems with the configured client IP header
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyHeaderError {
    #[error("The specified HTTP header {header} is not set on the server!")]
    HeaderMissing { header: String },

    #[error("The specified HTTP header {header} does not contain a valid IP address! Header content: {value}")]
    InvalidAddress { header: String, value: String },
}

/// Failures while determining the effective client address
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientIpError {
    #[error("Invalid IP address in peer address: [{0}]")]
    InvalidPeer(String),

    #[error(transparent)]
    Header(#[from] ProxyHeaderError),
}

/// Error handed back to the host authentication pipeline
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthError {
    pub code: String,
    pub message: String,
}

impl AuthError {
    /// Error code of a country based denial
    pub const INVALID_COUNTRY: &'static str = "invalid_country";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Denial carrying the resolved country's display name
    pub fn invalid_country(country_name: &str) -> Self {
        Self::new(
            Self::INVALID_COUNTRY,
            format!("Login not allowed from your country ({})!", country_name),
        )
    }

    pub fn is_invalid_country(&self) -> bool {
        self.code == Self::INVALID_COUNTRY
    }
}

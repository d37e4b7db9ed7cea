//! countrygate
//!
//! Country based login gate: resolves a client's address (optionally behind
//! a reverse proxy), maps it to a country with a GeoIP database and applies
//! a whitelist or blacklist policy. Infrastructure failures always fail
//! open so a broken database can never lock every administrator out.

pub mod config;
pub mod error;
pub mod gate;
pub mod geoip;
pub mod metrics;
pub mod notice;
pub mod policy;
pub mod proxy;
pub mod stats;
pub mod verdict;

pub use config::{Config, ConfigManager};
pub use error::{AuthError, ClientIpError, DatabaseError, LookupError, ProxyHeaderError};
pub use gate::{GateSettings, LoginGate};
pub use geoip::{CountryResolver, DatabaseHandle, GeoRecord, StaticCountryResolver};
pub use notice::{Notice, NoticeQueue, NoticeSink, Severity};
pub use policy::{PolicyEvaluator, PolicyMode, PolicySet};
pub use proxy::{ClientAddress, ProxyHeaderResolver, RequestHeaders};
pub use verdict::{Decision, Verdict, VerdictReason};

/// Common error type for configuration, persistence and the CLI
pub type Result<T> = anyhow::Result<T>;

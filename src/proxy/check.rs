//! Operator feedback on the configured client IP header

use tracing::debug;

use super::{normalize_header_name, proxy_detected, ClientAddress, RequestHeaders};
use crate::config::ProxyConfig;
use crate::geoip::GeoRecord;
use crate::notice::{Notice, NoticeSink, Severity};

/// Result of checking a client IP header against a live request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCheck {
    /// Normalized header name that was checked
    pub header: String,
    pub status: Severity,
    /// Empty on a plain success
    pub message: String,
}

impl HeaderCheck {
    fn new(header: String, status: Severity, message: impl Into<String>) -> Self {
        Self {
            header,
            status,
            message: message.into(),
        }
    }

    /// Errors reject the header; warnings still accept it
    pub fn is_acceptable(&self) -> bool {
        self.status != Severity::Error
    }
}

/// Check whether `header` carries a usable public client address in `headers`.
///
/// When `geo` is given the address is also resolved and the country is
/// reported.
pub fn check_proxy_header(
    header: &str,
    peer: &str,
    headers: &RequestHeaders,
    geo: Option<&dyn Fn(&ClientAddress) -> Option<GeoRecord>>,
) -> HeaderCheck {
    let header = normalize_header_name(header);

    if header.is_empty() {
        return if proxy_detected(peer, headers) {
            HeaderCheck::new(
                header,
                Severity::Warning,
                "Reverse proxy detected but no Client IP header set.",
            )
        } else {
            HeaderCheck::new(header, Severity::Success, "")
        };
    }

    let value = match headers.get(&header) {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => {
            return HeaderCheck::new(
                header,
                Severity::Error,
                "The specified HTTP header is not set on the server!",
            )
        }
    };

    let Ok(address) = ClientAddress::parse(&value) else {
        let message = format!(
            "The specified HTTP header does not contain a valid IP address! Header content: {}.",
            value
        );
        return HeaderCheck::new(header, Severity::Error, message);
    };

    if !address.is_public() {
        let message = format!("Found a private IP address ({})!", address);
        return HeaderCheck::new(header, Severity::Warning, message);
    }

    let Some(geo) = geo else {
        return HeaderCheck::new(header, Severity::Success, "");
    };

    match geo(&address).filter(GeoRecord::has_country) {
        Some(record) => {
            let message = format!(
                "Found IP {} which is located in {} ({}).",
                address,
                record.display_name(),
                record.country_code
            );
            HeaderCheck::new(header, Severity::Success, message)
        }
        None => {
            let message = format!(
                "Found IP {} which could not be resolved to a country.",
                address
            );
            HeaderCheck::new(header, Severity::Warning, message)
        }
    }
}

/// Produce the proxy settings to store for an operator submission.
///
/// A header failing the check is rejected and the current one kept. A
/// warning is published unless the operator silenced it. `disable_warning`
/// only survives while no header is configured.
pub fn sanitize_proxy_settings(
    current: &ProxyConfig,
    submitted_header: &str,
    submitted_disable_warning: bool,
    peer: &str,
    headers: &RequestHeaders,
    notices: &dyn NoticeSink,
) -> ProxyConfig {
    let check = check_proxy_header(submitted_header, peer, headers, None);
    debug!("Proxy header check for {:?}: {:?}", check.header, check.status);

    let header = match check.status {
        Severity::Error => {
            notices.publish(Notice::error(format!(
                "Client IP HTTP header: {}",
                check.message
            )));
            current.header.clone()
        }
        Severity::Warning => {
            if !submitted_disable_warning {
                notices.publish(Notice::warning(format!(
                    "Client IP HTTP header: {}",
                    check.message
                )));
            }
            Some(check.header)
        }
        Severity::Success => Some(check.header),
    }
    .filter(|h| !h.is_empty());

    ProxyConfig {
        disable_warning: header.is_none() && submitted_disable_warning,
        header,
    }
}

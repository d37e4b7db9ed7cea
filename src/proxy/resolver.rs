//! Effective client address resolution

use tracing::{debug, warn};

use super::{normalize_header_name, ClientAddress, RequestHeaders};
use crate::config::ProxyConfig;
use crate::error::{ClientIpError, ProxyHeaderError};

/// Determines the visitor's real address, trusting at most one configured
/// header set by a reverse proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyHeaderResolver {
    header: Option<String>,
}

impl ProxyHeaderResolver {
    /// Create a resolver trusting `header`. Blank names mean no proxy.
    pub fn new(header: Option<&str>) -> Self {
        let header = header
            .map(normalize_header_name)
            .filter(|h| !h.is_empty());
        Self { header }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.header.as_deref())
    }

    /// The normalized trusted header name, if any
    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    /// Resolve the client address of a request.
    ///
    /// Without a configured header the peer address is returned. With one,
    /// the header must be present and hold a single IP literal; anything
    /// else is a configuration error and the peer address is NOT used as a
    /// fallback.
    pub fn resolve(
        &self,
        peer: &str,
        headers: &RequestHeaders,
    ) -> Result<ClientAddress, ClientIpError> {
        let Some(header) = &self.header else {
            return ClientAddress::parse(peer)
                .map_err(|_| ClientIpError::InvalidPeer(peer.to_string()));
        };

        let value = match headers.get(header) {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                warn!("Configured client IP header {} is not set", header);
                return Err(ProxyHeaderError::HeaderMissing {
                    header: header.clone(),
                }
                .into());
            }
        };

        match ClientAddress::parse(value) {
            Ok(address) => {
                debug!("Client address {} taken from header {} (peer {})", address, header, peer);
                Ok(address)
            }
            Err(_) => {
                warn!("Configured client IP header {} holds no valid IP address: {}", header, value);
                Err(ProxyHeaderError::InvalidAddress {
                    header: header.clone(),
                    value: value.to_string(),
                }
                .into())
            }
        }
    }
}

/// Resolve the effective client address for `peer` given an optional trusted header
pub fn resolve_client_ip(
    peer: &str,
    configured_header: Option<&str>,
    headers: &RequestHeaders,
) -> Result<ClientAddress, ClientIpError> {
    ProxyHeaderResolver::new(configured_header).resolve(peer, headers)
}

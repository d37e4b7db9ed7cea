//! Best-effort reverse proxy detection for operator guidance.
//!
//! Nothing here takes part in the allow/deny decision.

use super::{ClientAddress, RequestHeaders};

/// A forwarding header the detector looks at
#[derive(Debug, Clone, Copy)]
pub struct ForwardingHeader {
    /// Normalized header name
    pub name: &'static str,
    /// Single-address headers only count when they carry a public IP
    pub single_address: bool,
}

/// Well-known forwarding headers, in reporting order
pub const FORWARDING_HEADERS: &[ForwardingHeader] = &[
    ForwardingHeader { name: "X_FORWARDED_FOR", single_address: false },
    ForwardingHeader { name: "X_REAL_IP", single_address: true },
    ForwardingHeader { name: "CF_CONNECTING_IP", single_address: true },
    ForwardingHeader { name: "TRUE_CLIENT_IP", single_address: true },
    ForwardingHeader { name: "X_CLIENT_IP", single_address: true },
    ForwardingHeader { name: "X_CLUSTER_CLIENT_IP", single_address: true },
    ForwardingHeader { name: "CLIENT_IP", single_address: true },
    ForwardingHeader { name: "FORWARDED_FOR", single_address: false },
    ForwardingHeader { name: "X_FORWARDED", single_address: false },
    ForwardingHeader { name: "FORWARDED", single_address: false },
    ForwardingHeader { name: "VIA", single_address: false },
];

/// One header suggesting a reverse proxy in front of the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySignal {
    pub header: String,
    pub value: String,
}

/// Scan `headers` for forwarding headers that differ from the peer address.
///
/// Signals are reported per header name in [`FORWARDING_HEADERS`] order;
/// equal values under different headers are all reported.
pub fn detect_possible_proxy(peer: &str, headers: &RequestHeaders) -> Vec<ProxySignal> {
    let peer = peer.trim();

    FORWARDING_HEADERS
        .iter()
        .filter_map(|candidate| {
            let value = headers.get(candidate.name)?.trim();
            if value.is_empty() || value == peer {
                return None;
            }
            if candidate.single_address {
                let address = ClientAddress::parse(value).ok()?;
                if !address.is_public() {
                    return None;
                }
            }
            Some(ProxySignal {
                header: candidate.name.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

/// True if any forwarding header suggests a reverse proxy
pub fn proxy_detected(peer: &str, headers: &RequestHeaders) -> bool {
    !detect_possible_proxy(peer, headers).is_empty()
}

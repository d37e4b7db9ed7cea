//! Client address resolution behind optional reverse proxies

pub mod address;
pub mod check;
pub mod detect;
pub mod headers;
pub mod resolver;

pub use address::{AddressFamily, ClientAddress};
pub use check::{check_proxy_header, sanitize_proxy_settings, HeaderCheck};
pub use detect::{detect_possible_proxy, proxy_detected, ForwardingHeader, ProxySignal, FORWARDING_HEADERS};
pub use headers::{normalize_header_name, RequestHeaders};
pub use resolver::{resolve_client_ip, ProxyHeaderResolver};

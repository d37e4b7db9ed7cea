//! Request header map with CGI style key normalization

use std::collections::HashMap;

/// Normalize a header name: uppercase, hyphens become underscores and an
/// optional `HTTP_` prefix is removed, so `X-Real-IP`, `x_real_ip` and
/// `HTTP_X_REAL_IP` all name the same header.
pub fn normalize_header_name(name: &str) -> String {
    let normalized: String = name
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() })
        .collect();

    match normalized.strip_prefix("HTTP_") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => normalized,
    }
}

/// Raw request headers of one authentication attempt
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    entries: HashMap<String, String>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing an earlier value under the same normalized name
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(normalize_header_name(name), value.into());
    }

    /// Look up a header by any spelling of its name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&normalize_header_name(name))
            .map(String::as_str)
    }

    /// Parse a `Name: value` or `Name=value` line
    pub fn insert_line(&mut self, line: &str) -> bool {
        let split = line.split_once(':').or_else(|| line.split_once('='));
        match split {
            Some((name, value)) if !name.trim().is_empty() => {
                self.insert(name, value.trim());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = RequestHeaders::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

//! Policy types and country list sanitation

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// How the country list is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Only listed countries may log in
    #[default]
    Whitelist,
    /// Listed countries may not log in
    Blacklist,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyMode::Whitelist => "whitelist",
            PolicyMode::Blacklist => "blacklist",
        }
    }
}

impl FromStr for PolicyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "whitelist" => Ok(PolicyMode::Whitelist),
            "blacklist" => Ok(PolicyMode::Blacklist),
            other => anyhow::bail!(
                "Invalid policy mode: {}. You must select either whitelist or blacklist.",
                other
            ),
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode plus the set of country codes it applies to.
///
/// Only built through [`set_policy`] (or [`PolicySet::empty`]), so every
/// stored code belongs to the known universe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    mode: PolicyMode,
    codes: BTreeSet<String>,
}

impl PolicySet {
    /// Inert policy without countries
    pub fn empty(mode: PolicyMode) -> Self {
        Self {
            mode,
            codes: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn codes(&self) -> &BTreeSet<String> {
        &self.codes
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(&code.trim().to_ascii_uppercase())
    }

    /// Comma separated code list, as stored in settings
    pub fn to_list(&self) -> String {
        self.codes.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// Sanitize a raw, comma separated country list.
///
/// Everything except letters and commas is stripped, the rest is uppercased
/// and split, duplicates and codes outside `known` are dropped. Order of
/// first appearance is kept.
pub fn sanitize_country_list(raw: &str, known: &BTreeSet<String>) -> Vec<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c == ',' || c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let mut seen = BTreeSet::new();

    cleaned
        .trim_matches(',')
        .split(',')
        .filter(|code| known.contains(*code))
        .filter(|code| seen.insert(code.to_string()))
        .map(str::to_string)
        .collect()
}

/// Build a policy from operator input. Unknown codes are dropped silently.
pub fn set_policy(mode: PolicyMode, raw_country_list: &str, known: &BTreeSet<String>) -> PolicySet {
    PolicySet {
        mode,
        codes: sanitize_country_list(raw_country_list, known)
            .into_iter()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoip::known_country_codes;
    use proptest::prelude::*;

    fn known(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_unknown_codes_are_dropped() {
        let policy = set_policy(PolicyMode::Whitelist, "XX,US,YY", &known(&["US", "DE"]));
        assert_eq!(policy.codes(), &known(&["US"]));
    }

    #[test]
    fn test_sanitize_strips_and_uppercases() {
        let universe = known_country_codes();
        assert_eq!(
            sanitize_country_list(" ,de; ,us ,,c1n, fr,us,", &universe),
            vec!["DE", "US", "CN", "FR"]
        );
        // separators other than commas glue codes together
        assert_eq!(sanitize_country_list("de; us", &universe), Vec::<String>::new());
        assert!(sanitize_country_list("", &universe).is_empty());
        assert!(sanitize_country_list(",,,", &universe).is_empty());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Blacklist".parse::<PolicyMode>().unwrap(), PolicyMode::Blacklist);
        assert_eq!("whitelist".parse::<PolicyMode>().unwrap(), PolicyMode::Whitelist);
        assert!("greylist".parse::<PolicyMode>().is_err());
        assert_eq!(PolicyMode::default(), PolicyMode::Whitelist);
    }

    #[test]
    fn test_to_list() {
        let policy = set_policy(PolicyMode::Blacklist, "us,cn", &known_country_codes());
        assert_eq!(policy.to_list(), "CN,US");
        assert!(policy.contains("cn"));
    }

    proptest! {
        #[test]
        fn test_sanitize_idempotent(raw in "[a-zA-Z ,;0-9-]{0,60}") {
            let universe = known_country_codes();
            let once = sanitize_country_list(&raw, &universe).join(",");
            let twice = sanitize_country_list(&once, &universe).join(",");
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_sanitized_codes_are_known(raw in "[a-zA-Z,]{0,60}") {
            let universe = known_country_codes();
            for code in sanitize_country_list(&raw, &universe) {
                prop_assert!(universe.contains(&code));
            }
        }
    }
}

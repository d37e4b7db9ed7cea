//! Whitelist / blacklist country policy

pub mod evaluator;
pub mod types;

pub use evaluator::PolicyEvaluator;
pub use types::{sanitize_country_list, set_policy, PolicyMode, PolicySet};

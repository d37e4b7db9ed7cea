//! Login gate orchestration

pub mod machine;
pub mod settings;

pub use machine::{Authenticated, LoginGate, SettingsReport};
pub use settings::GateSettings;

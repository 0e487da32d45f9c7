//! Configuration for the conduit bridge.
//!
//! Layered loading: compiled defaults, deep-merged JSON settings file,
//! environment variable overrides (highest priority).

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{ClusterSettings, ConduitSettings, ConnectionSettings};

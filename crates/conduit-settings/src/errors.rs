//! Settings error types.

/// Errors that can occur while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file or merged result is not valid.
    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Convenience result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

//! Error types for Flare

use thiserror::Error;

/// The main error type for Flare operations
#[derive(Debug, Error)]
pub enum FlareError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Particle system template not found: '{0}'")]
    TemplateNotFound(String),

    #[error("Invalid particle system template: {0}")]
    InvalidTemplate(String),

    #[error("Unknown particle priority: {0}")]
    UnknownPriority(String),

    #[error("Unsupported snapshot version: found {found}, newest supported is {supported}")]
    UnsupportedSnapshotVersion { found: u8, supported: u8 },

    #[error("Corrupt snapshot: {0}")]
    SnapshotCorrupt(String),

    #[error("Name too long for snapshot: {0} bytes")]
    NameTooLong(usize),
}

/// Result type alias for Flare operations
pub type Result<T> = std::result::Result<T, FlareError>;

impl From<toml::de::Error> for FlareError {
    fn from(err: toml::de::Error) -> Self {
        FlareError::TomlParseError(err.to_string())
    }
}

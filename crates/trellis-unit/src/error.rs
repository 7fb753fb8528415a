//! Error types for unit parsing and loading.

use thiserror::Error;

/// Errors produced while locating, reading or parsing compiled units.
#[derive(Error, Debug)]
pub enum UnitError {
    /// No consulted source provides the requested unit or entry.
    #[error("unit not found: {0}")]
    NotFound(String),

    /// The payload does not start with the expected magic bytes.
    #[error("not a recognized format (bad magic)")]
    BadMagic,

    /// The payload parsed but violates the format rules.
    #[error("malformed {name}: {message}")]
    Malformed { name: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error in a unit or bundle body.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UnitError {
    pub fn malformed(name: impl Into<String>, message: impl Into<String>) -> Self {
        UnitError::Malformed {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type for unit operations.
pub type UnitResult<T> = std::result::Result<T, UnitError>;

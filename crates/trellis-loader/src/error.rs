//! Error types and problem records for the loader.

use std::fmt;
use thiserror::Error;
use trellis_unit::UnitError;

/// Errors that can occur while bootstrapping or resolving units.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// A requested unit does not exist across any consulted source, or its
    /// resolution failed at some stage.
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// A descriptor field is malformed.
    #[error("invalid field '{field}': {message}")]
    Validation { field: String, message: String },

    /// A pack or plugin id collides with one already registered.
    #[error("{kind} id '{id}' defined twice")]
    DuplicateId { kind: &'static str, id: String },

    /// API misuse, e.g. registering after the freeze point or invoking an
    /// entrypoint that violates its calling contract.
    #[error("usage error: {0}")]
    Usage(String),

    /// A transformer declined a unit.
    #[error("transformer '{transformer}' rejected unit '{unit}'")]
    TransformRejected { unit: String, transformer: String },

    /// Caller-declared unrecoverable failure.
    #[error("{0}")]
    Critical(String),

    /// Unit format or source error.
    #[error(transparent)]
    Unit(#[from] UnitError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error in a descriptor.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoaderError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LoaderError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        LoaderError::Usage(message.into())
    }
}

/// Result type for loader operations.
pub type LoaderResult<T> = std::result::Result<T, LoaderError>;

/// One failure attributed to a responsible subject, recorded in a phase's
/// problem report. Non-critical problems escalate the owning phase to
/// warning; critical problems escalate it to fatal.
#[derive(Debug)]
pub struct Problem {
    error: LoaderError,
    critical: bool,
    subject: Option<String>,
}

impl Problem {
    pub fn new(error: LoaderError) -> Self {
        Self {
            error,
            critical: false,
            subject: None,
        }
    }

    /// Mark this problem as unrecoverable.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Attribute this problem to a responsible subject (a path, a pack id,
    /// a plugin id).
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn error(&self) -> &LoaderError {
        &self.error
    }

    pub fn subject_name(&self) -> Option<&str> {
        self.subject.as_deref()
    }
}

impl From<LoaderError> for Problem {
    fn from(error: LoaderError) -> Self {
        Problem::new(error)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(subject) = &self.subject {
            write!(f, " [{subject}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_display_includes_subject() {
        let problem = Problem::new(LoaderError::UnitNotFound("acme.Gone".to_string()))
            .subject("packs/acme");
        assert_eq!(problem.to_string(), "unit not found: acme.Gone [packs/acme]");
        assert!(!problem.is_critical());
    }

    #[test]
    fn test_validation_error_names_field() {
        let error = LoaderError::validation("authors", "must be an array of strings");
        assert_eq!(
            error.to_string(),
            "invalid field 'authors': must be an array of strings"
        );
    }
}

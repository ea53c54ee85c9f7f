//! Error types for tracker page extraction.

use thiserror::Error;

/// Main error type for the crate.
///
/// `SelectorMiss` and `FilterFailure` are field-level: the engine records
/// them against the field and keeps going. `AssertionMismatch` and `Parse`
/// abort the whole record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No candidate query matched and no literal fallback was configured.
    #[error("no candidate matched for field {field}")]
    SelectorMiss { field: String },

    /// A filter rejected its input.
    #[error("filter {filter} failed for field {field}: {reason}")]
    FilterFailure {
        field: String,
        filter: String,
        reason: String,
    },

    /// A cross-stage consistency check failed.
    #[error("assertion failed in stage {stage} for {field}: expected {expected:?}, found {found:?}")]
    AssertionMismatch {
        stage: usize,
        field: String,
        expected: String,
        found: String,
    },

    /// Malformed document or a missing structural anchor.
    #[error("parse error: {0}")]
    Parse(String),

    /// A query expression could not be compiled.
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// A regex argument could not be compiled.
    #[error("invalid regex {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// Filter name not in the catalogue.
    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    /// Filter arguments of the wrong shape.
    #[error("invalid arguments for filter {filter}: {reason}")]
    InvalidFilterArgs { filter: String, reason: String },

    /// Site definition or site configuration problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reported by a `DocumentSource` when a page could not be obtained.
    #[error("fetch error for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// URL construction error.
    #[error("URL error: {0}")]
    Url(String),
}

impl Error {
    /// Field-level errors are recovered locally by the engine.
    pub fn is_field_level(&self) -> bool {
        matches!(self, Error::SelectorMiss { .. } | Error::FilterFailure { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Url(err.to_string())
    }
}

/// Result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

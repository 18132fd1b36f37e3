//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// A catalogue entry name appeared more than once.
    #[error("duplicate configuration entry")]
    DuplicateEntry {
        /// Section holding the duplicate.
        section: &'static str,
        /// Name that was repeated.
        name: String,
    },
    /// A named catalogue entry could not be found.
    #[error("unknown configuration entry")]
    UnknownEntry {
        /// Section that was searched.
        section: &'static str,
        /// Name that failed to resolve.
        name: String,
    },
    /// No configuration path could be determined.
    #[error("configuration path unavailable")]
    PathUnavailable,
    /// File system operation failed.
    #[error("configuration io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// The document could not be parsed or serialised.
    #[error("configuration json failure")]
    Json {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source JSON error.
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::Json {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(
        section: &'static str,
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            value,
            reason,
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn helpers_preserve_sources() {
        let err = ConfigError::io("read", "/tmp/config.json", io::Error::other("boom"));
        assert!(matches!(err, ConfigError::Io { operation: "read", .. }));
        assert!(err.source().is_some());

        let json_err = match serde_json::from_str::<serde_json::Value>("{") {
            Ok(_) => return,
            Err(err) => err,
        };
        let err = ConfigError::json("parse", "/tmp/config.json", json_err);
        assert!(matches!(err, ConfigError::Json { .. }));
        assert_eq!(err.to_string(), "configuration json failure");
    }

    #[test]
    fn invalid_helper_builds_field_error() {
        let err = ConfigError::invalid("pipeline", "chunk_size", "must be positive", None);
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                section: "pipeline",
                field: "chunk_size",
                ..
            }
        ));
    }
}

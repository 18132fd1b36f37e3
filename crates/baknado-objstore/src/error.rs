//! # Design
//!
//! - Provide structured, constant-message errors for object-store clients.
//! - Keep the remote key, URL, and status as fields so callers can log them uniformly.
//! - Preserve transport and IO errors as sources.

use std::io;
use std::path::PathBuf;

use baknado_config::ConfigError;
use thiserror::Error;

/// Result type for object-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by object-store clients.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("object store transport failure")]
    Http {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// URL involved in the failure.
        url: String,
        /// Underlying transport error.
        source: reqwest::Error,
    },
    /// The service answered with an unexpected status code.
    #[error("object store returned unexpected status")]
    Status {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// URL involved in the failure.
        url: String,
        /// HTTP status code returned by the service.
        status: u16,
    },
    /// A required response header was missing or malformed.
    #[error("object store response header missing")]
    MissingHeader {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Header that was expected.
        header: &'static str,
    },
    /// The digest reported by the store differs from the local digest.
    #[error("object store digest mismatch")]
    DigestMismatch {
        /// Remote object key.
        key: String,
        /// Digest computed from the local file.
        local: String,
        /// Digest reported by the store.
        remote: String,
    },
    /// The requested object or container does not exist.
    #[error("object store entry not found")]
    NotFound {
        /// Key or container that was not found.
        key: String,
    },
    /// Local filesystem failures.
    #[error("object store io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A listing could not be decoded.
    #[error("object store json failure")]
    Json {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Input validation failures.
    #[error("object store invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Catalogue lookups failed.
    #[error("object store configuration failure")]
    Config(#[from] ConfigError),
}

impl StoreError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn http(operation: &'static str, url: &url::Url, source: reqwest::Error) -> Self {
        Self::Http {
            operation,
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn status(operation: &'static str, url: &url::Url, status: u16) -> Self {
        Self::Status {
            operation,
            url: url.to_string(),
            status,
        }
    }

    /// Whether the failure is worth retrying on a later pass.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } | Self::DigestMismatch { .. } | Self::Io { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 401 || *status == 408,
            Self::MissingHeader { .. }
            | Self::NotFound { .. }
            | Self::Json { .. }
            | Self::InvalidInput { .. }
            | Self::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn helpers_build_variants() -> anyhow::Result<()> {
        let url = url::Url::parse("https://storage.example.com/v1/AUTH_x")?;
        let status = StoreError::status("object.put", &url, 503);
        assert!(matches!(status, StoreError::Status { status: 503, .. }));
        assert!(status.is_transient());

        let missing = StoreError::status("object.get", &url, 404);
        assert!(!missing.is_transient());

        let io_err = StoreError::io("object.read", "/tmp/part", io::Error::other("io"));
        assert!(io_err.source().is_some());
        assert_eq!(io_err.to_string(), "object store io failure");
        Ok(())
    }

    #[test]
    fn config_errors_convert() {
        let err: StoreError = ConfigError::UnknownEntry {
            section: "containers",
            name: "ghost".into(),
        }
        .into();
        assert!(matches!(err, StoreError::Config(_)));
        assert!(!err.is_transient());
    }
}

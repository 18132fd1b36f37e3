//! # Design
//!
//! - Provide structured, constant-message errors for the backup pipeline.
//! - Capture operation context (paths, keys, digests) so a failed job can be diagnosed from logs.
//! - Classify failures so the worker can tell operator-facing problems from transient ones.

use std::io;
use std::path::PathBuf;

use baknado_objstore::StoreError;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors produced by queues, stages, and workers.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// IO failures while interacting with queue directories or backup files.
    #[error("pipeline io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Request files that could not be parsed or serialised.
    #[error("pipeline json failure")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Path involved in the JSON failure.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Queue patterns that failed to compile.
    #[error("pipeline glob failure")]
    Glob {
        /// Operation that triggered the glob failure.
        operation: &'static str,
        /// Glob pattern that failed to compile.
        pattern: String,
        /// Underlying globset error.
        source: globset::Error,
    },
    /// Input validation failures.
    #[error("pipeline invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// A request lacks state a stage depends on.
    #[error("pipeline request state missing")]
    MissingState {
        /// Field that was expected to be populated.
        field: &'static str,
    },
    /// The backup file no longer matches the checksum recorded at intake.
    #[error("backup checksum verification failed")]
    Verification {
        /// Backup file that was re-hashed.
        path: PathBuf,
        /// Digest recorded in the request.
        expected: String,
        /// Digest computed from the file on disk.
        actual: String,
    },
    /// The object store rejected or failed a part transfer.
    #[error("part transfer failed")]
    Transfer {
        /// Remote key of the part.
        key: String,
        /// Underlying store error.
        source: StoreError,
    },
    /// The digest acknowledged by the store differs from the recorded part digest.
    #[error("part digest mismatch after transfer")]
    DigestMismatch {
        /// Remote key of the part.
        key: String,
        /// Digest recorded for the local part.
        local: String,
        /// Digest acknowledged by the store.
        remote: String,
    },
    /// Some parts are still waiting to be transferred.
    #[error("upload incomplete")]
    IncompleteUpload {
        /// Number of parts left in the working directory.
        remaining: usize,
    },
    /// The splitter could not produce parts.
    #[error("backup split failed")]
    Split {
        /// Operation that triggered the split failure.
        operation: &'static str,
        /// Diagnostic detail reported by the splitter.
        detail: String,
    },
    /// The queue already holds a different job under the same file name.
    #[error("queue slot held by another request")]
    QueueConflict {
        /// Queue that refused the request.
        queue: String,
        /// File both jobs map to.
        path: PathBuf,
    },
    /// Object-store resolution failures outside a single transfer.
    #[error("pipeline object store failure")]
    Store(#[from] StoreError),
}

impl PipelineError {
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

    pub(crate) const fn glob(
        operation: &'static str,
        pattern: String,
        source: globset::Error,
    ) -> Self {
        Self::Glob {
            operation,
            pattern,
            source,
        }
    }

    /// Whether retrying the job cannot succeed without operator intervention.
    ///
    /// Permanent failures still count towards the retry ceiling; the worker only
    /// uses this to choose how loudly to report them.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Verification { .. } | Self::InvalidInput { .. } | Self::MissingState { .. } => {
                true
            }
            Self::Store(err) => !err.is_transient(),
            Self::Io { .. }
            | Self::Json { .. }
            | Self::Glob { .. }
            | Self::Transfer { .. }
            | Self::DigestMismatch { .. }
            | Self::IncompleteUpload { .. }
            | Self::QueueConflict { .. }
            | Self::Split { .. } => false,
        }
    }
}

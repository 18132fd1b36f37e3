//! Shipping part files to their destination repository.
//!
//! # Design
//! - Stages depend only on [`Transferer`]; the repository travels with each call
//!   instead of living in transferer state.
//! - A transfer succeeds only once the destination acknowledged the write; receipts
//!   carry the acknowledged digest so callers can compare it with their own.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use baknado_objstore::{StoreError, StoreRegistry};
use tokio::fs;
use tracing::debug;

use crate::digest::file_md5;
use crate::error::{PipelineError, PipelineResult};

/// Where a part should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination<'a> {
    /// Repository (configured container) name.
    pub repo: &'a str,
    /// Remote key.
    pub key: &'a str,
}

/// Acknowledgement of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Bytes written at the destination.
    pub bytes: u64,
    /// MD5 of the stored object as reported by the destination.
    pub digest: Option<String>,
}

/// Moves one local file to a destination.
#[async_trait]
pub trait Transferer: Send + Sync {
    /// Label used in logs.
    fn label(&self) -> &'static str;

    /// Transfer `local` to `dest`.
    ///
    /// # Errors
    ///
    /// Returns a transfer failure; the local file is left in place.
    async fn transfer(
        &self,
        local: &Path,
        dest: &Destination<'_>,
    ) -> PipelineResult<TransferReceipt>;
}

/// Copies parts into `<root>/<repo>/<key>` on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalCopyTransferer {
    root: PathBuf,
}

impl LocalCopyTransferer {
    /// Copy into repositories below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target(&self, dest: &Destination<'_>) -> PipelineResult<PathBuf> {
        for (field, value) in [("repo", dest.repo), ("key", dest.key)] {
            if value.is_empty() || value == "." || value == ".." || value.contains('/') {
                return Err(PipelineError::InvalidInput {
                    field,
                    reason: "must be a single path segment",
                    value: Some(value.to_string()),
                });
            }
        }
        Ok(self.root.join(dest.repo).join(dest.key))
    }
}

#[async_trait]
impl Transferer for LocalCopyTransferer {
    fn label(&self) -> &'static str {
        "local-copy"
    }

    async fn transfer(
        &self,
        local: &Path,
        dest: &Destination<'_>,
    ) -> PipelineResult<TransferReceipt> {
        let target = self.target(dest)?;
        let dir = self.root.join(dest.repo);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| PipelineError::io("transfer.create_repo", &dir, source))?;
        let staging = dir.join(format!(".{}.upload", dest.key));
        let bytes = fs::copy(local, &staging)
            .await
            .map_err(|source| PipelineError::io("transfer.copy", &staging, source))?;
        fs::rename(&staging, &target)
            .await
            .map_err(|source| PipelineError::io("transfer.rename", &target, source))?;
        let stored = target.clone();
        let digest = tokio::task::spawn_blocking(move || file_md5(&stored))
            .await
            .map_err(|join| {
                PipelineError::io("transfer.digest", &target, std::io::Error::other(join))
            })??;
        debug!(repo = dest.repo, key = dest.key, bytes, "part copied");
        Ok(TransferReceipt {
            bytes,
            digest: Some(digest),
        })
    }
}

/// Uploads parts through the configured object stores.
#[derive(Clone)]
pub struct ObjectStoreTransferer {
    registry: Arc<StoreRegistry>,
}

impl ObjectStoreTransferer {
    /// Resolve repositories through `registry`.
    #[must_use]
    pub const fn new(registry: Arc<StoreRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Transferer for ObjectStoreTransferer {
    fn label(&self) -> &'static str {
        "object-store"
    }

    async fn transfer(
        &self,
        local: &Path,
        dest: &Destination<'_>,
    ) -> PipelineResult<TransferReceipt> {
        let store = self.registry.repo(dest.repo)?;
        match store.put(local, dest.key).await {
            Ok(info) => {
                debug!(store = %store.label(), key = dest.key, bytes = info.bytes, "part uploaded");
                Ok(TransferReceipt {
                    bytes: info.bytes,
                    digest: Some(info.hash),
                })
            }
            Err(StoreError::DigestMismatch { key, local, remote }) => {
                Err(PipelineError::DigestMismatch { key, local, remote })
            }
            Err(source) => Err(PipelineError::Transfer {
                key: dest.key.to_string(),
                source,
            }),
        }
    }
}

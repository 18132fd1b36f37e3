//! Scripted [`Transferer`] implementations for exercising the upload stage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use baknado_objstore::StoreError;
use baknado_pipeline::{
    Destination, PipelineError, PipelineResult, TransferReceipt, Transferer, file_md5,
};

/// Copies parts into `root/<repo>/<key>` and remembers every key it was handed.
///
/// Keys listed via [`RecordingTransferer::fail_times`] are refused that many
/// times before succeeding, mimicking a flaky endpoint.
#[derive(Debug)]
pub struct RecordingTransferer {
    root: PathBuf,
    calls: Mutex<Vec<String>>,
    pending_failures: Mutex<HashMap<String, u32>>,
}

impl RecordingTransferer {
    /// Store received parts under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            calls: Mutex::new(Vec::new()),
            pending_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Refuse `key` for the next `times` attempts.
    #[must_use]
    pub fn fail_times(self, key: &str, times: u32) -> Self {
        if let Ok(mut pending) = self.pending_failures.lock() {
            pending.insert(key.to_string(), times);
        }
        self
    }

    /// Keys in the order they were attempted, failures included.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Where a shipped object for `repo`/`key` ends up.
    #[must_use]
    pub fn stored_path(&self, repo: &str, key: &str) -> PathBuf {
        self.root.join(repo).join(key)
    }

    fn should_fail(&self, key: &str) -> bool {
        let Ok(mut pending) = self.pending_failures.lock() else {
            return false;
        };
        match pending.get_mut(key) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Transferer for RecordingTransferer {
    fn label(&self) -> &'static str {
        "recording"
    }

    async fn transfer(
        &self,
        local: &Path,
        dest: &Destination<'_>,
    ) -> PipelineResult<TransferReceipt> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(dest.key.to_string());
        }
        if self.should_fail(dest.key) {
            return Err(PipelineError::Transfer {
                key: dest.key.to_string(),
                source: StoreError::Status {
                    operation: "mock.put",
                    url: format!("mock://{}/{}", dest.repo, dest.key),
                    status: 503,
                },
            });
        }
        let target = self.stored_path(dest.repo, dest.key);
        let io_err = |source| PipelineError::Io {
            operation: "mock.store",
            path: target.clone(),
            source,
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let bytes = tokio::fs::copy(local, &target).await.map_err(io_err)?;
        Ok(TransferReceipt {
            bytes,
            digest: Some(file_md5(&target)?),
        })
    }
}

/// Refuses every transfer with a permanent client error.
#[derive(Debug, Default)]
pub struct RejectingTransferer;

#[async_trait]
impl Transferer for RejectingTransferer {
    fn label(&self) -> &'static str {
        "rejecting"
    }

    async fn transfer(
        &self,
        _local: &Path,
        dest: &Destination<'_>,
    ) -> PipelineResult<TransferReceipt> {
        Err(PipelineError::Transfer {
            key: dest.key.to_string(),
            source: StoreError::Status {
                operation: "mock.put",
                url: format!("mock://{}/{}", dest.repo, dest.key),
                status: 403,
            },
        })
    }
}

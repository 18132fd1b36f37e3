//! Ship split parts to the request's repository.
//!
//! # Design
//! - Parts are attempted in list order. A failure bumps that part's counter and the
//!   loop moves on, so one bad chunk never blocks its siblings.
//! - A part file that is no longer on disk was already shipped and is skipped.
//! - The working directory, and the per-job directory around it, are removed once the
//!   last part is gone.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use baknado_telemetry::Metrics;
use tokio::fs;
use tracing::{info, warn};

use super::Stage;
use crate::error::{PipelineError, PipelineResult};
use crate::queue::{DirQueue, MATCH_ALL, WorkQueue};
use crate::request::{Part, Request};
use crate::transfer::{Destination, Transferer};

/// Transfers every outstanding part and deletes it locally once acknowledged.
pub struct UploadStage {
    transferer: Arc<dyn Transferer>,
    max_part_retries: u32,
    metrics: Metrics,
}

impl UploadStage {
    /// Upload through `transferer`, giving up on a part after `max_part_retries` failures.
    #[must_use]
    pub fn new(transferer: Arc<dyn Transferer>, max_part_retries: u32, metrics: Metrics) -> Self {
        Self {
            transferer,
            max_part_retries,
            metrics,
        }
    }

    async fn ship(
        &self,
        local: &Path,
        repo: &str,
        part: &Part,
        compare_digest: bool,
    ) -> PipelineResult<u64> {
        let receipt = self
            .transferer
            .transfer(
                local,
                &Destination {
                    repo,
                    key: &part.filename,
                },
            )
            .await?;
        if compare_digest
            && let (Some(local_digest), Some(remote_digest)) =
                (part.checksum.as_deref(), receipt.digest.as_deref())
            && !local_digest.eq_ignore_ascii_case(remote_digest)
        {
            return Err(PipelineError::DigestMismatch {
                key: part.filename.clone(),
                local: local_digest.to_string(),
                remote: remote_digest.to_string(),
            });
        }
        Ok(receipt.bytes)
    }
}

#[async_trait]
impl Stage for UploadStage {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn handle(&self, request: &mut Request) -> PipelineResult<()> {
        let parts_dir = request
            .parts_dir
            .clone()
            .ok_or(PipelineError::MissingState { field: "parts_dir" })?;
        let queue = DirQueue::attach(&parts_dir, MATCH_ALL, "parts")?;
        let repo = request.repo.clone();
        let compare_digest = request.algorithm.matches_etag();
        let mut remaining = 0_usize;

        for part in &mut request.parts {
            let local = parts_dir.join(&part.filename);
            let present = fs::try_exists(&local)
                .await
                .map_err(|source| PipelineError::io("upload.stat_part", &local, source))?;
            if !present {
                continue;
            }
            if part.failures > self.max_part_retries {
                warn!(
                    part = %part.filename,
                    failures = part.failures,
                    "part exceeded its retry ceiling; skipping"
                );
                self.metrics.inc_part("skipped");
                remaining += 1;
                continue;
            }
            match self.ship(&local, &repo, part, compare_digest).await {
                Ok(bytes) => {
                    self.metrics.inc_part("uploaded");
                    self.metrics.add_bytes_uploaded(bytes);
                    if let Err(err) = queue.dequeue_path(&local) {
                        warn!(
                            part = %part.filename,
                            error = %err,
                            "uploaded part could not be removed"
                        );
                        remaining += 1;
                        continue;
                    }
                    info!(part = %part.filename, repo = %repo, bytes, "part uploaded");
                }
                Err(err) => {
                    part.failures += 1;
                    self.metrics.inc_part("failed");
                    remaining += 1;
                    warn!(
                        part = %part.filename,
                        repo = %repo,
                        failures = part.failures,
                        error = %err,
                        "part upload failed"
                    );
                }
            }
        }

        if remaining > 0 {
            return Err(PipelineError::IncompleteUpload { remaining });
        }
        if queue.purge_if_empty()? {
            remove_job_dir(&parts_dir, request).await?;
        }
        info!(backup = %request.path.display(), repo = %repo, "all parts uploaded");
        Ok(())
    }
}

async fn remove_job_dir(parts_dir: &Path, request: &Request) -> PipelineResult<()> {
    let Some(job_dir) = parts_dir.parent() else {
        return Ok(());
    };
    let job_id = request.job_id();
    if job_dir.file_name().and_then(|name| name.to_str()) != Some(job_id.as_str()) {
        return Ok(());
    }
    match fs::remove_dir(job_dir).await {
        Ok(()) => Ok(()),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
            ) =>
        {
            Ok(())
        }
        Err(err) => Err(PipelineError::io("upload.remove_job_dir", job_dir, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use crate::transfer::TransferReceipt;
    use serde_json::Map;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    #[derive(Default)]
    struct ScriptedTransferer {
        failing: HashSet<String>,
        corrupt: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransferer {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transferer for ScriptedTransferer {
        fn label(&self) -> &'static str {
            "scripted"
        }

        async fn transfer(
            &self,
            local: &Path,
            dest: &Destination<'_>,
        ) -> PipelineResult<TransferReceipt> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(dest.key.to_string());
            }
            if self.failing.contains(dest.key) {
                return Err(PipelineError::Split {
                    operation: "scripted",
                    detail: "refused".into(),
                });
            }
            let digest = if self.corrupt.contains(dest.key) {
                "00000000000000000000000000000000".to_string()
            } else {
                DigestAlgorithm::Md5.digest_file(local)?
            };
            Ok(TransferReceipt {
                bytes: std::fs::metadata(local).map(|m| m.len()).unwrap_or_default(),
                digest: Some(digest),
            })
        }
    }

    fn split_request(temp: &TempDir, parts: &[(&str, &str)]) -> TestResult<Request> {
        let parts_dir = temp.path().join("backup.tgz.parts");
        std::fs::create_dir_all(&parts_dir)?;
        let mut described = Vec::new();
        for (name, contents) in parts {
            std::fs::write(parts_dir.join(name), contents)?;
            described.push(Part::data(
                (*name).to_string(),
                DigestAlgorithm::Md5.digest_bytes(contents.as_bytes()),
                u64::try_from(contents.len())?,
            ));
        }
        std::fs::write(parts_dir.join("backup.tgz.manifest.json"), b"{}")?;
        described.push(Part::manifest("backup.tgz.manifest.json".into()));
        Ok(Request {
            path: PathBuf::from("/data/backup.tgz"),
            checksum: "abc".into(),
            repo: "prod".into(),
            source: None,
            parts_dir: Some(parts_dir),
            parts: described,
            failures: 0,
            max_retries: None,
            algorithm: DigestAlgorithm::Md5,
            created_at: None,
            extra: Map::new(),
        })
    }

    fn temp_dir() -> TestResult<TempDir> {
        Ok(tempfile::Builder::new().prefix("baknado-upload-").tempdir()?)
    }

    #[tokio::test]
    async fn uploads_everything_and_purges_workdir() -> TestResult<()> {
        let temp = temp_dir()?;
        let mut request = split_request(
            &temp,
            &[("backup.tgz.part_aa", "one"), ("backup.tgz.part_ab", "two")],
        )?;
        let transferer = Arc::new(ScriptedTransferer::default());
        let metrics = Metrics::new()?;
        let stage = UploadStage::new(transferer.clone(), 5, metrics.clone());

        stage.handle(&mut request).await?;

        assert_eq!(
            transferer.calls(),
            vec!["backup.tgz.part_aa", "backup.tgz.part_ab", "backup.tgz.manifest.json"]
        );
        assert!(!temp.path().join("backup.tgz.parts").exists());
        assert!(request.parts.iter().all(|part| part.failures == 0));
        assert_eq!(metrics.snapshot().parts_uploaded, 3);
        assert_eq!(metrics.snapshot().bytes_uploaded, 8);
        Ok(())
    }

    #[tokio::test]
    async fn per_job_directory_goes_with_the_last_part() -> TestResult<()> {
        let temp = temp_dir()?;
        let mut request = split_request(&temp, &[("backup.tgz.part_aa", "one")])?;
        let flat = request
            .parts_dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("parts_dir missing"))?;
        let job_dir = temp.path().join(request.job_id());
        std::fs::create_dir_all(&job_dir)?;
        let nested = job_dir.join("backup.tgz.parts");
        std::fs::rename(&flat, &nested)?;
        request.parts_dir = Some(nested);
        let stage = UploadStage::new(Arc::new(ScriptedTransferer::default()), 5, Metrics::new()?);

        stage.handle(&mut request).await?;
        assert!(!job_dir.exists());
        assert!(temp.path().is_dir());
        Ok(())
    }

    #[tokio::test]
    async fn failing_part_does_not_block_siblings() -> TestResult<()> {
        let temp = temp_dir()?;
        let mut request = split_request(
            &temp,
            &[
                ("backup.tgz.part_aa", "one"),
                ("backup.tgz.part_ab", "two"),
                ("backup.tgz.part_ac", "three"),
            ],
        )?;
        let transferer = Arc::new(ScriptedTransferer {
            failing: HashSet::from(["backup.tgz.part_ab".to_string()]),
            ..ScriptedTransferer::default()
        });
        let stage = UploadStage::new(transferer.clone(), 5, Metrics::new()?);

        let result = stage.handle(&mut request).await;
        assert!(matches!(
            result,
            Err(PipelineError::IncompleteUpload { remaining: 1 })
        ));
        let parts_dir = temp.path().join("backup.tgz.parts");
        assert!(!parts_dir.join("backup.tgz.part_aa").exists());
        assert!(parts_dir.join("backup.tgz.part_ab").exists());
        assert!(!parts_dir.join("backup.tgz.part_ac").exists());
        let failures: Vec<u32> = request.parts.iter().map(|part| part.failures).collect();
        assert_eq!(failures, vec![0, 1, 0, 0]);

        let retry = ScriptedTransferer::default();
        let stage = UploadStage::new(Arc::new(retry), 5, Metrics::new()?);
        stage.handle(&mut request).await?;
        assert!(!parts_dir.exists());
        assert_eq!(request.parts[1].failures, 1);
        Ok(())
    }

    #[tokio::test]
    async fn digest_mismatch_counts_as_failure() -> TestResult<()> {
        let temp = temp_dir()?;
        let mut request = split_request(&temp, &[("backup.tgz.part_aa", "one")])?;
        let transferer = Arc::new(ScriptedTransferer {
            corrupt: HashSet::from(["backup.tgz.part_aa".to_string()]),
            ..ScriptedTransferer::default()
        });
        let stage = UploadStage::new(transferer, 5, Metrics::new()?);

        let result = stage.handle(&mut request).await;
        assert!(matches!(
            result,
            Err(PipelineError::IncompleteUpload { remaining: 1 })
        ));
        assert_eq!(request.parts[0].failures, 1);
        assert!(temp.path().join("backup.tgz.parts/backup.tgz.part_aa").exists());
        Ok(())
    }

    #[tokio::test]
    async fn parts_over_ceiling_are_skipped() -> TestResult<()> {
        let temp = temp_dir()?;
        let mut request = split_request(&temp, &[("backup.tgz.part_aa", "one")])?;
        request.parts[0].failures = 3;
        let transferer = Arc::new(ScriptedTransferer::default());
        let metrics = Metrics::new()?;
        let stage = UploadStage::new(transferer.clone(), 2, metrics.clone());

        let result = stage.handle(&mut request).await;
        assert!(matches!(
            result,
            Err(PipelineError::IncompleteUpload { remaining: 1 })
        ));
        assert_eq!(transferer.calls(), vec!["backup.tgz.manifest.json"]);
        assert_eq!(request.parts[0].failures, 3);
        assert_eq!(metrics.snapshot().parts_skipped, 1);
        Ok(())
    }

    #[tokio::test]
    async fn finished_upload_is_idempotent() -> TestResult<()> {
        let temp = temp_dir()?;
        let mut request = split_request(&temp, &[("backup.tgz.part_aa", "one")])?;
        let transferer = Arc::new(ScriptedTransferer::default());
        let stage = UploadStage::new(transferer.clone(), 5, Metrics::new()?);
        stage.handle(&mut request).await?;
        let before = request.clone();

        stage.handle(&mut request).await?;
        assert_eq!(request, before);
        assert_eq!(transferer.calls().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn unsplit_request_is_missing_state() -> TestResult<()> {
        let temp = temp_dir()?;
        let mut request = split_request(&temp, &[])?;
        request.parts_dir = None;
        let stage = UploadStage::new(
            Arc::new(ScriptedTransferer::default()),
            5,
            Metrics::new()?,
        );
        assert!(matches!(
            stage.handle(&mut request).await,
            Err(PipelineError::MissingState { field: "parts_dir" })
        ));
        Ok(())
    }
}

//! Backup job descriptors and the parts they accumulate.
//!
//! # Design
//! - A [`Request`] is persisted as pretty JSON; `source` always names the file that
//!   currently holds it, and is re-derived from the load path rather than trusted.
//! - `path`, `checksum`, and `repo` are fixed at intake; stages only append parts and
//!   bump failure counters.
//! - Unknown keys written by other producers survive a load/persist cycle.
//! - Writes go to a hidden sibling and are renamed into place so a crash never
//!   leaves a truncated job file behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::digest::DigestAlgorithm;
use crate::error::{PipelineError, PipelineResult};

/// Suffix appended to a backup's basename to name its job file.
pub const REQUEST_SUFFIX: &str = ".msg.json";
/// Suffix appended to a backup's basename to name its manifest part.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

const JOB_ID_LEN: usize = 16;

/// What a [`Part`] carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    /// A byte range of the backup file.
    #[default]
    Data,
    /// The request's own serialised form, shipped alongside the data parts.
    Manifest,
}

/// One uploaded unit of a split backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// File name inside the request's `parts_dir`, also used as the remote key.
    pub filename: String,
    /// Digest of the part contents; absent for the manifest.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Failed transfer attempts.
    #[serde(default)]
    pub failures: u32,
    /// Data or manifest.
    #[serde(default)]
    pub kind: PartKind,
    /// Size of the part in bytes.
    #[serde(default)]
    pub bytes: u64,
}

impl Part {
    /// Describe a data part.
    #[must_use]
    pub const fn data(filename: String, checksum: String, bytes: u64) -> Self {
        Self {
            filename,
            checksum: Some(checksum),
            failures: 0,
            kind: PartKind::Data,
            bytes,
        }
    }

    /// Describe the manifest entry.
    #[must_use]
    pub const fn manifest(filename: String) -> Self {
        Self {
            filename,
            checksum: None,
            failures: 0,
            kind: PartKind::Manifest,
            bytes: 0,
        }
    }
}

/// A backup job moving through the pipeline queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Absolute path of the backup file.
    pub path: PathBuf,
    /// Digest of `path` recorded at intake.
    pub checksum: String,
    /// Destination repository (a configured container name).
    pub repo: String,
    /// File currently holding this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Working directory holding the split parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts_dir: Option<PathBuf>,
    /// Parts in upload order; the manifest is last.
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Failed stage attempts.
    #[serde(default)]
    pub failures: u32,
    /// Ceiling on `failures`; the worker default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Algorithm used for `checksum` and part digests.
    #[serde(default)]
    pub algorithm: DigestAlgorithm,
    /// When the job was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Keys this version does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Request {
    /// Build a new job for the backup at `path`, hashing it with MD5.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the backup cannot be resolved or read.
    pub fn for_backup(path: &Path, repo: &str) -> PipelineResult<Self> {
        if repo.trim().is_empty() {
            return Err(PipelineError::InvalidInput {
                field: "repo",
                reason: "must not be empty",
                value: None,
            });
        }
        let path = fs::canonicalize(path)
            .map_err(|source| PipelineError::io("request.resolve", path, source))?;
        let algorithm = DigestAlgorithm::default();
        let checksum = algorithm.digest_file(&path)?;
        Ok(Self {
            path,
            checksum,
            repo: repo.to_string(),
            source: None,
            parts_dir: None,
            parts: Vec::new(),
            failures: 0,
            max_retries: None,
            algorithm,
            created_at: Some(Utc::now()),
            extra: Map::new(),
        })
    }

    /// Load a request from `path`, recording `path` as its source.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] when the file cannot be read and
    /// [`PipelineError::Json`] when it is not a valid request.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let raw =
            fs::read(path).map_err(|source| PipelineError::io("request.read", path, source))?;
        let mut request: Self = serde_json::from_slice(&raw)
            .map_err(|source| PipelineError::json("request.parse", path, source))?;
        request.source = Some(path.to_path_buf());
        Ok(request)
    }

    /// Write the request back to its source file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingState`] when the request has never been
    /// placed in a queue, or the write failure.
    pub fn persist(&self) -> PipelineResult<()> {
        let source = self
            .source
            .as_deref()
            .ok_or(PipelineError::MissingState { field: "source" })?;
        self.write_to(source)
    }

    /// Serialise the request to `dest` atomically without touching `source`.
    ///
    /// # Errors
    ///
    /// Returns the serialisation or IO failure.
    pub fn write_to(&self, dest: &Path) -> PipelineResult<()> {
        let mut payload = serde_json::to_vec_pretty(self)
            .map_err(|source| PipelineError::json("request.serialise", dest, source))?;
        payload.push(b'\n');
        write_atomic(dest, &payload)
    }

    /// Re-hash the backup and compare it with the recorded checksum.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Verification`] on mismatch, or the IO failure.
    pub fn verify(&self) -> PipelineResult<()> {
        let actual = self.algorithm.digest_file(&self.path)?;
        if actual.eq_ignore_ascii_case(self.checksum.trim()) {
            Ok(())
        } else {
            Err(PipelineError::Verification {
                path: self.path.clone(),
                expected: self.checksum.clone(),
                actual,
            })
        }
    }

    /// Whether the split stage has already produced parts for this request.
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.parts.iter().any(|part| part.kind == PartKind::Manifest)
    }

    /// File name of the backup.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] when `path` has no UTF-8 file name.
    pub fn basename(&self) -> PipelineResult<&str> {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PipelineError::InvalidInput {
                field: "path",
                reason: "must name a file",
                value: Some(self.path.display().to_string()),
            })
    }

    /// Name of the manifest part, `<basename>.manifest.json`.
    ///
    /// # Errors
    ///
    /// Propagates [`Request::basename`] failures.
    pub fn manifest_name(&self) -> PipelineResult<String> {
        Ok(format!("{}{MANIFEST_SUFFIX}", self.basename()?))
    }

    /// File name this request takes in a queue directory.
    ///
    /// The current source name is kept once the request has one; fresh jobs are
    /// named `<basename>.msg.json`.
    ///
    /// # Errors
    ///
    /// Propagates [`Request::basename`] failures.
    pub fn queue_file_name(&self) -> PipelineResult<String> {
        if let Some(name) = self
            .source
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
        {
            return Ok(name.to_string());
        }
        Ok(format!("{}{REQUEST_SUFFIX}", self.basename()?))
    }

    /// Effective retry ceiling given the worker default.
    #[must_use]
    pub fn retry_ceiling(&self, default: u32) -> u32 {
        self.max_retries.unwrap_or(default)
    }

    /// Whether this job has failed more often than it may.
    #[must_use]
    pub fn retries_exhausted(&self, default: u32) -> bool {
        self.failures > self.retry_ceiling(default)
    }

    /// Whether two requests describe the same backup job.
    #[must_use]
    pub fn same_job(&self, other: &Self) -> bool {
        self.path == other.path && self.checksum == other.checksum && self.repo == other.repo
    }

    /// Short hex identifier over the fields [`Request::same_job`] compares.
    #[must_use]
    pub fn job_id(&self) -> String {
        let identity = format!("{}\0{}\0{}", self.path.display(), self.repo, self.checksum);
        DigestAlgorithm::Sha256
            .digest_bytes(identity.as_bytes())
            .chars()
            .take(JOB_ID_LEN)
            .collect()
    }
}

/// Write `payload` to a hidden sibling of `dest` and rename it into place.
pub(crate) fn write_atomic(dest: &Path, payload: &[u8]) -> PipelineResult<()> {
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PipelineError::InvalidInput {
            field: "dest",
            reason: "must name a file",
            value: Some(dest.display().to_string()),
        })?;
    let staging = dest.with_file_name(format!(".{file_name}.tmp"));
    let mut file = fs::File::create(&staging)
        .map_err(|source| PipelineError::io("request.write_tmp", &staging, source))?;
    file.write_all(payload)
        .and_then(|()| file.sync_all())
        .map_err(|source| PipelineError::io("request.write_tmp", &staging, source))?;
    drop(file);
    fs::rename(&staging, dest).map_err(|source| PipelineError::io("request.rename", dest, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn temp_dir() -> TestResult<TempDir> {
        Ok(tempfile::Builder::new().prefix("baknado-request-").tempdir()?)
    }

    #[test]
    fn minimal_intake_document_gets_defaults() -> TestResult<()> {
        let temp = temp_dir()?;
        let path = temp.path().join("backup.tgz.msg.json");
        fs::write(
            &path,
            json!({
                "path": "/data/backup.tgz",
                "checksum": "5eb63bbbe01eeed093cb22bb8f5acdc3",
                "repo": "prod"
            })
            .to_string(),
        )?;

        let request = Request::load(&path)?;
        assert_eq!(request.source.as_deref(), Some(path.as_path()));
        assert!(request.parts.is_empty());
        assert_eq!(request.failures, 0);
        assert_eq!(request.algorithm, DigestAlgorithm::Md5);
        assert_eq!(request.retry_ceiling(3), 3);
        assert_eq!(request.manifest_name()?, "backup.tgz.manifest.json");
        Ok(())
    }

    #[test]
    fn persist_keeps_unknown_keys_and_updates_counters() -> TestResult<()> {
        let temp = temp_dir()?;
        let path = temp.path().join("job.msg.json");
        fs::write(
            &path,
            json!({
                "path": "/data/backup.tgz",
                "checksum": "abc",
                "repo": "prod",
                "max_retries": 1,
                "operator": "nightly-cron"
            })
            .to_string(),
        )?;

        let mut request = Request::load(&path)?;
        request.failures += 1;
        request.persist()?;

        let reloaded = Request::load(&path)?;
        assert_eq!(reloaded.failures, 1);
        assert_eq!(reloaded.extra.get("operator"), Some(&json!("nightly-cron")));
        assert!(!reloaded.retries_exhausted(3));
        assert_eq!(reloaded.queue_file_name()?, "job.msg.json");
        assert!(!temp.path().join(".job.msg.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn persist_without_source_is_missing_state() -> TestResult<()> {
        let temp = temp_dir()?;
        let backup = temp.path().join("backup.tgz");
        fs::write(&backup, b"hello world")?;
        let request = Request::for_backup(&backup, "prod")?;
        assert!(matches!(
            request.persist(),
            Err(PipelineError::MissingState { field: "source" })
        ));
        assert_eq!(request.queue_file_name()?, "backup.tgz.msg.json");
        Ok(())
    }

    #[test]
    fn verify_detects_changed_backups() -> TestResult<()> {
        let temp = temp_dir()?;
        let backup = temp.path().join("backup.tgz");
        fs::write(&backup, b"hello world")?;
        let request = Request::for_backup(&backup, "prod")?;
        assert_eq!(request.checksum, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(request.created_at.is_some());
        request.verify()?;

        fs::write(&backup, b"hello world!")?;
        let err = request.verify().err();
        assert!(matches!(err, Some(PipelineError::Verification { .. })));
        Ok(())
    }

    #[test]
    fn for_backup_rejects_empty_repo() -> TestResult<()> {
        let temp = temp_dir()?;
        let backup = temp.path().join("backup.tgz");
        fs::write(&backup, b"x")?;
        assert!(matches!(
            Request::for_backup(&backup, " "),
            Err(PipelineError::InvalidInput { field: "repo", .. })
        ));
        Ok(())
    }

    #[test]
    fn split_state_follows_manifest_entry() {
        let mut request = Request {
            path: PathBuf::from("/data/backup.tgz"),
            checksum: "abc".into(),
            repo: "prod".into(),
            source: None,
            parts_dir: None,
            parts: vec![Part::data("backup.tgz.part_aa".into(), "d1".into(), 10)],
            failures: 0,
            max_retries: Some(0),
            algorithm: DigestAlgorithm::Md5,
            created_at: None,
            extra: Map::new(),
        };
        assert!(!request.is_split());
        request.parts.push(Part::manifest("backup.tgz.manifest.json".into()));
        assert!(request.is_split());

        request.failures = 1;
        assert!(request.retries_exhausted(5));

        let mut other = request.clone();
        other.failures = 0;
        other.parts.clear();
        assert!(request.same_job(&other));
        assert_eq!(request.job_id(), other.job_id());
        other.checksum = "def".into();
        assert!(!request.same_job(&other));
        assert_ne!(request.job_id(), other.job_id());

        let mut moved = request.clone();
        moved.path = PathBuf::from("/archive/backup.tgz");
        assert_ne!(request.job_id(), moved.job_id());
        assert_eq!(request.job_id().len(), 16);
    }
}

//! Verify a backup and cut it into parts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Stage, run_blocking};
use crate::digest::DigestAlgorithm;
use crate::error::{PipelineError, PipelineResult};
use crate::request::{Part, PartKind, Request};
use crate::split::{Splitter, check_chunk_size};

/// Suffix of the per-backup working directory.
pub const PARTS_DIR_SUFFIX: &str = ".parts";

/// Checks a backup against its recorded checksum, splits it, and records the parts
/// plus a manifest entry on the request.
pub struct SplitStage {
    workdir: PathBuf,
    chunk_size: u64,
    splitter: Arc<dyn Splitter>,
}

impl SplitStage {
    /// Split into per-job directories under `workdir` using chunks of `chunk_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] when `chunk_size` is out of range.
    pub fn new(
        workdir: impl Into<PathBuf>,
        chunk_size: u64,
        splitter: Arc<dyn Splitter>,
    ) -> PipelineResult<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            workdir: workdir.into(),
            chunk_size,
            splitter,
        })
    }

    /// Working directory the stage writes parts for `request` into,
    /// `<workdir>/<job id>/<basename>.parts`.
    ///
    /// Backups sharing a file name still get separate directories, so resetting
    /// one never touches another job's parts.
    ///
    /// # Errors
    ///
    /// Propagates [`Request::basename`] failures.
    pub fn parts_dir_for(&self, request: &Request) -> PipelineResult<PathBuf> {
        Ok(self
            .workdir
            .join(request.job_id())
            .join(format!("{}{PARTS_DIR_SUFFIX}", request.basename()?)))
    }
}

#[async_trait]
impl Stage for SplitStage {
    fn name(&self) -> &'static str {
        "split"
    }

    async fn handle(&self, request: &mut Request) -> PipelineResult<()> {
        if request.is_split() {
            info!(
                backup = %request.path.display(),
                parts = request.parts.len(),
                "backup already split; skipping"
            );
            return Ok(());
        }
        if !request.parts.is_empty() {
            warn!(
                backup = %request.path.display(),
                parts = request.parts.len(),
                "discarding parts from an unfinished split"
            );
            request.parts.clear();
        }

        let snapshot = request.clone();
        run_blocking("split.verify", &request.path, move || snapshot.verify()).await?;

        let parts_dir = self.parts_dir_for(request)?;
        let manifest_name = request.manifest_name()?;
        let splitter = Arc::clone(&self.splitter);
        let backup = request.path.clone();
        let chunk_size = self.chunk_size;
        let algorithm = request.algorithm;
        let target = parts_dir.clone();
        let parts = run_blocking("split.run", &parts_dir, move || {
            reset_dir(&target)?;
            let files = splitter.split(&backup, chunk_size, &target)?;
            files
                .iter()
                .map(|file| describe_part(file, algorithm))
                .collect::<PipelineResult<Vec<Part>>>()
        })
        .await?;

        let data_bytes: u64 = parts.iter().map(|part| part.bytes).sum();
        request.parts.extend(parts);
        request.parts.push(Part::manifest(manifest_name.clone()));
        request.parts_dir = Some(parts_dir.clone());

        let mut manifest = request.clone();
        manifest.source = None;
        manifest.write_to(&parts_dir.join(&manifest_name))?;
        request.persist()?;

        info!(
            backup = %request.path.display(),
            splitter = self.splitter.name(),
            parts = request.parts.iter().filter(|p| p.kind == PartKind::Data).count(),
            bytes = data_bytes,
            parts_dir = %parts_dir.display(),
            "backup split"
        );
        Ok(())
    }
}

fn reset_dir(dir: &Path) -> PipelineResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(PipelineError::io("split.reset_dir", dir, err)),
    }
    fs::create_dir_all(dir).map_err(|source| PipelineError::io("split.create_dir", dir, source))
}

fn describe_part(file: &Path, algorithm: DigestAlgorithm) -> PipelineResult<Part> {
    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PipelineError::InvalidInput {
            field: "part",
            reason: "must have a UTF-8 file name",
            value: Some(file.display().to_string()),
        })?
        .to_string();
    let bytes = fs::metadata(file)
        .map_err(|source| PipelineError::io("split.stat_part", file, source))?
        .len();
    Ok(Part::data(filename, algorithm.digest_file(file)?, bytes))
}

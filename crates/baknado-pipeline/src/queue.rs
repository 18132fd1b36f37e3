//! Directory-backed work queues.
//!
//! # Design
//! - Membership is "a regular file in the directory whose name matches the pattern";
//!   there is no index to drift out of sync.
//! - Every call rescans the directory. Hidden files are ignored so in-flight
//!   atomic writes never surface as work.
//! - Listings are sorted by file name, which makes `peek_next` deterministic.
//! - [`WorkQueue`] is the seam for swapping in another backend or adding leases.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::request::Request;

/// Pattern matching every visible file.
pub const MATCH_ALL: &str = "*";

/// Queue operations the pipeline stages and workers rely on.
pub trait WorkQueue: Send + Sync {
    /// Human-readable queue name for logs and metrics.
    fn name(&self) -> &str;

    /// Directory backing the queue.
    fn directory(&self) -> &Path;

    /// Every queued file, freshly scanned, in name order.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the directory cannot be read.
    fn list_matching(&self) -> PipelineResult<Vec<PathBuf>>;

    /// The next file to work on, if any.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the directory cannot be read.
    fn peek_next(&self) -> PipelineResult<Option<PathBuf>> {
        Ok(self.list_matching()?.into_iter().next())
    }

    /// Number of queued files.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the directory cannot be read.
    fn depth(&self) -> PipelineResult<usize> {
        Ok(self.list_matching()?.len())
    }

    /// Write `request` into this queue and point its `source` at the new file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::QueueConflict`] when the file is taken by a different
    /// job, or the serialisation or IO failure; `source` is unchanged on error.
    fn enqueue(&self, request: &mut Request) -> PipelineResult<PathBuf>;

    /// Remove this queue's copy of `request`. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an IO error when an existing file cannot be removed.
    fn dequeue(&self, request: &Request) -> PipelineResult<bool>;

    /// Remove the file at `path`. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an IO error when an existing file cannot be removed.
    fn dequeue_path(&self, path: &Path) -> PipelineResult<bool>;

    /// Move a foreign file (for example an unparseable job) into this queue verbatim.
    ///
    /// A file already holding the name is kept; the newcomer gets a numbered prefix.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the file cannot be moved.
    fn adopt_file(&self, path: &Path) -> PipelineResult<PathBuf>;

    /// Delete the queue directory once nothing matching remains in it.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the directory cannot be inspected or removed.
    fn purge_if_empty(&self) -> PipelineResult<bool>;
}

/// A [`WorkQueue`] backed by a local directory.
#[derive(Debug, Clone)]
pub struct DirQueue {
    name: String,
    directory: PathBuf,
    pattern: String,
    matcher: GlobMatcher,
}

impl DirQueue {
    /// Open a queue over `directory`, creating the directory when absent.
    ///
    /// # Errors
    ///
    /// Returns a glob error for an invalid pattern or the directory creation failure.
    pub fn create(
        directory: impl Into<PathBuf>,
        pattern: &str,
        name: impl Into<String>,
    ) -> PipelineResult<Self> {
        let queue = Self::attach(directory, pattern, name)?;
        fs::create_dir_all(&queue.directory)
            .map_err(|source| PipelineError::io("queue.create", &queue.directory, source))?;
        debug!(queue = %queue.name, directory = %queue.directory.display(), "queue ready");
        Ok(queue)
    }

    /// Open a queue over `directory` without creating it; a missing directory is empty.
    ///
    /// # Errors
    ///
    /// Returns a glob error for an invalid pattern.
    pub fn attach(
        directory: impl Into<PathBuf>,
        pattern: &str,
        name: impl Into<String>,
    ) -> PipelineResult<Self> {
        let matcher = Glob::new(pattern)
            .map_err(|source| PipelineError::glob("queue.pattern", pattern.to_string(), source))?
            .compile_matcher();
        Ok(Self {
            name: name.into(),
            directory: directory.into(),
            pattern: pattern.to_string(),
            matcher,
        })
    }

    /// Pattern queued files must match.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches(&self, file_name: &str) -> bool {
        !file_name.starts_with('.') && self.matcher.is_match(file_name)
    }

    fn vacant_path(&self, file_name: &str) -> PathBuf {
        let mut dest = self.directory.join(file_name);
        let mut attempt: u32 = 1;
        while dest.exists() {
            dest = self.directory.join(format!("{attempt}-{file_name}"));
            attempt = attempt.saturating_add(1);
        }
        dest
    }

    fn held_by_other_job(&self, dest: &Path, request: &Request) -> PipelineResult<bool> {
        if !dest.is_file() || request.source.as_deref() == Some(dest) {
            return Ok(false);
        }
        match Request::load(dest) {
            Ok(existing) => Ok(!existing.same_job(request)),
            Err(PipelineError::Json { .. }) => Ok(true),
            Err(err) => Err(err),
        }
    }
}

impl WorkQueue for DirQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn directory(&self) -> &Path {
        &self.directory
    }

    fn list_matching(&self) -> PipelineResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(PipelineError::io("queue.list", &self.directory, err)),
        };
        let mut matches = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| PipelineError::io("queue.list", &self.directory, source))?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !self.matches(&file_name) {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|source| PipelineError::io("queue.stat", entry.path(), source))?;
            if file_type.is_file() {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn enqueue(&self, request: &mut Request) -> PipelineResult<PathBuf> {
        let dest = self.directory.join(request.queue_file_name()?);
        if self.held_by_other_job(&dest, request)? {
            warn!(
                queue = %self.name,
                request = %dest.display(),
                backup = %request.path.display(),
                "queue file held by another request"
            );
            return Err(PipelineError::QueueConflict {
                queue: self.name.clone(),
                path: dest,
            });
        }
        let previous = request.source.replace(dest.clone());
        if let Err(err) = request.persist() {
            request.source = previous;
            return Err(err);
        }
        info!(queue = %self.name, request = %dest.display(), "request enqueued");
        Ok(dest)
    }

    fn dequeue(&self, request: &Request) -> PipelineResult<bool> {
        let name = request.queue_file_name()?;
        self.dequeue_path(&self.directory.join(name))
    }

    fn dequeue_path(&self, path: &Path) -> PipelineResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(queue = %self.name, request = %path.display(), "request dequeued");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(PipelineError::io("queue.dequeue", path, err)),
        }
    }

    fn adopt_file(&self, path: &Path) -> PipelineResult<PathBuf> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PipelineError::InvalidInput {
                field: "path",
                reason: "must name a file",
                value: Some(path.display().to_string()),
            })?;
        fs::create_dir_all(&self.directory)
            .map_err(|source| PipelineError::io("queue.create", &self.directory, source))?;
        let dest = self.vacant_path(file_name);
        if let Err(rename_err) = fs::rename(path, &dest) {
            debug!(error = %rename_err, "rename failed; copying across filesystems");
            fs::copy(path, &dest)
                .map_err(|source| PipelineError::io("queue.adopt_copy", &dest, source))?;
            fs::remove_file(path)
                .map_err(|source| PipelineError::io("queue.adopt_cleanup", path, source))?;
        }
        warn!(queue = %self.name, file = %dest.display(), "file adopted");
        Ok(dest)
    }

    fn purge_if_empty(&self) -> PipelineResult<bool> {
        if !self.directory.is_dir() || !self.list_matching()?.is_empty() {
            return Ok(false);
        }
        match fs::remove_dir_all(&self.directory) {
            Ok(()) => {
                info!(queue = %self.name, directory = %self.directory.display(), "queue purged");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(PipelineError::io("queue.purge", &self.directory, err)),
        }
    }
}

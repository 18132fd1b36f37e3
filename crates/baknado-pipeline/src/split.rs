//! Splitting backup files into bounded-size parts.
//!
//! # Design
//! - Parts are named `<basename>.part_<suffix>` with alphabetic suffixes (`aa`, `ab`, ...),
//!   widened when two letters cannot name every part, so name order is byte order.
//! - [`NativeSplitter`] streams in-process; [`CommandSplitter`] delegates to `split(1)`
//!   with the same naming.
//! - Both are blocking and are driven from `spawn_blocking` by the split stage.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use baknado_config::defaults::MAX_CHUNK_SIZE;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Separator between the backup basename and the part suffix.
pub const PART_MARKER: &str = ".part_";

const MIN_SUFFIX_WIDTH: usize = 2;
const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const COPY_BUFFER: usize = 64 * 1024;

/// Produces part files from a backup.
pub trait Splitter: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &'static str;

    /// Split `source` into parts of at most `chunk_size` bytes inside `dest_dir`,
    /// returning the part paths in order. An empty source yields no parts.
    ///
    /// # Errors
    ///
    /// Returns a validation, IO, or splitter failure.
    fn split(
        &self,
        source: &Path,
        chunk_size: u64,
        dest_dir: &Path,
    ) -> PipelineResult<Vec<PathBuf>>;
}

/// Validate a chunk size against the store's single-object ceiling.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] for zero or oversized chunks.
pub fn check_chunk_size(chunk_size: u64) -> PipelineResult<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(PipelineError::InvalidInput {
            field: "chunk_size",
            reason: "must be between 1 byte and the store object size limit",
            value: Some(chunk_size.to_string()),
        });
    }
    Ok(())
}

/// Prefix shared by every part of `source`: `<basename>.part_`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] when `source` has no UTF-8 file name.
pub fn part_prefix(source: &Path) -> PipelineResult<String> {
    source
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| format!("{name}{PART_MARKER}"))
        .ok_or_else(|| PipelineError::InvalidInput {
            field: "source",
            reason: "must name a file",
            value: Some(source.display().to_string()),
        })
}

/// Smallest suffix width (at least two) able to name `parts` parts.
#[must_use]
pub fn suffix_width(parts: u64) -> usize {
    let mut width = MIN_SUFFIX_WIDTH;
    let mut capacity: u64 = 26 * 26;
    while capacity < parts {
        width += 1;
        capacity = capacity.saturating_mul(26);
    }
    width
}

/// Alphabetic suffix for the part at `index`, zero-padded with `a` to `width`.
#[must_use]
pub fn part_suffix(index: u64, width: usize) -> String {
    let mut letters = vec![b'a'; width];
    let mut remaining = index;
    for slot in letters.iter_mut().rev() {
        // remaining % 26 always indexes the alphabet
        *slot = ALPHABET[usize::try_from(remaining % 26).unwrap_or_default()];
        remaining /= 26;
    }
    letters.into_iter().map(char::from).collect()
}

/// Number of parts a file of `len` bytes splits into.
#[must_use]
pub const fn part_count(len: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// In-process streaming splitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSplitter;

impl Splitter for NativeSplitter {
    fn name(&self) -> &'static str {
        "native"
    }

    fn split(
        &self,
        source: &Path,
        chunk_size: u64,
        dest_dir: &Path,
    ) -> PipelineResult<Vec<PathBuf>> {
        check_chunk_size(chunk_size)?;
        let prefix = part_prefix(source)?;
        let file =
            File::open(source).map_err(|err| PipelineError::io("split.open", source, err))?;
        let len = file
            .metadata()
            .map_err(|err| PipelineError::io("split.stat", source, err))?
            .len();
        let count = part_count(len, chunk_size);
        let width = suffix_width(count);
        let mut reader = BufReader::with_capacity(COPY_BUFFER, file);
        let mut parts = Vec::new();
        for index in 0..count {
            let path = dest_dir.join(format!("{prefix}{}", part_suffix(index, width)));
            let out = File::create(&path)
                .map_err(|err| PipelineError::io("split.create_part", &path, err))?;
            let mut writer = BufWriter::with_capacity(COPY_BUFFER, out);
            let written = io::copy(&mut (&mut reader).take(chunk_size), &mut writer)
                .map_err(|err| PipelineError::io("split.copy", &path, err))?;
            let out = writer
                .into_inner()
                .map_err(|err| PipelineError::io("split.flush", &path, err.into_error()))?;
            out.sync_all()
                .map_err(|err| PipelineError::io("split.sync", &path, err))?;
            if written == 0 {
                fs::remove_file(&path)
                    .map_err(|err| PipelineError::io("split.remove_empty", &path, err))?;
                break;
            }
            parts.push(path);
        }
        debug!(source = %source.display(), parts = parts.len(), "backup split");
        Ok(parts)
    }
}

/// Splitter delegating to an external `split` executable.
#[derive(Debug, Clone)]
pub struct CommandSplitter {
    program: PathBuf,
}

impl Default for CommandSplitter {
    fn default() -> Self {
        Self::new("split")
    }
}

impl CommandSplitter {
    /// Use `program` as the `split` executable.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Splitter for CommandSplitter {
    fn name(&self) -> &'static str {
        "command"
    }

    fn split(
        &self,
        source: &Path,
        chunk_size: u64,
        dest_dir: &Path,
    ) -> PipelineResult<Vec<PathBuf>> {
        check_chunk_size(chunk_size)?;
        let prefix = part_prefix(source)?;
        let source = std::path::absolute(source)
            .map_err(|err| PipelineError::io("split.resolve", source, err))?;
        let len = fs::metadata(&source)
            .map_err(|err| PipelineError::io("split.stat", &source, err))?
            .len();
        let width = suffix_width(part_count(len, chunk_size));
        let output = Command::new(&self.program)
            .arg("-a")
            .arg(width.to_string())
            .arg("-b")
            .arg(chunk_size.to_string())
            .arg(&source)
            .arg(&prefix)
            .current_dir(dest_dir)
            .output()
            .map_err(|err| PipelineError::io("split.spawn", &self.program, err))?;
        if !output.status.success() {
            return Err(PipelineError::Split {
                operation: "split.command",
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let mut parts = Vec::new();
        for entry in
            fs::read_dir(dest_dir).map_err(|err| PipelineError::io("split.list", dest_dir, err))?
        {
            let entry = entry.map_err(|err| PipelineError::io("split.list", dest_dir, err))?;
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix))
            {
                parts.push(entry.path());
            }
        }
        parts.sort();
        debug!(source = %source.display(), parts = parts.len(), "backup split by command");
        Ok(parts)
    }
}

//! Clean up jobs left in two queues by an interrupted move.
//!
//! A worker writes the job into its output queue before deleting the input copy,
//! so a crash in between leaves the same job in both. The output copy is the one
//! that made progress; the input copy is dropped. Files that merely share a name
//! but describe a different backup are left alone.
//!
//! The dead-letter queue is only authoritative for input copies that have run out of
//! retries themselves. An input copy with retries left is an operator resubmission.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::queue::WorkQueue;
use crate::request::Request;

/// Remove input copies of jobs already present in `output`, returning the removed paths.
///
/// # Errors
///
/// Returns an IO error when either queue cannot be listed or a duplicate cannot be removed.
pub fn reconcile(input: &dyn WorkQueue, output: &dyn WorkQueue) -> PipelineResult<Vec<PathBuf>> {
    remove_duplicates(input, output, |_, _| true)
}

/// Remove input copies of abandoned jobs whose own failure count is past the ceiling.
///
/// `default_max_retries` applies to requests that carry no ceiling of their own.
///
/// # Errors
///
/// Returns an IO error when either queue cannot be listed or a duplicate cannot be removed.
pub fn reconcile_abandoned(
    input: &dyn WorkQueue,
    dead_letter: &dyn WorkQueue,
    default_max_retries: u32,
) -> PipelineResult<Vec<PathBuf>> {
    remove_duplicates(input, dead_letter, |path, ours| {
        let exhausted = ours.retries_exhausted(default_max_retries);
        if !exhausted {
            warn!(
                request = %path.display(),
                failures = ours.failures,
                dead_letter = dead_letter.name(),
                "keeping resubmitted request despite its abandoned copy"
            );
        }
        exhausted
    })
}

fn remove_duplicates(
    input: &dyn WorkQueue,
    output: &dyn WorkQueue,
    authoritative: impl Fn(&Path, &Request) -> bool,
) -> PipelineResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in input.list_matching()? {
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let twin = output.directory().join(file_name);
        if !twin.is_file() {
            continue;
        }
        let (ours, theirs) = match (Request::load(&path), Request::load(&twin)) {
            (Ok(ours), Ok(theirs)) => (ours, theirs),
            (Err(err @ PipelineError::Json { .. }), _)
            | (_, Err(err @ PipelineError::Json { .. })) => {
                warn!(request = %path.display(), error = %err, "duplicate check skipped");
                continue;
            }
            (Err(err), _) | (_, Err(err)) => return Err(err),
        };
        if !ours.same_job(&theirs) || !authoritative(&path, &ours) {
            continue;
        }
        if input.dequeue_path(&path)? {
            info!(
                request = %path.display(),
                from = input.name(),
                kept_in = output.name(),
                "duplicate request removed"
            );
            removed.push(path);
        }
    }
    Ok(removed)
}

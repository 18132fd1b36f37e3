//! Pipeline stages driven by queue workers.
//!
//! # Design
//! - A stage mutates the request it is handed; the worker owns persistence and queue moves.
//! - Handlers are safe to re-run on a request they already finished.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{PipelineError, PipelineResult};
use crate::request::Request;

pub mod split;
pub mod upload;

pub use split::SplitStage;
pub use upload::UploadStage;

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Label used for spans, logs, and metrics.
    fn name(&self) -> &'static str;

    /// Advance `request` through this stage.
    ///
    /// # Errors
    ///
    /// Any error leaves the request in its input queue for a later pass.
    async fn handle(&self, request: &mut Request) -> PipelineResult<()>;
}

/// Run blocking filesystem work off the async executor.
pub(crate) async fn run_blocking<T, F>(
    operation: &'static str,
    path: &Path,
    work: F,
) -> PipelineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|join| PipelineError::io(operation, path, std::io::Error::other(join)))?
}

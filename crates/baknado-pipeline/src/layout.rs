//! Wiring the standard queue layout and the two workers from settings.

use std::path::PathBuf;
use std::sync::Arc;

use baknado_config::{PipelineSettings, SplitterKind};
use baknado_telemetry::Metrics;

use crate::error::{PipelineError, PipelineResult};
use crate::queue::{DirQueue, WorkQueue};
use crate::split::{CommandSplitter, NativeSplitter, Splitter};
use crate::stage::{SplitStage, UploadStage};
use crate::transfer::Transferer;
use crate::worker::{QueueWorker, WorkerPolicy};

/// The pipeline's top-level queues.
#[derive(Debug, Clone)]
pub struct QueueSet {
    /// Requests waiting to be split.
    pub ready: Arc<DirQueue>,
    /// Split requests waiting to be uploaded.
    pub processing: Arc<DirQueue>,
    /// Fully uploaded requests.
    pub complete: Arc<DirQueue>,
    /// Requests that exhausted their retries or could not be parsed.
    pub abandoned: Arc<DirQueue>,
}

impl QueueSet {
    /// Open (creating when needed) every queue directory named by `settings`.
    ///
    /// # Errors
    ///
    /// Returns a glob error for an invalid pattern or a directory creation failure.
    pub fn open(settings: &PipelineSettings) -> PipelineResult<Self> {
        let open = |dir: PathBuf, name: &str| {
            DirQueue::create(dir, &settings.pattern, name.to_string()).map(Arc::new)
        };
        Ok(Self {
            ready: open(settings.ready_dir(), "ready")?,
            processing: open(settings.processing_dir(), "processing")?,
            complete: open(settings.complete_dir(), "complete")?,
            abandoned: open(settings.abandoned_dir(), "abandoned")?,
        })
    }

    /// Queues in pipeline order, dead-letter last.
    #[must_use]
    pub fn all(&self) -> [&Arc<DirQueue>; 4] {
        [&self.ready, &self.processing, &self.complete, &self.abandoned]
    }

    /// Current depth of every queue, in pipeline order.
    ///
    /// # Errors
    ///
    /// Returns the first listing failure.
    pub fn depths(&self) -> PipelineResult<Vec<(String, usize)>> {
        self.all()
            .into_iter()
            .map(|queue| Ok((queue.name().to_string(), queue.depth()?)))
            .collect()
    }
}

/// Splitter implementation for a configured kind.
#[must_use]
pub fn splitter_for(kind: SplitterKind) -> Arc<dyn Splitter> {
    match kind {
        SplitterKind::Native => Arc::new(NativeSplitter),
        SplitterKind::Command => Arc::new(CommandSplitter::default()),
    }
}

/// The split worker (`ready -> processing`) and upload worker (`processing -> complete`).
pub struct Workers {
    /// Worker running the split stage.
    pub split: QueueWorker,
    /// Worker running the upload stage.
    pub upload: QueueWorker,
}

impl Workers {
    /// Build both workers over `queues`, shipping parts through `transferer`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] for an out-of-range chunk size
    /// or a failure creating the split working directory.
    pub fn build(
        settings: &PipelineSettings,
        queues: &QueueSet,
        transferer: Arc<dyn Transferer>,
        metrics: &Metrics,
    ) -> PipelineResult<Self> {
        let workdir = settings.split_dir();
        std::fs::create_dir_all(&workdir)
            .map_err(|source| PipelineError::io("layout.split_dir", &workdir, source))?;
        let policy = WorkerPolicy::from_settings(settings);
        let split_stage =
            SplitStage::new(workdir, settings.chunk_size, splitter_for(settings.splitter))?;
        let upload_stage = UploadStage::new(transferer, settings.max_part_retries, metrics.clone());
        let dead_letter: Arc<dyn WorkQueue> = queues.abandoned.clone();
        Ok(Self {
            split: QueueWorker::new(
                queues.ready.clone(),
                queues.processing.clone(),
                Arc::clone(&dead_letter),
                Arc::new(split_stage),
                policy,
                metrics.clone(),
            ),
            upload: QueueWorker::new(
                queues.processing.clone(),
                queues.complete.clone(),
                dead_letter,
                Arc::new(upload_stage),
                policy,
                metrics.clone(),
            ),
        })
    }
}

//! Poll loop driving one stage between an input and an output queue.
//!
//! # Design
//! - One iteration handles at most one request: peek, load, check the retry ceiling,
//!   run the stage, then move or record the failure.
//! - Success writes the output copy before removing the input copy; a crash in between
//!   leaves a duplicate that [`reconcile`] clears on the next start.
//! - Stage failures never escape an iteration. They bump `failures` on the request and
//!   leave it in place; requests past their ceiling go to the dead-letter queue.
//! - An output file held by a different job counts as a failed attempt; the job stays
//!   in its input queue rather than overwrite the other one.
//! - Files that cannot be loaded are moved aside so they never block the queue head.
//! - Shutdown is observed between iterations only; a running `handle` always finishes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use baknado_config::PipelineSettings;
use baknado_telemetry::Metrics;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::queue::WorkQueue;
use crate::reconcile::{reconcile, reconcile_abandoned};
use crate::request::Request;
use crate::stage::Stage;

/// Retry and pacing knobs for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPolicy {
    /// Default ceiling on request failures when a request does not set its own.
    pub max_retries: u32,
    /// Wait after an idle or failed poll.
    pub poll_interval: Duration,
    /// Wait after a productive iteration.
    pub pause: Duration,
}

impl WorkerPolicy {
    /// Derive the policy from pipeline settings.
    #[must_use]
    pub const fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            poll_interval: settings.poll_interval(),
            pause: settings.pause(),
        }
    }
}

/// What a single iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The input queue was empty.
    Idle,
    /// The stage succeeded and the request moved to the output queue.
    Completed(PathBuf),
    /// The stage failed, or the output queue held another job under the same name;
    /// the request stays in the input queue.
    Failed {
        /// Input file of the request.
        path: PathBuf,
        /// Failure count after this attempt.
        failures: u32,
    },
    /// The request exceeded its retry ceiling and moved to the dead-letter queue.
    Abandoned(PathBuf),
    /// The input file was not a valid request and moved to the dead-letter queue.
    Rejected(PathBuf),
}

impl IterationOutcome {
    const fn metric_label(&self) -> Option<&'static str> {
        match self {
            Self::Idle => None,
            Self::Completed(_) => Some("completed"),
            Self::Failed { .. } => Some("failed"),
            Self::Abandoned(_) | Self::Rejected(_) => Some("abandoned"),
        }
    }
}

/// Drives one [`Stage`] over an input queue.
pub struct QueueWorker {
    input: Arc<dyn WorkQueue>,
    output: Arc<dyn WorkQueue>,
    dead_letter: Arc<dyn WorkQueue>,
    stage: Arc<dyn Stage>,
    policy: WorkerPolicy,
    metrics: Metrics,
}

impl QueueWorker {
    /// Wire a worker moving requests from `input` to `output` through `stage`.
    #[must_use]
    pub fn new(
        input: Arc<dyn WorkQueue>,
        output: Arc<dyn WorkQueue>,
        dead_letter: Arc<dyn WorkQueue>,
        stage: Arc<dyn Stage>,
        policy: WorkerPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            input,
            output,
            dead_letter,
            stage,
            policy,
            metrics,
        }
    }

    /// Name of the stage this worker runs.
    #[must_use]
    pub fn stage_name(&self) -> &'static str {
        self.stage.name()
    }

    /// Drop input copies of requests the output (or dead-letter) queue already holds.
    ///
    /// # Errors
    ///
    /// Returns the queue listing or removal failure.
    pub fn reconcile(&self) -> PipelineResult<Vec<PathBuf>> {
        let mut removed = reconcile(self.input.as_ref(), self.output.as_ref())?;
        removed.extend(reconcile_abandoned(
            self.input.as_ref(),
            self.dead_letter.as_ref(),
            self.policy.max_retries,
        )?);
        Ok(removed)
    }

    /// Process at most one request.
    ///
    /// # Errors
    ///
    /// Returns queue IO failures. Stage failures are recorded on the request and
    /// reported as [`IterationOutcome::Failed`] instead.
    pub async fn run_once(&self) -> PipelineResult<IterationOutcome> {
        let stage = self.stage.name();
        let outcome = self.step().await?;
        if let Some(label) = outcome.metric_label() {
            self.metrics.inc_request(stage, label);
        }
        for queue in [&self.input, &self.output, &self.dead_letter] {
            if let Ok(depth) = queue.depth() {
                self.metrics.set_queue_depth(queue.name(), depth);
            }
        }
        Ok(outcome)
    }

    async fn step(&self) -> PipelineResult<IterationOutcome> {
        let Some(path) = self.input.peek_next()? else {
            return Ok(IterationOutcome::Idle);
        };
        let mut request = match Request::load(&path) {
            Ok(request) => request,
            Err(err) => {
                let moved = self.dead_letter.adopt_file(&path)?;
                error!(
                    request = %path.display(),
                    moved_to = %moved.display(),
                    error = %err,
                    "unreadable request moved to dead-letter queue"
                );
                return Ok(IterationOutcome::Rejected(moved));
            }
        };

        let ceiling = request.retry_ceiling(self.policy.max_retries);
        if request.retries_exhausted(self.policy.max_retries) {
            let moved = match self.dead_letter.enqueue(&mut request) {
                Ok(moved) => {
                    self.input.dequeue_path(&path)?;
                    moved
                }
                Err(PipelineError::QueueConflict { .. }) => self.dead_letter.adopt_file(&path)?,
                Err(err) => return Err(err),
            };
            error!(
                request = %path.display(),
                backup = %request.path.display(),
                failures = request.failures,
                max_retries = ceiling,
                moved_to = %moved.display(),
                "request abandoned after exhausting retries"
            );
            return Ok(IterationOutcome::Abandoned(moved));
        }

        let started = Instant::now();
        let result = self.stage.handle(&mut request).await;
        self.metrics
            .observe_stage_latency(self.stage.name(), started.elapsed());

        match result {
            Ok(()) => match self.output.enqueue(&mut request) {
                Ok(moved) => {
                    self.input.dequeue_path(&path)?;
                    info!(
                        request = %path.display(),
                        moved_to = %moved.display(),
                        elapsed_ms = started.elapsed().as_millis(),
                        "stage completed"
                    );
                    Ok(IterationOutcome::Completed(moved))
                }
                Err(err @ PipelineError::QueueConflict { .. }) => {
                    self.record_failure(path, &mut request, &err, ceiling)
                }
                Err(err) => Err(err),
            },
            Err(err) => self.record_failure(path, &mut request, &err, ceiling),
        }
    }

    fn record_failure(
        &self,
        path: PathBuf,
        request: &mut Request,
        err: &PipelineError,
        ceiling: u32,
    ) -> PipelineResult<IterationOutcome> {
        request.failures = request.failures.saturating_add(1);
        request.persist()?;
        if err.is_permanent() {
            error!(
                request = %path.display(),
                stage = self.stage.name(),
                failures = request.failures,
                max_retries = ceiling,
                error = %err,
                "stage failed permanently; operator attention required"
            );
        } else {
            warn!(
                request = %path.display(),
                stage = self.stage.name(),
                failures = request.failures,
                max_retries = ceiling,
                error = %err,
                "stage failed; will retry"
            );
        }
        Ok(IterationOutcome::Failed {
            path,
            failures: request.failures,
        })
    }

    /// Poll until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let span = info_span!("queue_worker", stage = self.stage.name());
        async move {
            match self.reconcile() {
                Ok(removed) if !removed.is_empty() => {
                    info!(removed = removed.len(), "duplicate requests reconciled");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "reconciliation failed"),
            }
            info!(
                input = self.input.name(),
                output = self.output.name(),
                "queue worker started"
            );
            while !*shutdown.borrow() {
                let delay = match self.run_once().await {
                    Ok(IterationOutcome::Idle) => self.policy.poll_interval,
                    Ok(outcome) => {
                        debug!(?outcome, "iteration finished");
                        self.policy.pause
                    }
                    Err(err) => {
                        error!(error = %err, "queue iteration failed");
                        self.policy.poll_interval
                    }
                };
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("queue worker stopped");
        }
        .instrument(span)
        .await;
    }
}

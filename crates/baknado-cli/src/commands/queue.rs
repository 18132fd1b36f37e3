//! Pipeline queue inspection and duplicate cleanup.

use std::fmt::Write as _;

use baknado_pipeline::{QueueSet, reconcile, reconcile_abandoned};

use crate::cli::OutputFormat;
use crate::context::{CliContext, CliResult, pipeline_error};
use crate::output::{render_depths, to_json};

pub(crate) fn handle_queue_status(ctx: &CliContext) -> CliResult<String> {
    let queues = QueueSet::open(&ctx.config.config().pipeline).map_err(pipeline_error)?;
    let depths = queues.depths().map_err(pipeline_error)?;
    render_depths(&depths, ctx.output)
}

/// Drop input copies of requests that a later queue already holds.
///
/// Pairs follow the worker moves: each stage input against its output and
/// against the dead-letter queue. Resubmitted jobs with retries left are kept.
pub(crate) fn handle_queue_reconcile(ctx: &CliContext) -> CliResult<String> {
    let settings = &ctx.config.config().pipeline;
    let queues = QueueSet::open(settings).map_err(pipeline_error)?;
    let mut removed = Vec::new();
    for (input, output) in [
        (&queues.ready, &queues.processing),
        (&queues.processing, &queues.complete),
    ] {
        removed.extend(reconcile(&**input, &**output).map_err(pipeline_error)?);
        removed.extend(
            reconcile_abandoned(&**input, &*queues.abandoned, settings.max_retries)
                .map_err(pipeline_error)?,
        );
    }
    match ctx.output {
        OutputFormat::Json => to_json(&removed),
        OutputFormat::Table => {
            let mut text = format!("Removed {} duplicate request(s)", removed.len());
            for path in &removed {
                let _ = write!(text, "\n  {}", path.display());
            }
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::CliFixture;
    use baknado_pipeline::{Request, WorkQueue};

    type TestResult<T> = anyhow::Result<T>;

    fn open(fixture: &CliFixture) -> TestResult<QueueSet> {
        Ok(QueueSet::open(&fixture.ctx.config.config().pipeline)?)
    }

    #[test]
    fn status_reports_every_queue() -> TestResult<()> {
        let fixture = CliFixture::filesystem(OutputFormat::Json)?;
        let queues = open(&fixture)?;
        let backup = fixture.write_local("db.tgz", b"payload")?;
        queues
            .ready
            .enqueue(&mut Request::for_backup(&backup, "prod")?)?;

        let text = handle_queue_status(&fixture.ctx)
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(value.as_array().map(Vec::len), Some(4));
        assert_eq!(value[0]["queue"], "ready");
        assert_eq!(value[0]["depth"], 1);
        assert_eq!(value[3]["queue"], "abandoned");
        Ok(())
    }

    #[test]
    fn reconcile_removes_stale_input_copies() -> TestResult<()> {
        let fixture = CliFixture::filesystem(OutputFormat::Table)?;
        let queues = open(&fixture)?;
        let backup = fixture.write_local("db.tgz", b"payload")?;
        let mut request = Request::for_backup(&backup, "prod")?;
        let stale = queues.ready.enqueue(&mut request)?;
        request.source = None;
        queues.processing.enqueue(&mut request)?;

        let text = handle_queue_reconcile(&fixture.ctx)
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        assert!(text.starts_with("Removed 1 duplicate request(s)"));
        assert!(text.contains(&stale.display().to_string()));
        assert_eq!(queues.ready.depth()?, 0);
        assert_eq!(queues.processing.depth()?, 1);
        Ok(())
    }

    #[test]
    fn reconcile_keeps_resubmitted_abandoned_jobs() -> TestResult<()> {
        let fixture = CliFixture::filesystem(OutputFormat::Json)?;
        let queues = open(&fixture)?;
        let backup = fixture.write_local("db.tgz", b"payload")?;
        let mut request = Request::for_backup(&backup, "prod")?;
        request.failures = 9;
        queues.abandoned.enqueue(&mut request)?;
        request.failures = 0;
        let resubmitted = queues.ready.enqueue(&mut request)?;

        let text = handle_queue_reconcile(&fixture.ctx)
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        let removed: Vec<std::path::PathBuf> = serde_json::from_str(&text)?;
        assert!(removed.is_empty());
        assert!(resubmitted.is_file());
        Ok(())
    }
}

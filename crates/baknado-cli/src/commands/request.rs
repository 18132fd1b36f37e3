//! Describe backups as pipeline requests.

use baknado_pipeline::{QueueSet, Request, WorkQueue};
use tracing::info;

use crate::cli::RequestNewArgs;
use crate::context::{CliContext, CliResult, config_error, pipeline_error};
use crate::output::to_json;

/// Hash the backup and either print the request or drop it into `ready/`.
pub(crate) fn handle_request_new(ctx: &CliContext, args: &RequestNewArgs) -> CliResult<String> {
    let config = ctx.config.config();
    config.container(&args.repo).map_err(config_error)?;
    let mut request = Request::for_backup(&args.path, &args.repo).map_err(pipeline_error)?;
    if !args.enqueue {
        return to_json(&request);
    }
    let queues = QueueSet::open(&config.pipeline).map_err(pipeline_error)?;
    let queued = queues.ready.enqueue(&mut request).map_err(pipeline_error)?;
    info!(
        backup = %request.path.display(),
        request = %queued.display(),
        repo = %request.repo,
        "request queued"
    );
    Ok(format!("Queued {}", queued.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::commands::fixtures::CliFixture;
    use crate::context::CliError;
    use baknado_pipeline::DigestAlgorithm;

    type TestResult<T> = anyhow::Result<T>;

    fn args(fixture: &CliFixture, repo: &str, enqueue: bool) -> TestResult<RequestNewArgs> {
        Ok(RequestNewArgs {
            path: fixture.write_local("db.tgz", b"hello world")?,
            repo: repo.to_string(),
            enqueue,
        })
    }

    #[test]
    fn prints_request_with_md5() -> TestResult<()> {
        let fixture = CliFixture::filesystem(OutputFormat::Table)?;
        let text = handle_request_new(&fixture.ctx, &args(&fixture, "prod", false)?)
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        let request: Request = serde_json::from_str(&text)?;
        assert_eq!(request.checksum, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(request.algorithm, DigestAlgorithm::Md5);
        assert_eq!(request.repo, "prod");
        assert!(request.parts.is_empty());
        assert_eq!(request.failures, 0);
        Ok(())
    }

    #[test]
    fn enqueue_lands_in_ready_queue() -> TestResult<()> {
        let fixture = CliFixture::filesystem(OutputFormat::Table)?;
        let text = handle_request_new(&fixture.ctx, &args(&fixture, "prod", true)?)
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        let queued = fixture.temp.path().join("pipeline/ready/db.tgz.msg.json");
        assert_eq!(text, format!("Queued {}", queued.display()));
        let request = Request::load(&queued)?;
        assert_eq!(request.repo, "prod");
        Ok(())
    }

    #[test]
    fn unknown_repo_is_rejected_before_hashing() -> TestResult<()> {
        let fixture = CliFixture::filesystem(OutputFormat::Table)?;
        let result = handle_request_new(&fixture.ctx, &args(&fixture, "staging", true)?);
        assert!(matches!(result, Err(CliError::Validation(_))));
        assert!(!fixture.temp.path().join("pipeline/ready").exists());
        Ok(())
    }
}

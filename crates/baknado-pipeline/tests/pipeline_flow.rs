//! End-to-end runs of the split and upload workers over real queue directories.

use std::fs;
use std::sync::Arc;

use baknado_pipeline::{IterationOutcome, PartKind, Request, Transferer, WorkQueue, Workers};
use baknado_telemetry::Metrics;
use baknado_test_support::fixtures::PipelineWorkspace;
use baknado_test_support::mocks::{RecordingTransferer, RejectingTransferer};

type TestResult<T> = anyhow::Result<T>;

fn small_chunks() -> TestResult<PipelineWorkspace> {
    PipelineWorkspace::with_settings(|settings| {
        settings.chunk_size = 4;
        settings.max_retries = 1;
    })
}

fn workers(
    workspace: &PipelineWorkspace,
    transferer: Arc<dyn Transferer>,
    metrics: &Metrics,
) -> TestResult<Workers> {
    Ok(Workers::build(
        workspace.settings(),
        workspace.queues(),
        transferer,
        metrics,
    )?)
}

#[tokio::test]
async fn backup_travels_from_ready_to_complete() -> TestResult<()> {
    let workspace = small_chunks()?;
    let backup = workspace.write_backup("db.tgz", 10)?;
    workspace.submit(&backup, "prod")?;
    let transferer = Arc::new(RecordingTransferer::new(workspace.remote_root()));
    let metrics = Metrics::new()?;
    let workers = workers(&workspace, transferer.clone(), &metrics)?;

    let split = workers.split.run_once().await?;
    assert!(matches!(split, IterationOutcome::Completed(_)));
    let queues = workspace.queues();
    assert_eq!(queues.ready.depth()?, 0);
    assert_eq!(queues.processing.depth()?, 1);

    let upload = workers.upload.run_once().await?;
    let IterationOutcome::Completed(done) = upload else {
        anyhow::bail!("upload did not complete: {upload:?}");
    };
    assert_eq!(queues.processing.depth()?, 0);
    assert_eq!(queues.complete.depth()?, 1);

    let request = Request::load(&done)?;
    assert_eq!(request.failures, 0);
    assert_eq!(request.parts.len(), 4);
    assert!(request.parts.iter().all(|part| part.failures == 0));
    assert_eq!(
        request
            .parts
            .iter()
            .filter(|part| part.kind == PartKind::Manifest)
            .count(),
        1
    );
    let parts_dir = request
        .parts_dir
        .clone()
        .ok_or_else(|| anyhow::anyhow!("parts_dir missing"))?;
    assert!(parts_dir.ends_with(format!("{}/db.tgz.parts", request.job_id())));
    assert!(!parts_dir.exists());
    assert!(fs::read_dir(workspace.settings().split_dir())?.next().is_none());

    assert_eq!(
        transferer.calls(),
        vec![
            "db.tgz.part_aa",
            "db.tgz.part_ab",
            "db.tgz.part_ac",
            "db.tgz.manifest.json"
        ]
    );
    let mut reassembled = Vec::new();
    for key in ["db.tgz.part_aa", "db.tgz.part_ab", "db.tgz.part_ac"] {
        reassembled.extend(fs::read(transferer.stored_path("prod", key))?);
    }
    assert_eq!(reassembled, fs::read(&backup)?);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.requests_completed, 2);
    assert_eq!(snapshot.parts_uploaded, 4);
    assert!(matches!(
        workers.split.run_once().await?,
        IterationOutcome::Idle
    ));
    Ok(())
}

#[tokio::test]
async fn flaky_part_is_retried_on_next_pass() -> TestResult<()> {
    let workspace = small_chunks()?;
    let backup = workspace.write_backup("db.tgz", 10)?;
    workspace.submit(&backup, "prod")?;
    let transferer = Arc::new(
        RecordingTransferer::new(workspace.remote_root()).fail_times("db.tgz.part_ab", 1),
    );
    let workers = workers(&workspace, transferer.clone(), &Metrics::new()?)?;

    workers.split.run_once().await?;
    let first = workers.upload.run_once().await?;
    let IterationOutcome::Failed { path, failures: 1 } = first else {
        anyhow::bail!("expected a first failure: {first:?}");
    };
    let pending = Request::load(&path)?;
    let failures: Vec<u32> = pending.parts.iter().map(|part| part.failures).collect();
    assert_eq!(failures, vec![0, 1, 0, 0]);

    assert!(matches!(
        workers.upload.run_once().await?,
        IterationOutcome::Completed(_)
    ));
    assert_eq!(
        transferer
            .calls()
            .iter()
            .filter(|key| key.as_str() == "db.tgz.part_ab")
            .count(),
        2
    );
    assert_eq!(transferer.calls().len(), 5);
    Ok(())
}

#[tokio::test]
async fn unreachable_store_ends_in_dead_letter_queue() -> TestResult<()> {
    let workspace = small_chunks()?;
    let backup = workspace.write_backup("db.tgz", 6)?;
    workspace.submit(&backup, "prod")?;
    let metrics = Metrics::new()?;
    let workers = workers(&workspace, Arc::new(RejectingTransferer), &metrics)?;

    workers.split.run_once().await?;
    assert!(matches!(
        workers.upload.run_once().await?,
        IterationOutcome::Failed { failures: 1, .. }
    ));
    assert!(matches!(
        workers.upload.run_once().await?,
        IterationOutcome::Failed { failures: 2, .. }
    ));
    assert!(matches!(
        workers.upload.run_once().await?,
        IterationOutcome::Abandoned(_)
    ));

    let queues = workspace.queues();
    assert_eq!(queues.processing.depth()?, 0);
    assert_eq!(
        PipelineWorkspace::queued_names(&*queues.abandoned)?,
        vec!["db.tgz.msg.json".to_string()]
    );
    assert_eq!(metrics.snapshot().requests_abandoned, 1);
    Ok(())
}

#[tokio::test]
async fn tampered_backup_is_never_split() -> TestResult<()> {
    let workspace = small_chunks()?;
    let backup = workspace.write_backup("db.tgz", 10)?;
    workspace.submit(&backup, "prod")?;
    fs::write(&backup, b"corrupted!")?;
    let workers = workers(
        &workspace,
        Arc::new(RecordingTransferer::new(workspace.remote_root())),
        &Metrics::new()?,
    )?;

    assert!(matches!(
        workers.split.run_once().await?,
        IterationOutcome::Failed { failures: 1, .. }
    ));
    assert!(matches!(
        workers.split.run_once().await?,
        IterationOutcome::Failed { failures: 2, .. }
    ));
    assert!(matches!(
        workers.split.run_once().await?,
        IterationOutcome::Abandoned(_)
    ));
    assert_eq!(workspace.queues().processing.depth()?, 0);
    let split_dir = workspace.settings().split_dir();
    assert!(!split_dir.exists() || fs::read_dir(&split_dir)?.next().is_none());
    Ok(())
}

#[tokio::test]
async fn crash_between_enqueue_and_dequeue_is_reconciled() -> TestResult<()> {
    let workspace = small_chunks()?;
    let backup = workspace.write_backup("db.tgz", 10)?;
    let mut original = workspace.submit(&backup, "prod")?;
    let workers = workers(
        &workspace,
        Arc::new(RecordingTransferer::new(workspace.remote_root())),
        &Metrics::new()?,
    )?;
    workers.split.run_once().await?;

    // The input copy reappears as if the worker died before removing it.
    original.source = None;
    workspace.queues().ready.enqueue(&mut original)?;
    assert_eq!(workspace.queues().ready.depth()?, 1);

    let removed = workers.split.reconcile()?;
    assert_eq!(removed.len(), 1);
    assert_eq!(workspace.queues().ready.depth()?, 0);
    assert_eq!(workspace.queues().processing.depth()?, 1);
    assert!(matches!(
        workers.split.run_once().await?,
        IterationOutcome::Idle
    ));
    Ok(())
}

#[tokio::test]
async fn replaying_a_split_request_is_a_no_op() -> TestResult<()> {
    let workspace = small_chunks()?;
    let backup = workspace.write_backup("db.tgz", 10)?;
    workspace.submit(&backup, "prod")?;
    let workers = workers(
        &workspace,
        Arc::new(RecordingTransferer::new(workspace.remote_root())),
        &Metrics::new()?,
    )?;
    let IterationOutcome::Completed(split_path) = workers.split.run_once().await? else {
        anyhow::bail!("split did not complete");
    };
    let split = Request::load(&split_path)?;

    // Re-running the split stage on an already split request leaves it untouched.
    let mut replay = split.clone();
    replay.source = None;
    workspace.queues().ready.enqueue(&mut replay)?;
    fs::remove_file(&split_path)?;
    let IterationOutcome::Completed(again) = workers.split.run_once().await? else {
        anyhow::bail!("replayed split did not complete");
    };
    let replayed = Request::load(&again)?;
    assert_eq!(replayed.parts, split.parts);
    assert_eq!(replayed.parts_dir, split.parts_dir);
    Ok(())
}

#[tokio::test]
async fn same_named_backups_never_displace_each_other() -> TestResult<()> {
    let workspace = small_chunks()?;
    let transferer = Arc::new(RecordingTransferer::new(workspace.remote_root()));
    let metrics = Metrics::new()?;
    let workers = workers(&workspace, transferer, &metrics)?;
    let queues = workspace.queues();

    let day_one = workspace.write_backup("d1/backup.tgz", 18)?;
    workspace.submit(&day_one, "prod")?;
    let IterationOutcome::Completed(first) = workers.split.run_once().await? else {
        anyhow::bail!("first split did not complete");
    };
    let first = Request::load(&first)?;
    let first_dir = first
        .parts_dir
        .clone()
        .ok_or_else(|| anyhow::anyhow!("parts_dir missing"))?;
    assert_eq!(fs::read_dir(&first_dir)?.count(), 6);

    let day_two = workspace.write_backup("d2/backup.tgz", 7)?;
    let second = workspace.submit(&day_two, "prod")?;
    assert!(matches!(
        workers.split.run_once().await?,
        IterationOutcome::Failed { failures: 1, .. }
    ));

    let held = queues
        .processing
        .peek_next()?
        .ok_or_else(|| anyhow::anyhow!("processing queue empty"))?;
    assert!(Request::load(&held)?.same_job(&first));
    assert_eq!(fs::read_dir(&first_dir)?.count(), 6);
    let waiting = Request::load(&queues.ready.directory().join("backup.tgz.msg.json"))?;
    assert!(waiting.same_job(&second));
    assert_eq!(waiting.failures, 1);
    assert_ne!(waiting.parts_dir, first.parts_dir);
    Ok(())
}

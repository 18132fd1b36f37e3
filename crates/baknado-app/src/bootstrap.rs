//! Boot sequence for the `baknado` daemon.
//!
//! # Design
//! - Configuration is read once at startup; changing it requires a restart.
//! - Both workers share one shutdown channel and finish their current iteration
//!   before returning, so no stage is interrupted halfway.
//! - The pipeline half of the boot takes its transferer and shutdown future as
//!   arguments so tests can drive it without a real object store or signal.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use baknado_config::{
    BaknadoConfig, ConfigFile, LogFormatSetting, LoggingSettings, PipelineSettings,
    resolve_config_path,
};
use baknado_objstore::StoreRegistry;
use baknado_pipeline::{ObjectStoreTransferer, QueueSet, Transferer, WorkQueue, Workers};
use baknado_telemetry::{LogFormat, LoggingConfig, Metrics, build_sha, init_logging};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Everything the daemon needs before workers can start.
pub(crate) struct BootstrapDependencies {
    config_path: PathBuf,
    config: BaknadoConfig,
    transferer: Arc<dyn Transferer>,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Resolve the config file (flag-less: `BAKNADO_CONFIG` or the home default)
    /// and build the object-store backed transferer.
    pub(crate) fn from_env() -> AppResult<Self> {
        let config_path = resolve_config_path(None)
            .map_err(|err| AppError::config("config.resolve_path", err))?;
        let file = ConfigFile::load_or_default(&config_path)
            .map_err(|err| AppError::config("config.load", err))?;
        let proxy = file
            .resolve_proxy(None)
            .map_err(|err| AppError::config("config.resolve_proxy", err))?;
        let config = file.into_config();
        let registry = Arc::new(StoreRegistry::new(config.clone(), proxy));
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            config_path,
            config,
            transferer: Arc::new(ObjectStoreTransferer::new(registry)),
            metrics,
        })
    }
}

/// Entry point for the daemon boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, queue setup or worker wiring fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    let logging = logging_config(&dependencies.config.logging);
    init_logging(&logging).map_err(|err| AppError::telemetry("telemetry.init", err))?;
    info!(
        config = %dependencies.config_path.display(),
        root = %dependencies.config.pipeline.root.display(),
        "baknado starting"
    );

    run_pipeline(
        &dependencies.config.pipeline,
        dependencies.transferer,
        &dependencies.metrics,
        shutdown_signal(),
    )
    .await
}

/// Open the queues and run both workers until `shutdown` resolves.
pub(crate) async fn run_pipeline(
    settings: &PipelineSettings,
    transferer: Arc<dyn Transferer>,
    metrics: &Metrics,
    shutdown: impl Future<Output = ()>,
) -> AppResult<()> {
    let queues =
        QueueSet::open(settings).map_err(|err| AppError::pipeline("queues.open", err))?;
    let Workers { split, upload } = Workers::build(settings, &queues, transferer, metrics)
        .map_err(|err| AppError::pipeline("workers.build", err))?;
    info!(
        ready = %queues.ready.directory().display(),
        chunk_size = settings.chunk_size,
        max_retries = settings.max_retries,
        "workers starting"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let trigger = async move {
        shutdown.await;
        info!("shutdown requested; finishing current iterations");
        if stop_tx.send(true).is_err() {
            warn!("workers stopped before the shutdown signal");
        }
    };
    tokio::join!(split.run(stop_rx.clone()), upload.run(stop_rx), trigger);

    let snapshot = metrics.snapshot();
    info!(
        requests_completed = snapshot.requests_completed,
        requests_failed = snapshot.requests_failed,
        requests_abandoned = snapshot.requests_abandoned,
        parts_uploaded = snapshot.parts_uploaded,
        bytes_uploaded = snapshot.bytes_uploaded,
        "baknado stopped"
    );
    Ok(())
}

fn logging_config(settings: &LoggingSettings) -> LoggingConfig<'_> {
    let format = match settings.format {
        Some(LogFormatSetting::Json) => LogFormat::Json,
        Some(LogFormatSetting::Pretty) => LogFormat::Pretty,
        None => LogFormat::infer(),
    };
    LoggingConfig {
        level: &settings.level,
        format,
        build_sha: build_sha(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable; stopping");
    }
}

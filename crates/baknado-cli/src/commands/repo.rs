//! Object access within one repository.

use std::path::{Path, PathBuf};
use std::time::Instant;

use baknado_objstore::{ObjectInfo, ObjectStore};

use crate::cli::{OutputFormat, RepoCommand};
use crate::context::{CliContext, CliError, CliResult, store_error};
use crate::output::{render_objects, transfer_summary};

pub(crate) async fn handle_repo(
    ctx: &CliContext,
    name: &str,
    command: RepoCommand,
) -> CliResult<String> {
    let store = ctx.registry.repo(name).map_err(store_error)?;
    let store = store.as_ref();
    match command {
        RepoCommand::List { target } => list(store, target.as_deref(), ctx.output).await,
        RepoCommand::Hash { target } => Ok(describe(store, &target).await?.hash),
        RepoCommand::Get { src, dest } => {
            let dest = dest.unwrap_or_else(|| default_download_path(&src));
            let started = Instant::now();
            let bytes = store.get(&src, &dest).await.map_err(store_error)?;
            Ok(transfer_summary(bytes, started.elapsed()))
        }
        RepoCommand::Put { src, dest } => {
            let key = match dest {
                Some(key) => key,
                None => default_key(&src)?,
            };
            let started = Instant::now();
            let info = store.put(&src, &key).await.map_err(store_error)?;
            Ok(transfer_summary(info.bytes, started.elapsed()))
        }
        RepoCommand::Delete { target } => {
            if store.delete(&target).await.map_err(store_error)? {
                Ok(format!("Deleted {target} from {}", store.label()))
            } else {
                Err(not_found(store, &target))
            }
        }
    }
}

async fn list(
    store: &dyn ObjectStore,
    target: Option<&str>,
    format: OutputFormat,
) -> CliResult<String> {
    let objects = match target {
        Some(key) => vec![describe(store, key).await?],
        None => store.list().await.map_err(store_error)?,
    };
    render_objects(&objects, format)
}

async fn describe(store: &dyn ObjectStore, key: &str) -> CliResult<ObjectInfo> {
    store
        .head(key)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(store, key))
}

fn not_found(store: &dyn ObjectStore, key: &str) -> CliError {
    CliError::validation(format!("object '{key}' not found in {}", store.label()))
}

fn default_download_path(key: &str) -> PathBuf {
    Path::new(key)
        .file_name()
        .map_or_else(|| PathBuf::from(key), PathBuf::from)
}

fn default_key(src: &Path) -> CliResult<String> {
    src.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CliError::validation(format!(
                "cannot derive an object name from {}; pass one explicitly",
                src.display()
            ))
        })
}

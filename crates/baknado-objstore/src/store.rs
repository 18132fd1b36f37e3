//! Capability traits implemented by every object-store backend.
//!
//! # Design
//! - `ObjectStore` is scoped to one container; `ServiceClient` manages containers.
//! - `put` verifies integrity itself: an acknowledged write whose digest differs
//!   from the local file is reported as [`StoreError::DigestMismatch`].

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use md5::{Digest, Md5};

use crate::error::{StoreError, StoreResult};
use crate::model::{ContainerInfo, ObjectInfo};

const READ_BUFFER: usize = 64 * 1024;

/// Operations against a single container.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable `service:container` label.
    fn label(&self) -> String;

    /// Upload `local` as `key`, verifying the stored digest.
    async fn put(&self, local: &Path, key: &str) -> StoreResult<ObjectInfo>;

    /// Download `key` into `dest`, returning the number of bytes written.
    async fn get(&self, key: &str, dest: &Path) -> StoreResult<u64>;

    /// Delete `key`, returning `false` when it did not exist.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// List every object in the container.
    async fn list(&self) -> StoreResult<Vec<ObjectInfo>>;

    /// Fetch metadata for `key`, or `None` when absent.
    async fn head(&self, key: &str) -> StoreResult<Option<ObjectInfo>>;
}

/// Container management for one configured service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Catalogue name of the service.
    fn name(&self) -> &str;

    /// Handle scoped to `container`; no remote call is made.
    fn container(&self, container: &str) -> Arc<dyn ObjectStore>;

    /// List containers owned by the account.
    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>>;

    /// Create `container`; creating an existing container succeeds.
    async fn create_container(&self, container: &str) -> StoreResult<()>;

    /// Delete `container`, returning `false` when it did not exist.
    async fn delete_container(&self, container: &str) -> StoreResult<bool>;
}

/// Compute the lowercase hex MD5 of a file without loading it into memory.
///
/// # Errors
///
/// Returns [`StoreError::Io`] when the file cannot be read.
pub async fn file_md5(path: &Path) -> StoreResult<String> {
    let owned: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || md5_blocking(&owned))
        .await
        .map_err(|join| StoreError::io("digest.join", path, std::io::Error::other(join)))?
}

fn md5_blocking(path: &Path) -> StoreResult<String> {
    let file = File::open(path).map_err(|source| StoreError::io("digest.open", path, source))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER, file);
    let mut hasher = Md5::new();
    let mut buffer = vec![0_u8; READ_BUFFER];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|source| StoreError::io("digest.read", path, source))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidInput {
            field: "key",
            reason: "must not be empty",
            value: None,
        });
    }
    if key.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(StoreError::InvalidInput {
            field: "key",
            reason: "must not contain relative path segments",
            value: Some(key.to_string()),
        });
    }
    Ok(())
}

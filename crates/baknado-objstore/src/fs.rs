//! Directory-backed object store.
//!
//! # Design
//! - A service is a root directory; each container is a sub-directory and each object a file.
//! - Writes land in a hidden staging file and are renamed into place once verified.
//! - Used for local deployments and as the integration-test backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::model::{ContainerInfo, ObjectInfo};
use crate::store::{ObjectStore, ServiceClient, file_md5, validate_key};

/// Filesystem service rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsService {
    name: String,
    root: PathBuf,
}

impl FsService {
    /// Create a service named `name` rooted at `root`.
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Root directory of the service.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ServiceClient for FsService {
    fn name(&self) -> &str {
        &self.name
    }

    fn container(&self, container: &str) -> Arc<dyn ObjectStore> {
        Arc::new(FsStore::new(
            format!("{}:{container}", self.name),
            self.root.join(container),
        ))
    }

    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>> {
        let mut containers = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(containers),
            Err(err) => return Err(StoreError::io("containers.list", &self.root, err)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StoreError::io("containers.list", &self.root, source))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|source| StoreError::io("containers.stat", entry.path(), source))?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let objects = FsStore::new(name.clone(), entry.path()).list().await?;
            containers.push(ContainerInfo {
                name,
                count: u64::try_from(objects.len()).unwrap_or(u64::MAX),
                bytes: objects.iter().map(|object| object.bytes).sum(),
            });
        }
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    async fn create_container(&self, container: &str) -> StoreResult<()> {
        validate_key(container)?;
        let path = self.root.join(container);
        fs::create_dir_all(&path)
            .await
            .map_err(|source| StoreError::io("containers.create", &path, source))?;
        info!(service = %self.name, container, "container created");
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> StoreResult<bool> {
        validate_key(container)?;
        let path = self.root.join(container);
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::io("containers.delete", &path, err)),
        }
    }
}

/// A single container backed by a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    label: String,
    dir: PathBuf,
}

impl FsStore {
    /// Create a store labelled `label` over `dir`.
    #[must_use]
    pub fn new(label: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            dir: dir.into(),
        }
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }

    async fn describe(&self, key: &str, path: &Path) -> StoreResult<ObjectInfo> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|source| StoreError::io("object.stat", path, source))?;
        Ok(ObjectInfo {
            name: key.to_string(),
            bytes: metadata.len(),
            hash: file_md5(path).await?,
            content_type: Some("application/octet-stream".to_string()),
            last_modified: None,
        })
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn put(&self, local: &Path, key: &str) -> StoreResult<ObjectInfo> {
        let dest = self.object_path(key)?;
        let local_digest = file_md5(local).await?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::io("object.create_dir", parent, source))?;
        }
        let staging = dest.with_file_name(format!(
            ".{}.upload",
            dest.file_name()
                .map_or_else(|| key.into(), |name| name.to_string_lossy())
        ));
        let bytes = fs::copy(local, &staging)
            .await
            .map_err(|source| StoreError::io("object.copy", &staging, source))?;
        let stored_digest = file_md5(&staging).await?;
        if stored_digest != local_digest {
            let _ = fs::remove_file(&staging).await;
            return Err(StoreError::DigestMismatch {
                key: key.to_string(),
                local: local_digest,
                remote: stored_digest,
            });
        }
        fs::rename(&staging, &dest)
            .await
            .map_err(|source| StoreError::io("object.rename", &dest, source))?;
        debug!(store = %self.label, key, bytes, "object stored");
        Ok(ObjectInfo {
            name: key.to_string(),
            bytes,
            hash: stored_digest,
            content_type: Some("application/octet-stream".to_string()),
            last_modified: None,
        })
    }

    async fn get(&self, key: &str, dest: &Path) -> StoreResult<u64> {
        let source = self.object_path(key)?;
        match fs::copy(&source, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::io("object.get", dest, err)),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::io("object.delete", &path, err)),
        }
    }

    async fn list(&self) -> StoreResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: self.label.clone(),
                });
            }
            Err(err) => return Err(StoreError::io("object.list", &self.dir, err)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StoreError::io("object.list", &self.dir, source))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map_err(|source| StoreError::io("object.stat", entry.path(), source))?
                .is_file();
            if is_file {
                objects.push(self.describe(&name, &entry.path()).await?);
            }
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectInfo>> {
        let path = self.object_path(key)?;
        if fs::try_exists(&path)
            .await
            .map_err(|source| StoreError::io("object.head", &path, source))?
        {
            self.describe(key, &path).await.map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn temp_dir() -> TestResult<TempDir> {
        Ok(tempfile::Builder::new().prefix("baknado-objstore-").tempdir()?)
    }

    #[tokio::test]
    async fn put_get_delete_cycle() -> TestResult<()> {
        let temp = temp_dir()?;
        let service = FsService::new("local", temp.path().join("store"));
        service.create_container("prod").await?;
        let store = service.container("prod");

        let local = temp.path().join("payload.bin");
        std::fs::write(&local, b"hello world")?;
        let stored = store.put(&local, "payload.bin").await?;
        assert_eq!(stored.bytes, 11);
        assert_eq!(stored.hash, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let head = store.head("payload.bin").await?;
        assert_eq!(head.map(|info| info.hash), Some(stored.hash.clone()));
        assert!(store.head("absent").await?.is_none());

        let dest = temp.path().join("restored.bin");
        assert_eq!(store.get("payload.bin", &dest).await?, 11);
        assert_eq!(std::fs::read(&dest)?, b"hello world");

        assert!(store.delete("payload.bin").await?);
        assert!(!store.delete("payload.bin").await?);
        assert!(matches!(
            store.get("payload.bin", &dest).await,
            Err(StoreError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn list_skips_staging_files_and_sorts() -> TestResult<()> {
        let temp = temp_dir()?;
        let service = FsService::new("local", temp.path());
        service.create_container("prod").await?;
        let dir = temp.path().join("prod");
        std::fs::write(dir.join("b.part_ab"), b"b")?;
        std::fs::write(dir.join("a.part_aa"), b"a")?;
        std::fs::write(dir.join(".c.upload"), b"partial")?;

        let names: Vec<String> = service
            .container("prod")
            .list()
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["a.part_aa", "b.part_ab"]);

        let containers = service.list_containers().await?;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].count, 2);
        assert_eq!(containers[0].bytes, 2);
        Ok(())
    }

    #[tokio::test]
    async fn delete_container_is_idempotent() -> TestResult<()> {
        let temp = temp_dir()?;
        let service = FsService::new("local", temp.path());
        service.create_container("scratch").await?;
        assert!(service.delete_container("scratch").await?);
        assert!(!service.delete_container("scratch").await?);
        assert!(matches!(
            service.container("scratch").list().await,
            Err(StoreError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn put_rejects_traversal_keys() -> TestResult<()> {
        let temp = temp_dir()?;
        let store = FsStore::new("local:prod", temp.path());
        let local = temp.path().join("payload.bin");
        std::fs::write(&local, b"x")?;
        assert!(matches!(
            store.put(&local, "../escape").await,
            Err(StoreError::InvalidInput { field: "key", .. })
        ));
        Ok(())
    }
}

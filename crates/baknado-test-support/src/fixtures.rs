//! Temporary pipeline workspaces and sample backups.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use baknado_config::PipelineSettings;
use baknado_pipeline::{QueueSet, Request, WorkQueue};
use tempfile::TempDir;

/// Deterministic, non-repeating-per-chunk payload of `len` bytes.
#[must_use]
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|index| u8::try_from(index % 251).unwrap_or_default())
        .collect()
}

/// A throwaway pipeline root with its queue directories already created.
///
/// The directory is deleted when the workspace is dropped.
pub struct PipelineWorkspace {
    temp: TempDir,
    settings: PipelineSettings,
    queues: QueueSet,
}

impl PipelineWorkspace {
    /// Workspace using default settings rooted in a fresh temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary directory or queues cannot be created.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_settings(|_| {})
    }

    /// Workspace whose settings are adjusted by `tweak` before the queues open.
    ///
    /// `root` is always forced back to the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary directory or queues cannot be created.
    pub fn with_settings(tweak: impl FnOnce(&mut PipelineSettings)) -> anyhow::Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("baknado-pipeline-")
            .tempdir()
            .context("create pipeline workspace")?;
        let mut settings = PipelineSettings::default();
        tweak(&mut settings);
        settings.root = temp.path().to_path_buf();
        let queues = QueueSet::open(&settings).context("open pipeline queues")?;
        Ok(Self {
            temp,
            settings,
            queues,
        })
    }

    /// Root of the workspace.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Effective settings.
    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Queue directories.
    #[must_use]
    pub const fn queues(&self) -> &QueueSet {
        &self.queues
    }

    /// Directory a local transferer can treat as the remote store.
    #[must_use]
    pub fn remote_root(&self) -> PathBuf {
        self.root().join("remote")
    }

    /// Write a backup of `len` sample bytes under `backups/`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write_backup(&self, name: &str, len: usize) -> anyhow::Result<PathBuf> {
        let path = self.root().join("backups").join(name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        fs::write(&path, sample_bytes(len)).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Describe `backup` for `repo` and drop the request into the ready queue.
    ///
    /// # Errors
    ///
    /// Returns an error when the backup cannot be hashed or the request cannot be queued.
    pub fn submit(&self, backup: &Path, repo: &str) -> anyhow::Result<Request> {
        let mut request = Request::for_backup(backup, repo)?;
        self.queues.ready.enqueue(&mut request)?;
        Ok(request)
    }

    /// File names currently queued in `queue`.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue cannot be listed.
    pub fn queued_names(queue: &dyn WorkQueue) -> anyhow::Result<Vec<String>> {
        Ok(queue
            .list_matching()?
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_bytes_wrap_at_prime() {
        let bytes = sample_bytes(260);
        assert_eq!(bytes.len(), 260);
        assert_eq!(bytes[250], 250);
        assert_eq!(bytes[251], 0);
    }

    #[test]
    fn submit_lands_in_ready_queue() -> anyhow::Result<()> {
        let workspace = PipelineWorkspace::with_settings(|settings| settings.chunk_size = 4)?;
        assert_eq!(workspace.settings().chunk_size, 4);
        assert_eq!(workspace.settings().root, workspace.root());

        let backup = workspace.write_backup("db.tgz", 10)?;
        let request = workspace.submit(&backup, "prod")?;
        assert_eq!(request.repo, "prod");
        assert_eq!(
            PipelineWorkspace::queued_names(&*workspace.queues().ready)?,
            vec!["db.tgz.msg.json".to_string()]
        );
        Ok(())
    }
}

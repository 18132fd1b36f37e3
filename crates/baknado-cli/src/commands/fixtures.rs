//! Filesystem-backed configuration used by command tests.

use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;

use crate::cli::OutputFormat;
use crate::context::CliContext;

pub(crate) struct CliFixture {
    pub(crate) temp: TempDir,
    pub(crate) ctx: CliContext,
}

impl CliFixture {
    /// One `local` filesystem service holding the `prod` repository.
    pub(crate) fn filesystem(output: OutputFormat) -> anyhow::Result<Self> {
        let temp = tempfile::Builder::new().prefix("baknado-cli-").tempdir()?;
        let store_root = temp.path().join("store");
        std::fs::create_dir_all(store_root.join("prod-backups"))?;
        let document = json!({
            "pipeline": { "root": temp.path().join("pipeline") },
            "services": [{
                "name": "local",
                "service_type": "filesystem",
                "storage_id": "-",
                "identity_domain": "-",
                "user": "-",
                "auth_key": "-",
                "auth_url": store_root.display().to_string()
            }],
            "containers": [
                { "name": "prod", "container": "prod-backups", "service": "local" }
            ],
            "proxies": [
                { "name": "corp", "host": "proxy.example.com", "port": 3128 }
            ]
        });
        let config_path = temp.path().join("config.json");
        std::fs::write(&config_path, serde_json::to_vec_pretty(&document)?)?;
        let ctx = CliContext::load(Some(&config_path), None, output)
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        Ok(Self { temp, ctx })
    }

    pub(crate) fn container_dir(&self) -> PathBuf {
        self.temp.path().join("store/prod-backups")
    }

    pub(crate) fn write_local(&self, name: &str, contents: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.temp.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

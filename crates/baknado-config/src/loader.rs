//! Loading, saving, and mutating the configuration file.
//!
//! # Design
//! - Path resolution order: explicit path, `BAKNADO_CONFIG`, then `$HOME/.baknado/config.json`.
//! - Documents are validated on load and before every write-back.
//! - Write-back goes through a temporary sibling and a rename so readers never see a torn file.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use url::Url;

use crate::defaults::{CONFIG_ENV, HOME_CONFIG_PATH, HTTP_PROXY_ENV};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{BaknadoConfig, ContainerConfig};
use crate::validate::validate_config;

/// Determine which configuration file to use.
///
/// # Errors
///
/// Returns [`ConfigError::PathUnavailable`] when no explicit path is given,
/// `BAKNADO_CONFIG` is unset, and `HOME` cannot be determined.
pub fn resolve_config_path(explicit: Option<&Path>) -> ConfigResult<PathBuf> {
    resolve_config_path_with(
        explicit,
        std::env::var_os(CONFIG_ENV),
        std::env::var_os("HOME"),
    )
}

fn resolve_config_path_with(
    explicit: Option<&Path>,
    env_path: Option<OsString>,
    home: Option<OsString>,
) -> ConfigResult<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env_path.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    home.filter(|value| !value.is_empty())
        .map(|home| PathBuf::from(home).join(HOME_CONFIG_PATH))
        .ok_or(ConfigError::PathUnavailable)
}

/// A configuration document bound to the file it was read from.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    config: BaknadoConfig,
}

impl ConfigFile {
    /// Read and validate the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the file cannot be read, a JSON error when it
    /// cannot be parsed, or a validation error.
    pub fn load(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let raw = fs::read_to_string(&path)
            .map_err(|source| ConfigError::io("config.read", &path, source))?;
        let config: BaknadoConfig = serde_json::from_str(&raw)
            .map_err(|source| ConfigError::json("config.parse", &path, source))?;
        validate_config(&config)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(Self { path, config })
    }

    /// Read the configuration at `path`, falling back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Propagates every failure from [`ConfigFile::load`] except a missing file.
    pub fn load_or_default(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        match Self::load(&path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "configuration file not found; using defaults");
                Ok(Self {
                    path,
                    config: BaknadoConfig::default(),
                })
            }
            other => other,
        }
    }

    /// Bind an in-memory document to a path without reading it.
    #[must_use]
    pub const fn from_parts(path: PathBuf, config: BaknadoConfig) -> Self {
        Self { path, config }
    }

    /// File backing this document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed document.
    #[must_use]
    pub const fn config(&self) -> &BaknadoConfig {
        &self.config
    }

    /// Consume the binding and return the parsed document.
    #[must_use]
    pub fn into_config(self) -> BaknadoConfig {
        self.config
    }

    /// Validate and persist the document back to its file.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or an IO/JSON error when writing fails.
    pub fn save(&self) -> ConfigResult<()> {
        validate_config(&self.config)?;
        let rendered = serde_json::to_string_pretty(&self.config)
            .map_err(|source| ConfigError::json("config.serialize", &self.path, source))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::io("config.create_dir", parent, source))?;
        }
        let staging = staging_path(&self.path);
        fs::write(&staging, rendered)
            .map_err(|source| ConfigError::io("config.write", &staging, source))?;
        fs::rename(&staging, &self.path)
            .map_err(|source| ConfigError::io("config.rename", &self.path, source))?;
        Ok(())
    }

    /// Register a container under `service` and write the document back.
    ///
    /// Returns `false` without writing when an entry with the same name and
    /// service already exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEntry`] when `service` is not configured,
    /// or any error from [`ConfigFile::save`].
    pub fn add_container(&mut self, container: &str, service: &str) -> ConfigResult<bool> {
        self.config.service(service)?;
        let duplicate = self
            .config
            .containers
            .iter()
            .any(|entry| entry.name == container && entry.service == service);
        if duplicate {
            warn!(container, service, "container already registered");
            return Ok(false);
        }
        self.config.containers.push(ContainerConfig {
            name: container.to_string(),
            container: container.to_string(),
            service: service.to_string(),
        });
        info!(
            path = %self.path.display(),
            container,
            service,
            "registering container in configuration"
        );
        self.save()?;
        Ok(true)
    }

    /// Select the proxy used for object-store traffic.
    ///
    /// A named proxy must exist in the catalogue; without a name the
    /// `HTTP_PROXY` environment variable is consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEntry`] for an unknown proxy name or
    /// [`ConfigError::InvalidField`] when `HTTP_PROXY` is not a URL.
    pub fn resolve_proxy(&self, name: Option<&str>) -> ConfigResult<Option<Url>> {
        resolve_proxy_with(&self.config, name, std::env::var(HTTP_PROXY_ENV).ok())
    }
}

fn resolve_proxy_with(
    config: &BaknadoConfig,
    name: Option<&str>,
    env_proxy: Option<String>,
) -> ConfigResult<Option<Url>> {
    if let Some(name) = name {
        return config.proxy(name)?.url().map(Some);
    }
    match env_proxy.filter(|value| !value.trim().is_empty()) {
        Some(raw) => Url::parse(&raw).map(Some).map_err(|_| {
            ConfigError::invalid(
                "environment",
                "HTTP_PROXY",
                "must be a valid URL",
                Some(raw.clone()),
            )
        }),
        None => Ok(None),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "config.json".into(), |name| name.to_string_lossy());
    path.with_file_name(format!(".{name}.tmp"))
}

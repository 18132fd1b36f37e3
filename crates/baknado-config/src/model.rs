//! Typed configuration document.
//!
//! # Design
//! - One JSON document carries both the pipeline layout and the object-store catalogue.
//! - Every section defaults so a partial file (or none at all) still yields a usable config.
//! - Derived values (queue directories, durations) are computed, never stored twice.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::defaults::{
    ABANDONED_DIR, COMPLETE_DIR, DEFAULT_CHUNK_SIZE, DEFAULT_LOG_LEVEL, DEFAULT_MAX_PART_RETRIES,
    DEFAULT_MAX_RETRIES, DEFAULT_PATTERN, DEFAULT_PAUSE_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_ROOT, PROCESSING_DIR, READY_DIR, SPLIT_DIR,
};
use crate::error::{ConfigError, ConfigResult};

/// Complete configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaknadoConfig {
    /// Queue layout and worker policy.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Logging preferences.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Object-store accounts.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// Named repositories mapping to a container within a service.
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
    /// HTTP proxies that may be selected by name.
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
}

impl BaknadoConfig {
    /// Look up a service by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEntry`] when no service carries `name`.
    pub fn service(&self, name: &str) -> ConfigResult<&ServiceConfig> {
        self.services
            .iter()
            .find(|service| service.name == name)
            .ok_or_else(|| ConfigError::UnknownEntry {
                section: "services",
                name: name.to_string(),
            })
    }

    /// Look up a repository (container entry) by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEntry`] when no container carries `name`.
    pub fn container(&self, name: &str) -> ConfigResult<&ContainerConfig> {
        self.containers
            .iter()
            .find(|container| container.name == name)
            .ok_or_else(|| ConfigError::UnknownEntry {
                section: "containers",
                name: name.to_string(),
            })
    }

    /// Look up a proxy by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEntry`] when no proxy carries `name`.
    pub fn proxy(&self, name: &str) -> ConfigResult<&ProxyConfig> {
        self.proxies
            .iter()
            .find(|proxy| proxy.name == name)
            .ok_or_else(|| ConfigError::UnknownEntry {
                section: "proxies",
                name: name.to_string(),
            })
    }
}

/// Pipeline queue layout and retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Directory under which the default queue directories live.
    pub root: PathBuf,
    /// Override for the ready queue directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_dir: Option<PathBuf>,
    /// Override for the processing queue directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_dir: Option<PathBuf>,
    /// Override for the complete queue directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_dir: Option<PathBuf>,
    /// Override for the abandoned (dead-letter) queue directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abandoned_dir: Option<PathBuf>,
    /// Override for the split working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_dir: Option<PathBuf>,
    /// Glob selecting request files within a queue directory.
    pub pattern: String,
    /// Upper bound on the size of a single part, in bytes.
    pub chunk_size: u64,
    /// Wait applied when the input queue is empty.
    pub poll_interval_ms: u64,
    /// Wait applied between processed jobs.
    pub pause_ms: u64,
    /// Request-level retry ceiling used when a request carries none.
    pub max_retries: u32,
    /// Part-level retry ceiling.
    pub max_part_retries: u32,
    /// Which splitter implementation produces parts.
    pub splitter: SplitterKind,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            ready_dir: None,
            processing_dir: None,
            complete_dir: None,
            abandoned_dir: None,
            split_dir: None,
            pattern: DEFAULT_PATTERN.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            pause_ms: DEFAULT_PAUSE_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_part_retries: DEFAULT_MAX_PART_RETRIES,
            splitter: SplitterKind::default(),
        }
    }
}

impl PipelineSettings {
    /// Directory holding requests waiting to be split.
    #[must_use]
    pub fn ready_dir(&self) -> PathBuf {
        self.resolve(self.ready_dir.as_deref(), READY_DIR)
    }

    /// Directory holding split requests waiting to be uploaded.
    #[must_use]
    pub fn processing_dir(&self) -> PathBuf {
        self.resolve(self.processing_dir.as_deref(), PROCESSING_DIR)
    }

    /// Directory holding fully uploaded requests.
    #[must_use]
    pub fn complete_dir(&self) -> PathBuf {
        self.resolve(self.complete_dir.as_deref(), COMPLETE_DIR)
    }

    /// Directory holding requests that exceeded their retry ceiling.
    #[must_use]
    pub fn abandoned_dir(&self) -> PathBuf {
        self.resolve(self.abandoned_dir.as_deref(), ABANDONED_DIR)
    }

    /// Working directory receiving per-request part directories.
    #[must_use]
    pub fn split_dir(&self) -> PathBuf {
        self.resolve(self.split_dir.as_deref(), SPLIT_DIR)
    }

    /// Idle poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pause between processed jobs.
    #[must_use]
    pub const fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    fn resolve(&self, explicit: Option<&Path>, default_leaf: &str) -> PathBuf {
        explicit.map_or_else(|| self.root.join(default_leaf), Path::to_path_buf)
    }
}

/// Splitter implementation selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterKind {
    /// Streaming in-process splitter.
    #[default]
    Native,
    /// External `split(1)` invocation.
    Command,
}

/// Logging preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format; inferred from the build profile when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormatSetting>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: None,
        }
    }
}

/// Log output format named in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormatSetting {
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

/// Object-store account credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Catalogue name.
    pub name: String,
    /// Service type advertised by the provider.
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Storage account identifier.
    pub storage_id: String,
    /// Identity domain of the account.
    pub identity_domain: String,
    /// Account user.
    pub user: String,
    /// Password or API key (not an auth token).
    pub auth_key: String,
    /// Authentication endpoint.
    pub auth_url: String,
    /// Authentication method label.
    #[serde(default = "default_auth_method")]
    pub auth_method: String,
}

impl ServiceConfig {
    /// Username presented to the authentication endpoint.
    #[must_use]
    pub fn username(&self) -> String {
        format!("{}-{}:{}", self.storage_id, self.identity_domain, self.user)
    }
}

fn default_service_type() -> String {
    "object-store".to_string()
}

fn default_auth_method() -> String {
    "password".to_string()
}

/// Repository entry mapping a name to a container in a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Repository name referenced by requests.
    pub name: String,
    /// Container name within the service.
    pub container: String,
    /// Owning service name.
    pub service: String,
}

/// HTTP proxy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Catalogue name.
    pub name: String,
    /// Proxy host.
    pub host: String,
    /// Proxy port; accepts either a number or a numeric string.
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
}

impl ProxyConfig {
    /// Render the proxy as an `http://host:port` URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the host cannot form a URL.
    pub fn url(&self) -> ConfigResult<Url> {
        let raw = format!("http://{}:{}", self.host, self.port);
        Url::parse(&raw).map_err(|_| {
            ConfigError::invalid("proxies", "host", "must form a valid URL", Some(raw.clone()))
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Number(u16),
    Text(String),
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse::<u16>()
            .map_err(|_| serde::de::Error::custom("port must be between 0 and 65535")),
    }
}

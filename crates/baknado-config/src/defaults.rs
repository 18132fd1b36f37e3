//! Default values for pipeline configuration.
//!
//! # Design
//! - Centralize defaults so the loader, validation, and tests agree.
//! - Size limits mirror the object store's single-object ceiling.

/// Root directory under which the queue directories are created.
pub const DEFAULT_ROOT: &str = "/tmp/backup";
/// Glob applied to queue entries when selecting request files.
pub const DEFAULT_PATTERN: &str = "*.msg.json";
/// Default chunk size (1 GiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;
/// Largest object a Swift cluster accepts in a single PUT (5 GiB).
pub const MAX_CHUNK_SIZE: u64 = 5 * 1024 * 1024 * 1024;
/// Idle poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Pause between processed jobs in milliseconds.
pub const DEFAULT_PAUSE_MS: u64 = 1_000;
/// Request-level retry ceiling applied when a request carries none.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Part-level retry ceiling; must stay below the request ceiling.
pub const DEFAULT_MAX_PART_RETRIES: u32 = 2;
/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "BAKNADO_CONFIG";
/// Environment variable consulted when no proxy is named.
pub const HTTP_PROXY_ENV: &str = "HTTP_PROXY";
/// Location of the configuration file relative to `$HOME`.
pub const HOME_CONFIG_PATH: &str = ".baknado/config.json";

pub(crate) const READY_DIR: &str = "ready";
pub(crate) const PROCESSING_DIR: &str = "processing";
pub(crate) const COMPLETE_DIR: &str = "complete";
pub(crate) const ABANDONED_DIR: &str = "abandoned";
pub(crate) const SPLIT_DIR: &str = "split";

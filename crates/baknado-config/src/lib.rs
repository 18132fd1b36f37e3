#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! File-backed configuration for the backup pipeline and object-store catalogue.
//!
//! Layout: `model.rs` (typed document), `defaults.rs` (default values),
//! `validate.rs` (document validation), `loader.rs` (path resolution, load/save,
//! container registration, proxy selection).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigFile, resolve_config_path};
pub use model::{
    BaknadoConfig, ContainerConfig, LogFormatSetting, LoggingSettings, PipelineSettings,
    ProxyConfig, ServiceConfig, SplitterKind,
};
pub use validate::validate_config;

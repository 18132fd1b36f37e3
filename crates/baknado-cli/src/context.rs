//! Loaded configuration, store registry, and the CLI error type.

use std::fmt::{self, Display, Formatter};
use std::path::Path;

use anyhow::anyhow;
use baknado_config::{ConfigError, ConfigFile, resolve_config_path};
use baknado_objstore::{StoreError, StoreRegistry};
use baknado_pipeline::PipelineError;

use crate::cli::OutputFormat;

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Everything a command handler needs.
pub(crate) struct CliContext {
    pub(crate) config: ConfigFile,
    pub(crate) registry: StoreRegistry,
    pub(crate) output: OutputFormat,
}

impl CliContext {
    /// Resolve and read the configuration, then select the proxy.
    pub(crate) fn load(
        config: Option<&Path>,
        proxy: Option<&str>,
        output: OutputFormat,
    ) -> CliResult<Self> {
        let path = resolve_config_path(config).map_err(config_error)?;
        let file = ConfigFile::load_or_default(path).map_err(config_error)?;
        let proxy = file.resolve_proxy(proxy).map_err(config_error)?;
        let registry = StoreRegistry::new(file.config().clone(), proxy);
        Ok(Self {
            config: file,
            registry,
            output,
        })
    }
}

pub(crate) fn config_error(err: ConfigError) -> CliError {
    match err {
        ConfigError::UnknownEntry { section, name } => {
            CliError::validation(format!("no entry named '{name}' in {section}"))
        }
        ConfigError::DuplicateEntry { section, name } => {
            CliError::validation(format!("entry '{name}' appears more than once in {section}"))
        }
        ConfigError::InvalidField {
            section,
            field,
            value,
            reason,
        } => CliError::validation(with_value(
            &format!("{section}.{field} {reason}"),
            value.as_deref(),
        )),
        ConfigError::PathUnavailable => CliError::validation(
            "no configuration path: pass --config, set BAKNADO_CONFIG, or set HOME",
        ),
        ConfigError::Io {
            operation,
            path,
            source,
        } => io_failure(operation, &path, source),
        ConfigError::Json {
            operation,
            path,
            source,
        } => io_failure(operation, &path, source),
    }
}

pub(crate) fn store_error(err: StoreError) -> CliError {
    match err {
        StoreError::Config(err) => config_error(err),
        StoreError::InvalidInput {
            field,
            reason,
            value,
        } => CliError::validation(with_value(
            &format!("invalid {field}: {reason}"),
            value.as_deref(),
        )),
        StoreError::NotFound { key } => CliError::validation(format!("'{key}' not found")),
        StoreError::Status {
            operation,
            url,
            status,
        } => CliError::failure(anyhow!("{operation}: {url} answered HTTP {status}")),
        StoreError::DigestMismatch { key, local, remote } => CliError::failure(anyhow!(
            "digest mismatch for {key}: local {local}, stored {remote}"
        )),
        StoreError::Io {
            operation,
            path,
            source,
        } => io_failure(operation, &path, source),
        other => CliError::failure(other),
    }
}

pub(crate) fn pipeline_error(err: PipelineError) -> CliError {
    match err {
        PipelineError::InvalidInput {
            field,
            reason,
            value,
        } => CliError::validation(with_value(
            &format!("invalid {field}: {reason}"),
            value.as_deref(),
        )),
        PipelineError::Store(err) => store_error(err),
        PipelineError::Io {
            operation,
            path,
            source,
        } => io_failure(operation, &path, source),
        other => CliError::failure(other),
    }
}

fn io_failure(
    operation: &str,
    path: &Path,
    source: impl std::error::Error + Send + Sync + 'static,
) -> CliError {
    CliError::failure(anyhow::Error::new(source).context(format!(
        "{operation} failed for {}",
        path.display()
    )))
}

fn with_value(message: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("{message} (got '{value}')"),
        None => message.to_string(),
    }
}

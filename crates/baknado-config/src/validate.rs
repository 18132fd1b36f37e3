//! Validation for configuration documents.
//!
//! # Design
//! - Validation is pure: it inspects a parsed document and never touches disk.
//! - The first violation wins; errors carry section, field, and offending value.

use std::collections::HashSet;

use globset::Glob;

use crate::defaults::MAX_CHUNK_SIZE;
use crate::error::{ConfigError, ConfigResult};
use crate::model::BaknadoConfig;

/// Validate a configuration document.
///
/// # Errors
///
/// Returns the first [`ConfigError`] describing an invalid field, a duplicate
/// catalogue entry, or a container referencing an unknown service.
pub fn validate_config(config: &BaknadoConfig) -> ConfigResult<()> {
    validate_pipeline(config)?;
    validate_catalogue(config)?;
    Ok(())
}

fn validate_pipeline(config: &BaknadoConfig) -> ConfigResult<()> {
    let pipeline = &config.pipeline;
    if pipeline.pattern.trim().is_empty() {
        return Err(ConfigError::invalid(
            "pipeline",
            "pattern",
            "must not be empty",
            None,
        ));
    }
    if Glob::new(&pipeline.pattern).is_err() {
        return Err(ConfigError::invalid(
            "pipeline",
            "pattern",
            "must be a valid glob",
            Some(pipeline.pattern.clone()),
        ));
    }
    if pipeline.chunk_size == 0 {
        return Err(ConfigError::invalid(
            "pipeline",
            "chunk_size",
            "must be positive",
            Some(pipeline.chunk_size.to_string()),
        ));
    }
    if pipeline.chunk_size > MAX_CHUNK_SIZE {
        return Err(ConfigError::invalid(
            "pipeline",
            "chunk_size",
            "must not exceed the object store single-object limit",
            Some(pipeline.chunk_size.to_string()),
        ));
    }
    if pipeline.max_part_retries >= pipeline.max_retries {
        return Err(ConfigError::invalid(
            "pipeline",
            "max_part_retries",
            "must be below max_retries",
            Some(pipeline.max_part_retries.to_string()),
        ));
    }
    if pipeline.poll_interval_ms == 0 {
        return Err(ConfigError::invalid(
            "pipeline",
            "poll_interval_ms",
            "must be positive",
            None,
        ));
    }
    if pipeline.root.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            "pipeline",
            "root",
            "must not be empty",
            None,
        ));
    }
    Ok(())
}

fn validate_catalogue(config: &BaknadoConfig) -> ConfigResult<()> {
    ensure_unique("services", config.services.iter().map(|s| s.name.as_str()))?;
    ensure_unique("proxies", config.proxies.iter().map(|p| p.name.as_str()))?;
    ensure_unique("containers", config.containers.iter().map(|c| c.name.as_str()))?;

    for service in &config.services {
        if service.auth_url.trim().is_empty() {
            return Err(ConfigError::invalid(
                "services",
                "auth_url",
                "must not be empty",
                Some(service.name.clone()),
            ));
        }
    }
    for proxy in &config.proxies {
        if proxy.port == 0 {
            return Err(ConfigError::invalid(
                "proxies",
                "port",
                "must be between 1 and 65535",
                Some(proxy.name.clone()),
            ));
        }
        proxy.url()?;
    }
    for container in &config.containers {
        if container.container.trim().is_empty() {
            return Err(ConfigError::invalid(
                "containers",
                "container",
                "must not be empty",
                Some(container.name.clone()),
            ));
        }
        config.service(&container.service)?;
    }
    Ok(())
}

fn ensure_unique<'a>(
    section: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ConfigError::invalid(section, "name", "must not be empty", None));
        }
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateEntry {
                section,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

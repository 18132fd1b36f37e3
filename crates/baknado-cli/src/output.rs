//! Table and JSON renderers for command output.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::anyhow;
use baknado_config::{ContainerConfig, ProxyConfig, ServiceConfig};
use baknado_objstore::{ContainerInfo, ObjectInfo};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::context::{CliError, CliResult};

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))
}

pub(crate) fn render_objects(objects: &[ObjectInfo], format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(objects),
        OutputFormat::Table => Ok(objects
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

pub(crate) fn render_containers(
    containers: &[ContainerInfo],
    format: OutputFormat,
) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(containers),
        OutputFormat::Table => {
            let mut text = format!("{:<32} {:>10} {:>14}", "CONTAINER", "OBJECTS", "BYTES");
            for container in containers {
                let _ = write!(
                    text,
                    "\n{:<32} {:>10} {:>14}",
                    container.name, container.count, container.bytes
                );
            }
            Ok(text)
        }
    }
}

pub(crate) fn render_repos(repos: &[ContainerConfig], format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(repos),
        OutputFormat::Table => {
            let mut text = format!("{:<24} {:<32} SERVICE", "REPO", "CONTAINER");
            for repo in repos {
                let _ = write!(
                    text,
                    "\n{:<24} {:<32} {}",
                    repo.name, repo.container, repo.service
                );
            }
            Ok(text)
        }
    }
}

/// Service entry without its credentials.
#[derive(Serialize)]
struct ServiceView<'a> {
    name: &'a str,
    service_type: &'a str,
    username: String,
    auth_url: &'a str,
    auth_method: &'a str,
}

pub(crate) fn render_services(
    services: &[ServiceConfig],
    format: OutputFormat,
) -> CliResult<String> {
    let views: Vec<ServiceView<'_>> = services
        .iter()
        .map(|service| ServiceView {
            name: &service.name,
            service_type: &service.service_type,
            username: service.username(),
            auth_url: &service.auth_url,
            auth_method: &service.auth_method,
        })
        .collect();
    match format {
        OutputFormat::Json => to_json(&views),
        OutputFormat::Table => {
            let mut text = format!("{:<20} {:<14} {:<32} AUTH_URL", "SERVICE", "TYPE", "USER");
            for view in &views {
                let _ = write!(
                    text,
                    "\n{:<20} {:<14} {:<32} {}",
                    view.name, view.service_type, view.username, view.auth_url
                );
            }
            Ok(text)
        }
    }
}

pub(crate) fn render_proxies(proxies: &[ProxyConfig], format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(proxies),
        OutputFormat::Table => {
            let mut text = format!("{:<20} {:<32} PORT", "PROXY", "HOST");
            for proxy in proxies {
                let _ = write!(text, "\n{:<20} {:<32} {}", proxy.name, proxy.host, proxy.port);
            }
            Ok(text)
        }
    }
}

#[derive(Serialize)]
struct QueueDepth<'a> {
    queue: &'a str,
    depth: usize,
}

pub(crate) fn render_depths(depths: &[(String, usize)], format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => {
            let rows: Vec<QueueDepth<'_>> = depths
                .iter()
                .map(|(queue, depth)| QueueDepth {
                    queue,
                    depth: *depth,
                })
                .collect();
            to_json(&rows)
        }
        OutputFormat::Table => {
            let mut text = format!("{:<12} {:>8}", "QUEUE", "REQUESTS");
            for (queue, depth) in depths {
                let _ = write!(text, "\n{queue:<12} {depth:>8}");
            }
            Ok(text)
        }
    }
}

pub(crate) fn transfer_summary(bytes: u64, elapsed: Duration) -> String {
    format!(
        "Transferred {bytes} bytes in {:.3} seconds",
        elapsed.as_secs_f64()
    )
}

//! Resolve configured repository and service names to live clients.
//!
//! # Design
//! - Service clients are built on first use and cached so authentication is shared.
//! - `service_type = "filesystem"` maps to [`FsService`] rooted at the `auth_url` path;
//!   every other type is treated as Swift.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use baknado_config::{BaknadoConfig, ServiceConfig};
use tracing::{debug, error};
use url::Url;

use crate::error::StoreResult;
use crate::fs::FsService;
use crate::store::{ObjectStore, ServiceClient};
use crate::swift::SwiftService;

/// Service type selecting the directory-backed store.
pub const FILESYSTEM_SERVICE_TYPE: &str = "filesystem";

type ServiceCache = HashMap<String, Arc<dyn ServiceClient>>;

/// Catalogue-backed factory for object-store clients.
pub struct StoreRegistry {
    config: BaknadoConfig,
    proxy: Option<Url>,
    services: Mutex<ServiceCache>,
}

impl StoreRegistry {
    /// Create a registry over `config`, routing Swift traffic through `proxy`.
    #[must_use]
    pub fn new(config: BaknadoConfig, proxy: Option<Url>) -> Self {
        Self {
            config,
            proxy,
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Catalogue the registry resolves against.
    #[must_use]
    pub const fn config(&self) -> &BaknadoConfig {
        &self.config
    }

    /// Resolve a service by catalogue name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown names, or a client
    /// construction error.
    pub fn service(&self, name: &str) -> StoreResult<Arc<dyn ServiceClient>> {
        if let Some(existing) = self.lock_services().get(name) {
            return Ok(Arc::clone(existing));
        }
        let config = self.config.service(name)?;
        let client = self.build_service(config)?;
        debug!(service = name, "object store client created");
        Ok(Arc::clone(
            self.lock_services()
                .entry(name.to_string())
                .or_insert(client),
        ))
    }

    /// Resolve a repository name (a `containers` entry) to its store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the repository or its service is unknown.
    pub fn repo(&self, name: &str) -> StoreResult<Arc<dyn ObjectStore>> {
        let entry = self.config.container(name)?;
        let service = self.service(&entry.service)?;
        Ok(service.container(&entry.container))
    }

    fn build_service(&self, config: &ServiceConfig) -> StoreResult<Arc<dyn ServiceClient>> {
        if config.service_type == FILESYSTEM_SERVICE_TYPE {
            let root = Url::parse(&config.auth_url)
                .ok()
                .filter(|url| url.scheme() == "file")
                .and_then(|url| url.to_file_path().ok())
                .unwrap_or_else(|| PathBuf::from(&config.auth_url));
            return Ok(Arc::new(FsService::new(config.name.clone(), root)));
        }
        Ok(Arc::new(SwiftService::new(config, self.proxy.as_ref())?))
    }

    fn lock_services(&self) -> MutexGuard<'_, ServiceCache> {
        match self.services.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("object store registry mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

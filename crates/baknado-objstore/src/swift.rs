//! OpenStack Swift client speaking TempAuth v1.
//!
//! # Design
//! - Authenticate lazily with `X-Storage-User`/`X-Storage-Pass`, caching the token and
//!   storage URL until the service answers `401`, which drops the cached session.
//! - Uploads stream the file body and send the local MD5 as `ETag`, then compare the
//!   `ETag` echoed back by the service.
//! - Listings use `?format=json` and follow `marker` pagination.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use baknado_config::ServiceConfig;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED};
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::model::{ContainerInfo, ObjectInfo, normalise_etag};
use crate::store::{ObjectStore, ServiceClient, file_md5, validate_key};

const AUTH_TOKEN: &str = "x-auth-token";
const STORAGE_URL: &str = "x-storage-url";
const STORAGE_USER: &str = "x-storage-user";
const STORAGE_PASS: &str = "x-storage-pass";
const LISTING_LIMIT: usize = 10_000;

/// Swift account configured from a catalogue entry.
#[derive(Clone)]
pub struct SwiftService {
    inner: Arc<SwiftInner>,
}

struct SwiftInner {
    name: String,
    auth_url: Url,
    username: String,
    key: String,
    client: Client,
    session: Mutex<Option<SwiftSession>>,
}

#[derive(Debug, Clone)]
struct SwiftSession {
    token: String,
    storage_url: Url,
}

impl SwiftService {
    /// Build a client for `config`, routing traffic through `proxy` when given.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidInput`] when the auth URL is malformed or
    /// [`StoreError::Http`] when the HTTP client cannot be constructed.
    pub fn new(config: &ServiceConfig, proxy: Option<&Url>) -> StoreResult<Self> {
        let auth_url = Url::parse(&config.auth_url).map_err(|_| StoreError::InvalidInput {
            field: "auth_url",
            reason: "must be a valid URL",
            value: Some(config.auth_url.clone()),
        })?;
        let mut builder =
            Client::builder().user_agent(concat!("baknado/", env!("CARGO_PKG_VERSION")));
        builder = match proxy {
            Some(proxy) => {
                info!(service = %config.name, proxy = %proxy, "using proxy");
                builder.proxy(
                    reqwest::Proxy::all(proxy.as_str())
                        .map_err(|source| StoreError::http("client.proxy", proxy, source))?,
                )
            }
            None => builder.no_proxy(),
        };
        let client = builder
            .build()
            .map_err(|source| StoreError::http("client.build", &auth_url, source))?;
        Ok(Self {
            inner: Arc::new(SwiftInner {
                name: config.name.clone(),
                auth_url,
                username: config.username(),
                key: config.auth_key.clone(),
                client,
                session: Mutex::new(None),
            }),
        })
    }
}

impl SwiftInner {
    async fn session(&self) -> StoreResult<SwiftSession> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        drop(guard);
        Ok(session)
    }

    async fn authenticate(&self) -> StoreResult<SwiftSession> {
        let response = self
            .client
            .get(self.auth_url.clone())
            .header(STORAGE_USER, &self.username)
            .header(STORAGE_PASS, &self.key)
            .send()
            .await
            .map_err(|source| StoreError::http("auth", &self.auth_url, source))?;
        if !response.status().is_success() {
            return Err(StoreError::status(
                "auth",
                &self.auth_url,
                response.status().as_u16(),
            ));
        }
        let token = header_value(response.headers(), AUTH_TOKEN).ok_or(
            StoreError::MissingHeader {
                operation: "auth",
                header: AUTH_TOKEN,
            },
        )?;
        let storage_url = header_value(response.headers(), STORAGE_URL)
            .and_then(|raw| Url::parse(&raw).ok())
            .ok_or(StoreError::MissingHeader {
                operation: "auth",
                header: STORAGE_URL,
            })?;
        info!(service = %self.name, storage_url = %storage_url, "authenticated with object store");
        Ok(SwiftSession { token, storage_url })
    }

    async fn expect_status(
        &self,
        response: Response,
        operation: &'static str,
        url: &Url,
        accepted: &[u16],
    ) -> StoreResult<Response> {
        let status = response.status().as_u16();
        if accepted.contains(&status) {
            return Ok(response);
        }
        if status == 401 {
            warn!(service = %self.name, operation, "auth token rejected; dropping session");
            self.session.lock().await.take();
        }
        Err(StoreError::status(operation, url, status))
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> StoreResult<Response> {
        request
            .send()
            .await
            .map_err(|source| StoreError::http(operation, url, source))
    }
}

#[async_trait]
impl ServiceClient for SwiftService {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn container(&self, container: &str) -> Arc<dyn ObjectStore> {
        Arc::new(SwiftContainer {
            inner: Arc::clone(&self.inner),
            container: container.to_string(),
        })
    }

    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>> {
        let session = self.inner.session().await?;
        let mut url = session.storage_url.clone();
        url.query_pairs_mut().append_pair("format", "json");
        let request = self
            .inner
            .client
            .get(url.clone())
            .header(AUTH_TOKEN, &session.token);
        let response = self.inner.send("containers.list", request, &url).await?;
        let response = self
            .inner
            .expect_status(response, "containers.list", &url, &[200, 204])
            .await?;
        if response.status().as_u16() == 204 {
            return Ok(Vec::new());
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| StoreError::http("containers.list", &url, source))?;
        serde_json::from_slice(&body).map_err(|source| StoreError::Json {
            operation: "containers.list",
            source,
        })
    }

    async fn create_container(&self, container: &str) -> StoreResult<()> {
        validate_key(container)?;
        let session = self.inner.session().await?;
        let url = resource_url(&session.storage_url, container, None)?;
        let request = self
            .inner
            .client
            .put(url.clone())
            .header(AUTH_TOKEN, &session.token)
            .header(CONTENT_LENGTH, 0_u64);
        let response = self.inner.send("containers.create", request, &url).await?;
        self.inner
            .expect_status(response, "containers.create", &url, &[201, 202])
            .await?;
        info!(service = %self.inner.name, container, "container created");
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> StoreResult<bool> {
        validate_key(container)?;
        let session = self.inner.session().await?;
        let url = resource_url(&session.storage_url, container, None)?;
        let request = self
            .inner
            .client
            .delete(url.clone())
            .header(AUTH_TOKEN, &session.token);
        let response = self.inner.send("containers.delete", request, &url).await?;
        if response.status().as_u16() == 404 {
            info!(service = %self.inner.name, container, "container does not exist; nothing to do");
            return Ok(false);
        }
        self.inner
            .expect_status(response, "containers.delete", &url, &[200, 204])
            .await?;
        info!(service = %self.inner.name, container, "container deleted");
        Ok(true)
    }
}

/// One container within a Swift account.
pub struct SwiftContainer {
    inner: Arc<SwiftInner>,
    container: String,
}

#[async_trait]
impl ObjectStore for SwiftContainer {
    fn label(&self) -> String {
        format!("{}:{}", self.inner.name, self.container)
    }

    async fn put(&self, local: &Path, key: &str) -> StoreResult<ObjectInfo> {
        validate_key(key)?;
        let local_digest = file_md5(local).await?;
        let file = tokio::fs::File::open(local)
            .await
            .map_err(|source| StoreError::io("object.open", local, source))?;
        let bytes = file
            .metadata()
            .await
            .map_err(|source| StoreError::io("object.stat", local, source))?
            .len();

        let session = self.inner.session().await?;
        let url = resource_url(&session.storage_url, &self.container, Some(key))?;
        debug!(store = %self.label(), key, bytes, digest = %local_digest, "uploading object");
        let request = self
            .inner
            .client
            .put(url.clone())
            .header(AUTH_TOKEN, &session.token)
            .header(ETAG, &local_digest)
            .header(CONTENT_LENGTH, bytes)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
        let response = self.inner.send("object.put", request, &url).await?;
        let response = self.inner.expect_status(response, "object.put", &url, &[201]).await?;

        let remote_digest = header_value(response.headers(), ETAG.as_str())
            .map(|raw| normalise_etag(&raw))
            .ok_or(StoreError::MissingHeader {
                operation: "object.put",
                header: "etag",
            })?;
        if remote_digest != local_digest {
            return Err(StoreError::DigestMismatch {
                key: key.to_string(),
                local: local_digest,
                remote: remote_digest,
            });
        }
        Ok(ObjectInfo {
            name: key.to_string(),
            bytes,
            hash: remote_digest,
            content_type: None,
            last_modified: None,
        })
    }

    async fn get(&self, key: &str, dest: &Path) -> StoreResult<u64> {
        validate_key(key)?;
        let session = self.inner.session().await?;
        let url = resource_url(&session.storage_url, &self.container, Some(key))?;
        let request = self
            .inner
            .client
            .get(url.clone())
            .header(AUTH_TOKEN, &session.token);
        let response = self.inner.send("object.get", request, &url).await?;
        if response.status().as_u16() == 404 {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        let mut response = self.inner.expect_status(response, "object.get", &url, &[200]).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| StoreError::io("object.create", dest, source))?;
        let mut written = 0_u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| StoreError::http("object.get", &url, source))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|source| StoreError::io("object.write", dest, source))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|source| StoreError::io("object.flush", dest, source))?;
        Ok(written)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        let session = self.inner.session().await?;
        let url = resource_url(&session.storage_url, &self.container, Some(key))?;
        let request = self
            .inner
            .client
            .delete(url.clone())
            .header(AUTH_TOKEN, &session.token);
        let response = self.inner.send("object.delete", request, &url).await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        self.inner
            .expect_status(response, "object.delete", &url, &[200, 204])
            .await?;
        Ok(true)
    }

    async fn list(&self) -> StoreResult<Vec<ObjectInfo>> {
        let session = self.inner.session().await?;
        let base = resource_url(&session.storage_url, &self.container, None)?;
        let mut objects: Vec<ObjectInfo> = Vec::new();
        loop {
            let mut url = base.clone();
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("format", "json")
                    .append_pair("limit", &LISTING_LIMIT.to_string());
                if let Some(last) = objects.last() {
                    query.append_pair("marker", &last.name);
                }
            }
            let request = self
                .inner
                .client
                .get(url.clone())
                .header(AUTH_TOKEN, &session.token);
            let response = self.inner.send("object.list", request, &url).await?;
            if response.status().as_u16() == 404 {
                return Err(StoreError::NotFound {
                    key: self.label(),
                });
            }
            let response = self
                .inner
                .expect_status(response, "object.list", &url, &[200, 204])
                .await?;
            if response.status().as_u16() == 204 {
                break;
            }
            let body = response
                .bytes()
                .await
                .map_err(|source| StoreError::http("object.list", &url, source))?;
            let page: Vec<ObjectInfo> =
                serde_json::from_slice(&body).map_err(|source| StoreError::Json {
                    operation: "object.list",
                    source,
                })?;
            let exhausted = page.len() < LISTING_LIMIT;
            objects.extend(page);
            if exhausted {
                break;
            }
        }
        Ok(objects)
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectInfo>> {
        validate_key(key)?;
        let session = self.inner.session().await?;
        let url = resource_url(&session.storage_url, &self.container, Some(key))?;
        let request = self
            .inner
            .client
            .head(url.clone())
            .header(AUTH_TOKEN, &session.token);
        let response = self.inner.send("object.head", request, &url).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = self
            .inner
            .expect_status(response, "object.head", &url, &[200, 204])
            .await?;
        let headers = response.headers();
        Ok(Some(ObjectInfo {
            name: key.to_string(),
            bytes: header_value(headers, CONTENT_LENGTH.as_str())
                .and_then(|raw| raw.parse().ok())
                .unwrap_or_default(),
            hash: header_value(headers, ETAG.as_str())
                .map(|raw| normalise_etag(&raw))
                .unwrap_or_default(),
            content_type: header_value(headers, CONTENT_TYPE.as_str()),
            last_modified: header_value(headers, LAST_MODIFIED.as_str()),
        }))
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn resource_url(storage_url: &Url, container: &str, key: Option<&str>) -> StoreResult<Url> {
    let mut url = storage_url.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| StoreError::InvalidInput {
                field: "storage_url",
                reason: "must be a hierarchical URL",
                value: Some(storage_url.to_string()),
            })?;
        segments.pop_if_empty().push(container);
        if let Some(key) = key {
            segments.extend(key.split('/'));
        }
    }
    Ok(url)
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use super::*;
    use httpmock::Method::HEAD;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    const TOKEN: &str = "AUTH_tk0123";

    fn temp_dir() -> TestResult<TempDir> {
        Ok(tempfile::Builder::new().prefix("baknado-swift-").tempdir()?)
    }

    fn service_config(server: &MockServer) -> ServiceConfig {
        ServiceConfig {
            name: "primary".to_string(),
            service_type: "object-store".to_string(),
            storage_id: "Storage".to_string(),
            identity_domain: "acme".to_string(),
            user: "ops".to_string(),
            auth_key: "secret".to_string(),
            auth_url: server.url("/auth/v1.0"),
            auth_method: "password".to_string(),
        }
    }

    fn mock_auth(server: &MockServer) -> httpmock::Mock<'_> {
        let storage_url = server.url("/v1/AUTH_acme");
        server.mock(move |when, then| {
            when.method(GET)
                .path("/auth/v1.0")
                .header(STORAGE_USER, "Storage-acme:ops")
                .header(STORAGE_PASS, "secret");
            then.status(200)
                .header(AUTH_TOKEN, TOKEN)
                .header(STORAGE_URL, storage_url.as_str());
        })
    }

    #[test]
    fn resource_url_escapes_segments() -> TestResult<()> {
        let base = Url::parse("https://storage.example.com/v1/AUTH_acme")?;
        let url = resource_url(&base, "prod backups", Some("nightly/db.tgz.part_aa"))?;
        assert_eq!(
            url.as_str(),
            "https://storage.example.com/v1/AUTH_acme/prod%20backups/nightly/db.tgz.part_aa"
        );
        Ok(())
    }

    #[tokio::test]
    async fn put_authenticates_once_and_verifies_etag() -> TestResult<()> {
        let server = MockServer::start_async().await;
        let auth = mock_auth(&server);
        let upload = server.mock(|when, then| {
            when.method(PUT)
                .path("/v1/AUTH_acme/prod/payload.bin")
                .header(AUTH_TOKEN, TOKEN)
                .header("etag", "5eb63bbbe01eeed093cb22bb8f5acdc3")
                .body("hello world");
            then.status(201)
                .header("etag", "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"");
        });

        let temp = temp_dir()?;
        let local = temp.path().join("payload.bin");
        std::fs::write(&local, b"hello world")?;

        let service = SwiftService::new(&service_config(&server), None)?;
        let store = service.container("prod");
        let first = store.put(&local, "payload.bin").await?;
        let second = store.put(&local, "payload.bin").await?;
        assert_eq!(first.hash, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(second.bytes, 11);

        auth.assert_hits(1);
        upload.assert_hits(2);
        Ok(())
    }

    #[tokio::test]
    async fn put_reports_digest_mismatch() -> TestResult<()> {
        let server = MockServer::start_async().await;
        mock_auth(&server);
        server.mock(|when, then| {
            when.method(PUT).path("/v1/AUTH_acme/prod/payload.bin");
            then.status(201)
                .header("etag", "00000000000000000000000000000000");
        });

        let temp = temp_dir()?;
        let local = temp.path().join("payload.bin");
        std::fs::write(&local, b"hello world")?;

        let service = SwiftService::new(&service_config(&server), None)?;
        let result = service.container("prod").put(&local, "payload.bin").await;
        assert!(matches!(result, Err(StoreError::DigestMismatch { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn unauthorised_response_drops_cached_session() -> TestResult<()> {
        let server = MockServer::start_async().await;
        let auth = mock_auth(&server);
        server.mock(|when, then| {
            when.method(DELETE).path("/v1/AUTH_acme/prod/stale");
            then.status(401);
        });

        let service = SwiftService::new(&service_config(&server), None)?;
        let store = service.container("prod");
        assert!(matches!(
            store.delete("stale").await,
            Err(StoreError::Status { status: 401, .. })
        ));
        assert!(store.delete("stale").await.is_err());
        auth.assert_hits(2);
        Ok(())
    }

    #[tokio::test]
    async fn list_decodes_json_listing() -> TestResult<()> {
        let server = MockServer::start_async().await;
        mock_auth(&server);
        let listing = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/AUTH_acme/prod")
                .query_param("format", "json");
            then.status(200).json_body(json!([
                {
                    "name": "db.tgz.part_aa",
                    "bytes": 1024,
                    "hash": "c6ac3880e5a247282e6d515ad2f65efd",
                    "content_type": "application/octet-stream",
                    "last_modified": "2014-07-23T14:15:03.126640"
                },
                {
                    "name": "db.tgz.manifest.json",
                    "bytes": 512,
                    "hash": "443f65adbb5ef7f53a9d1623d5fa5796",
                    "content_type": "application/json",
                    "last_modified": "2014-07-23T14:15:04.000000"
                }
            ]));
        });

        let service = SwiftService::new(&service_config(&server), None)?;
        let objects = service.container("prod").list().await?;
        listing.assert();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].name, "db.tgz.part_aa");
        assert_eq!(objects[1].bytes, 512);
        Ok(())
    }

    #[tokio::test]
    async fn head_and_get_round_out_object_access() -> TestResult<()> {
        let server = MockServer::start_async().await;
        mock_auth(&server);
        server.mock(|when, then| {
            when.method(HEAD).path("/v1/AUTH_acme/prod/db.tgz.part_aa");
            then.status(200)
                .header("etag", "5eb63bbbe01eeed093cb22bb8f5acdc3")
                .header("content-type", "application/octet-stream");
        });
        server.mock(|when, then| {
            when.method(HEAD).path("/v1/AUTH_acme/prod/missing");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/AUTH_acme/prod/db.tgz.part_aa");
            then.status(200).body("hello world");
        });

        let service = SwiftService::new(&service_config(&server), None)?;
        let store = service.container("prod");
        let head = store.head("db.tgz.part_aa").await?;
        assert_eq!(
            head.as_ref().map(|info| info.hash.as_str()),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
        assert!(store.head("missing").await?.is_none());

        let temp = temp_dir()?;
        let dest = temp.path().join("restored");
        assert_eq!(store.get("db.tgz.part_aa", &dest).await?, 11);
        assert_eq!(std::fs::read(&dest)?, b"hello world");
        Ok(())
    }

    #[tokio::test]
    async fn container_management_maps_statuses() -> TestResult<()> {
        let server = MockServer::start_async().await;
        mock_auth(&server);
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1/AUTH_acme")
                .query_param("format", "json");
            then.status(200)
                .json_body(json!([{"name": "prod", "count": 3, "bytes": 2048}]));
        });
        let create = server.mock(|when, then| {
            when.method(PUT).path("/v1/AUTH_acme/archive");
            then.status(201);
        });
        server.mock(|when, then| {
            when.method(DELETE).path("/v1/AUTH_acme/archive");
            then.status(204);
        });
        server.mock(|when, then| {
            when.method(DELETE).path("/v1/AUTH_acme/ghost");
            then.status(404);
        });

        let service = SwiftService::new(&service_config(&server), None)?;
        let containers = service.list_containers().await?;
        assert_eq!(containers[0].name, "prod");
        assert_eq!(containers[0].count, 3);

        service.create_container("archive").await?;
        create.assert();
        assert!(service.delete_container("archive").await?);
        assert!(!service.delete_container("ghost").await?);
        Ok(())
    }

    #[test]
    fn invalid_auth_url_is_rejected() {
        let config = ServiceConfig {
            name: "broken".to_string(),
            service_type: "object-store".to_string(),
            storage_id: "Storage".to_string(),
            identity_domain: "acme".to_string(),
            user: "ops".to_string(),
            auth_key: "secret".to_string(),
            auth_url: "not a url".to_string(),
            auth_method: "password".to_string(),
        };
        assert!(matches!(
            SwiftService::new(&config, None),
            Err(StoreError::InvalidInput {
                field: "auth_url",
                ..
            })
        ));
    }
}

//! Object and container metadata shared by every store implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata describing a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key within its container.
    pub name: String,
    /// Object size in bytes.
    #[serde(default)]
    pub bytes: u64,
    /// MD5 digest (the Swift `ETag`) as lowercase hex.
    #[serde(default)]
    pub hash: String,
    /// Content type recorded by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Last modification timestamp as reported by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>32}  {:>34}  {:>10}  {:>26}  {}",
            self.hash,
            self.content_type.as_deref().unwrap_or("-"),
            self.bytes,
            self.last_modified.as_deref().unwrap_or("-"),
            self.name
        )
    }
}

/// Summary of a container within a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container name.
    pub name: String,
    /// Number of objects held.
    #[serde(default)]
    pub count: u64,
    /// Total bytes held.
    #[serde(default)]
    pub bytes: u64,
}

/// Strip the quoting some proxies add around `ETag` values.
pub(crate) fn normalise_etag(raw: &str) -> String {
    raw.trim().trim_matches('"').to_ascii_lowercase()
}

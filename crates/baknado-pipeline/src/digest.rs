//! Streaming content digests for backup files and parts.
//!
//! # Design
//! - Files are hashed in fixed-size blocks so multi-gigabyte backups never sit in memory.
//! - MD5 is the default because object-store `ETag`s are MD5; SHA-256 is available
//!   for requests that ask for it.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};

const BLOCK_SIZE: usize = 64 * 1024;

/// Digest algorithm used for request and part checksums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// MD5, comparable with object-store `ETag`s.
    #[default]
    Md5,
    /// SHA-256.
    Sha256,
}

impl DigestAlgorithm {
    /// Stable label used in request files and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Whether digests of this kind can be compared with store `ETag`s.
    #[must_use]
    pub const fn matches_etag(self) -> bool {
        matches!(self, Self::Md5)
    }

    /// Digest the file at `path` as lowercase hex.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] when the file cannot be opened or read.
    pub fn digest_file(self, path: &Path) -> PipelineResult<String> {
        match self {
            Self::Md5 => stream_digest::<Md5>(path),
            Self::Sha256 => stream_digest::<Sha256>(path),
        }
    }

    /// Digest an in-memory buffer as lowercase hex.
    #[must_use]
    pub fn digest_bytes(self, bytes: &[u8]) -> String {
        match self {
            Self::Md5 => format!("{:x}", Md5::digest(bytes)),
            Self::Sha256 => format!("{:x}", Sha256::digest(bytes)),
        }
    }
}

/// Digest the file at `path` with MD5.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] when the file cannot be opened or read.
pub fn file_md5(path: &Path) -> PipelineResult<String> {
    DigestAlgorithm::Md5.digest_file(path)
}

fn stream_digest<D: Digest>(path: &Path) -> PipelineResult<String>
where
    sha2::digest::Output<D>: std::fmt::LowerHex,
{
    let file = File::open(path).map_err(|source| PipelineError::io("digest.open", path, source))?;
    let mut reader = BufReader::with_capacity(BLOCK_SIZE, file);
    let mut hasher = D::new();
    let mut block = vec![0_u8; BLOCK_SIZE];
    loop {
        let read = reader
            .read(&mut block)
            .map_err(|source| PipelineError::io("digest.read", path, source))?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

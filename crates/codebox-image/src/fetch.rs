//! Toolchain archive fetchers.
//!
//! A download is a single blocking attempt: no retry, no timeout. Anything
//! other than HTTP 200 is a failure.

use std::collections::BTreeMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::error::ProvisionError;

/// Source of archive bytes for a URL.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ProvisionError>;
}

fn download_error(url: &str, reason: impl Into<String>) -> ProvisionError {
    ProvisionError::Download {
        url: url.to_string(),
        reason: reason.into(),
    }
}

/// HTTPS fetcher backed by `ureq`.
#[cfg(feature = "http")]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

#[cfg(feature = "http")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http")]
impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        use std::io::Read;

        tracing::info!(url = %url, "Downloading");
        let resp = match self.agent.get(url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                return Err(download_error(url, format!("server returned HTTP {}", code)))
            }
            Err(ureq::Error::Transport(t)) => return Err(download_error(url, t.to_string())),
        };
        if resp.status() != 200 {
            return Err(download_error(url, format!("server returned HTTP {}", resp.status())));
        }

        let mut bytes = Vec::new();
        resp.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| download_error(url, format!("failed to read body: {}", e)))?;
        tracing::debug!(url = %url, bytes = bytes.len(), "Download complete");
        Ok(bytes)
    }
}

/// Serves every URL from one local archive file (`build --archive`).
#[derive(Debug, Clone)]
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        tracing::info!(url = %url, path = %self.path.display(), "Using local archive");
        std::fs::read(&self.path)
            .map_err(|e| download_error(url, format!("{}: {}", self.path.display(), e)))
    }
}

/// In-memory URL table. Unknown URLs behave like an unreachable host.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.entries.insert(url.into(), bytes);
        self
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        self.entries
            .get(url)
            .cloned()
            .ok_or_else(|| download_error(url, "could not resolve host"))
    }
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare `bytes` against a pinned digest.
pub fn verify_sha256(url: &str, bytes: &[u8], expected: &str) -> Result<(), ProvisionError> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(download_error(
            url,
            format!("sha256 mismatch: expected {}, got {}", expected, actual),
        ))
    }
}

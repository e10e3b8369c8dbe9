//! Direct-fetch media resources
//!
//! A fetched body is materialized as a temporary file and exposed through a
//! `file://` URI the render surface can load. Revoking the resource deletes
//! the file.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use url::Url;

/// Retrieves the body of a direct-fetch stream address
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch the full resource; failures are [`Error::Transport`]
    async fn fetch(&self, address: &Url) -> Result<Bytes>;
}

/// reqwest-backed [`ResourceFetcher`]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("avatar-webrtc/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, address: &Url) -> Result<Bytes> {
        debug!("GET {}", address);

        let response = self
            .client
            .get(address.clone())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Failed to fetch stream: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "Failed to fetch stream: HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read stream body: {}", e)))?;

        info!("Fetched stream resource ({} bytes)", bytes.len());
        Ok(bytes)
    }
}

/// Locally-addressable copy of a fetched resource
#[derive(Debug)]
pub struct LocalResource {
    /// Where the bytes came from
    source: Url,

    /// `file://` URI of the local copy
    uri: Url,

    /// Backing file; `None` once revoked
    file: Option<NamedTempFile>,

    /// Size in bytes
    len: usize,
}

impl LocalResource {
    /// Write `body` to a temporary file named after `source`'s extension
    pub fn materialize(source: &Url, body: &[u8]) -> Result<Self> {
        let suffix = source
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| format!(".{}", ext))
            .unwrap_or_default();

        let mut file = tempfile::Builder::new()
            .prefix("avatar-stream-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| Error::Transport(format!("Failed to create local resource: {}", e)))?;

        file.write_all(body)
            .and_then(|_| file.flush())
            .map_err(|e| Error::Transport(format!("Failed to write local resource: {}", e)))?;

        let uri = Url::from_file_path(file.path()).map_err(|_| {
            Error::Transport(format!(
                "Local resource path is not absolute: {}",
                file.path().display()
            ))
        })?;

        debug!("Materialized {} as {}", source, uri);

        Ok(Self {
            source: source.clone(),
            uri,
            file: Some(file),
            len: body.len(),
        })
    }

    /// Materialize `body` on the blocking thread pool
    ///
    /// Creating and writing the file may block for large bodies, so it runs
    /// off the async executor.
    pub async fn store(source: Url, body: Bytes) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::materialize(&source, &body))
            .await
            .map_err(|e| Error::Transport(format!("Local resource task failed: {}", e)))?
    }

    /// Remote address the resource was fetched from
    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Local URI handed to the render surface
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Backing file path, if not revoked
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(NamedTempFile::path)
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the resource is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether revoke() has run
    pub fn is_revoked(&self) -> bool {
        self.file.is_none()
    }

    /// Delete the local copy (idempotent)
    pub fn revoke(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.close() {
                warn!("Failed to delete local resource {}: {}", self.uri, e);
            } else {
                debug!("Revoked local resource {}", self.uri);
            }
        }
    }
}

//! Plugin repository protocol client.
//!
//! A repository serves `GET {url}/list` returning a JSON
//! [`RepositoryListing`]; binaries are fetched from the URLs the listing
//! publishes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use strato_types::{RepositoryListing, RepositoryPlugin};

use crate::config::PluginRepository;
use crate::error::{PluginError, PluginResult};

/// Access to plugin repositories and their published binaries.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Fetch a repository's plugin listing.
    async fn list(&self, repository: &PluginRepository) -> PluginResult<Vec<RepositoryPlugin>>;

    /// Download a binary to `destination`, returning the byte count.
    async fn download(&self, url: &str, destination: &Path) -> PluginResult<u64>;
}

/// [`RepositoryClient`] backed by `reqwest`, following redirects.
#[derive(Debug, Clone)]
pub struct HttpRepositoryClient {
    http: reqwest::Client,
}

impl HttpRepositoryClient {
    pub fn new() -> PluginResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("strato-cli/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PluginError::Download { url: String::new(), detail: e.to_string() })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RepositoryClient for HttpRepositoryClient {
    async fn list(&self, repository: &PluginRepository) -> PluginResult<Vec<RepositoryPlugin>> {
        let url = format!("{}/list", repository.url.trim_end_matches('/'));
        debug!(%url, repository = %repository.name, "fetching repository listing");

        let unreachable = |detail: String| PluginError::RepositoryUnreachable {
            name: repository.name.clone(),
            detail,
        };

        let response = self.http.get(&url).send().await.map_err(|e| unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("server returned {status}")));
        }
        let listing: RepositoryListing =
            response.json().await.map_err(|e| unreachable(e.to_string()))?;
        Ok(listing.plugins)
    }

    async fn download(&self, url: &str, destination: &Path) -> PluginResult<u64> {
        let failed = |detail: String| PluginError::Download { url: url.to_string(), detail };

        let response = self.http.get(url).send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("server returned {status}")));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(%url, bytes = written, "download complete");
        Ok(written)
    }
}

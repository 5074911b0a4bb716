//! Public key directory and durable message log over HTTP.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::messaging::{HistoryResponse, LogEntry};

/// Server-side lookups the session depends on
#[async_trait]
pub trait Directory: Send + Sync {
    /// Raw public key bytes registered for `username`
    async fn fetch_public_key(&self, username: &str) -> Result<Vec<u8>>;

    /// Every logged message sent by or to `username`
    async fn fetch_history(&self, username: &str) -> Result<Vec<LogEntry>>;
}

#[derive(Debug, Deserialize)]
struct PublicKeyResponse {
    public_key: String,
}

/// [`Directory`] backed by the chat server's HTTP API
pub struct HttpDirectory {
    client: Client,
    config: ClientConfig,
}

impl HttpDirectory {
    /// Create a directory client for the configured server
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Use an existing HTTP client (shared connection pool, custom TLS)
    pub fn with_client(client: Client, config: ClientConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn fetch_public_key(&self, username: &str) -> Result<Vec<u8>> {
        let url = self.config.public_key_url(username);
        tracing::debug!(peer = username, url = url.as_str(), "Fetching public key");

        let response = self.client.get(&url).send().await?;
        let body: PublicKeyResponse = match response.status() {
            status if status.is_success() => response.json().await?,
            StatusCode::NOT_FOUND => return Err(Error::PeerKeyUnavailable(username.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::DirectoryError(format!(
                    "public key lookup for {} failed: {} - {}",
                    username, status, body
                )));
            }
        };

        BASE64
            .decode(body.public_key.trim())
            .map_err(|e| Error::InvalidKeyMaterial(format!("public key is not base64: {}", e)))
    }

    async fn fetch_history(&self, username: &str) -> Result<Vec<LogEntry>> {
        let url = self.config.history_url(username);
        tracing::debug!(username = username, url = url.as_str(), "Fetching message history");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DirectoryError(format!(
                "history fetch failed: {} - {}",
                status, body
            )));
        }

        let history: HistoryResponse = response.json().await?;
        tracing::debug!(username = username, count = history.messages.len(), "Fetched message history");
        Ok(history.messages)
    }
}

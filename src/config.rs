//! Client configuration.
//!
//! Defaults match the reference server deployment; every field can be
//! overridden from the environment with [`ClientConfig::from_env`].

use std::env;
use std::time::Duration;

use crate::crypto::KeyDerivation;

/// Fixed delay before reconnecting a dropped transport
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Largest attachment accepted for sending (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Longest attachment file name accepted for sending
pub const DEFAULT_MAX_FILE_NAME_LEN: usize = 255;

/// Configuration for a messaging session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP(S) base URL of the chat server (e.g. "https://chat.example.com")
    pub server_url: String,
    /// Delay before each reconnection attempt
    pub reconnect_delay: Duration,
    /// Maximum attachment size in bytes
    pub max_file_size: u64,
    /// Maximum attachment file name length in characters
    pub max_file_name_len: usize,
    /// How the AES key is obtained from the KEM shared secret
    pub key_derivation: KeyDerivation,
    /// Age after which an announced attachment is reported as stalled.
    /// `None` disables stall reporting.
    pub stall_timeout: Option<Duration>,
    /// Re-fetch the selected peer's history after a reconnect
    pub refresh_on_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_file_name_len: DEFAULT_MAX_FILE_NAME_LEN,
            key_derivation: KeyDerivation::Raw,
            stall_timeout: None,
            refresh_on_reconnect: true,
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at `server_url` with default settings.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `KYBERCHAT_SERVER_URL`
    /// - `KYBERCHAT_RECONNECT_DELAY_MS`
    /// - `KYBERCHAT_STALL_TIMEOUT_MS`
    /// - `KYBERCHAT_KDF` (`raw` or `hkdf`)
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let server_url = env::var("KYBERCHAT_SERVER_URL").unwrap_or(defaults.server_url);

        let reconnect_delay = env::var("KYBERCHAT_RECONNECT_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect_delay);

        let stall_timeout = env::var("KYBERCHAT_STALL_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis);

        let key_derivation = env::var("KYBERCHAT_KDF")
            .ok()
            .and_then(|v| KeyDerivation::parse(&v))
            .unwrap_or(defaults.key_derivation);

        Self {
            server_url,
            reconnect_delay,
            stall_timeout,
            key_derivation,
            ..defaults
        }
    }

    fn base(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// WebSocket endpoint for `username`: `ws(s)://host/ws/{username}`.
    pub fn ws_url(&self, username: &str) -> String {
        let base = self.base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws/{}", ws_base, username)
    }

    /// Durable message log endpoint for `username`.
    pub fn history_url(&self, username: &str) -> String {
        format!("{}/messages/{}", self.base(), username)
    }

    /// Public key directory endpoint for `username`.
    pub fn public_key_url(&self, username: &str) -> String {
        format!("{}/get_public_key/{}", self.base(), username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.key_derivation, KeyDerivation::Raw);
        assert!(config.stall_timeout.is_none());
    }

    #[test]
    fn test_endpoint_urls() {
        let config = ClientConfig::new("https://chat.example.com/");
        assert_eq!(config.ws_url("alice"), "wss://chat.example.com/ws/alice");
        assert_eq!(
            config.history_url("alice"),
            "https://chat.example.com/messages/alice"
        );
        assert_eq!(
            config.public_key_url("bob"),
            "https://chat.example.com/get_public_key/bob"
        );

        let plain = ClientConfig::new("http://localhost:8000");
        assert_eq!(plain.ws_url("bob"), "ws://localhost:8000/ws/bob");
    }
}

//! # KyberChat Core
//!
//! Client engine for a post-quantum end-to-end encrypted chat. Every message
//! is sealed to the recipient's Kyber-768 public key; the relay server only
//! ever sees ciphertext.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       KYBERCHAT CORE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │                          Session                                  │ │
//! │  │  SessionContext: one logged-in user, frame dispatch, sending,     │ │
//! │  │  lazy history decryption, SessionObserver callbacks               │ │
//! │  └───────┬──────────────────┬──────────────────┬─────────────────────┘ │
//! │          │                  │                  │                        │
//! │  ┌───────▼──────┐  ┌────────▼────────┐  ┌──────▼────────────────────┐  │
//! │  │   Network    │  │    Messaging    │  │         Storage           │  │
//! │  │              │  │                 │  │                           │  │
//! │  │ - WebSocket  │  │ - Envelopes     │  │ - Secret key persistence  │  │
//! │  │ - Reconnect  │  │ - History merge │  │ - Peer public key cache   │  │
//! │  │ - Directory  │  │ - Deferred files│  │                           │  │
//! │  └──────────────┘  └─────────────────┘  └─────────────┬─────────────┘  │
//! │                                                        │                │
//! │  ┌─────────────────────────────────────────────────────▼─────────────┐ │
//! │  │                           Crypto                                  │ │
//! │  │   Kyber-768 KEM  ──►  shared secret  ──►  AES-256-GCM             │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Server endpoints, reconnect delay, attachment limits
//! - [`crypto`] - KEM, AEAD and key derivation
//! - [`storage`] - Key-value persistence for the identity secret key
//! - [`messaging`] - Wire envelopes, history reconciliation, deferred attachments
//! - [`network`] - WebSocket transport and the HTTP key directory
//! - [`session`] - The per-user session tying it all together
//! - [`time`] - Wire timestamps
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use kyberchat_core::{ClientConfig, SessionContext};
//! use kyberchat_core::network::WebSocketConnector;
//! use kyberchat_core::storage::FileKeyValueStore;
//!
//! let config = ClientConfig::from_env();
//! let store = Arc::new(FileKeyValueStore::open("keys.json")?);
//! let session = SessionContext::with_http_directory(config, "alice", store, observer);
//! session.connect(Arc::new(WebSocketConnector))?;
//!
//! session.select_peer("bob").await?;
//! session.send_message("bob", "hi", None)?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod error;
pub mod messaging;
pub mod network;
pub mod session;
pub mod storage;
/// Wire timestamp helpers.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::ClientConfig;
pub use crypto::{HybridCipher, KemKeyPair, KemPublicKey, KeyDerivation};
pub use error::{Error, Result};
pub use messaging::{DeliveryStatus, HistoryRecord, TransferState};
pub use network::ConnectionState;
pub use session::{OutgoingFile, SessionContext, SessionObserver};

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}

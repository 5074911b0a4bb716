//! # Key Derivation
//!
//! Turns a KEM shared secret into an AES-256-GCM message key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 SHARED SECRET → MESSAGE KEY                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  KeyDerivation::Raw (default)                                          │
//! │  ────────────────────────────                                           │
//! │    message_key = shared_secret                                         │
//! │    Interoperates with every deployed client.                           │
//! │                                                                         │
//! │  KeyDerivation::Hkdf                                                   │
//! │  ───────────────────                                                    │
//! │    HKDF-SHA256(                                                        │
//! │      ikm  = shared_secret,                                            │
//! │      salt = kem_ciphertext,                                           │
//! │      info = "kyberchat-message-key-v1"                                │
//! │    )                                                                   │
//! │    Both peers must run this mode.                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use super::encryption::{EncryptionKey, SharedSecret, KEY_SIZE};
use crate::error::{Error, Result};

/// Domain separation strings for HKDF
pub mod domain {
    /// Domain for message key derivation
    pub const MESSAGE_KEY: &[u8] = b"kyberchat-message-key-v1";
}

/// How the AES key is obtained from a KEM shared secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyDerivation {
    /// Use the 32-byte shared secret directly
    #[default]
    Raw,
    /// HKDF-SHA256 over the shared secret, salted with the KEM ciphertext
    Hkdf,
}

impl KeyDerivation {
    /// Parse a configuration value (`raw` / `hkdf`, case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raw" => Some(Self::Raw),
            "hkdf" => Some(Self::Hkdf),
            _ => None,
        }
    }

    /// Configuration string for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Hkdf => "hkdf",
        }
    }
}

/// Derive the message key for one envelope
pub fn derive_message_key(
    shared_secret: &SharedSecret,
    kem_ciphertext: &[u8],
    mode: KeyDerivation,
) -> Result<EncryptionKey> {
    match mode {
        KeyDerivation::Raw => Ok(EncryptionKey::from_bytes(*shared_secret.as_bytes())),
        KeyDerivation::Hkdf => {
            let hkdf = Hkdf::<Sha256>::new(Some(kem_ciphertext), shared_secret.as_bytes());
            let mut key = [0u8; KEY_SIZE];
            hkdf.expand(domain::MESSAGE_KEY, &mut key)
                .map_err(|_| Error::KeyDerivationFailed("HKDF expansion failed".into()))?;
            Ok(EncryptionKey::from_bytes(key))
        }
    }
}

/// Compute a short fingerprint of a public key (first 8 bytes of SHA-256, hex)
pub fn compute_key_fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..8])
}

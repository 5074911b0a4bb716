//! # Encryption Module
//!
//! AES-256-GCM for message and attachment confidentiality and integrity.
//!
//! ## Encryption Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PAYLOAD ENCRYPTION FLOW                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Step 1: Message key (from KEM encapsulation, see `kem`)               │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  Kyber-768 Encaps(recipient_public_key)                      │       │
//! │  │           ↓                                                  │       │
//! │  │  (kem_ciphertext, shared_secret [32 bytes])                  │       │
//! │  │           ↓                                                  │       │
//! │  │  AES-256 key (raw secret, or HKDF when configured)          │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Step 2: Nonce (generated inside `encrypt`, never passed in)           │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  Random 12 bytes from the OS CSPRNG                          │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Step 3: Encrypt                                                       │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  AES-256-GCM(key, nonce, plaintext)                          │       │
//! │  │           ↓                                                  │       │
//! │  │  Ciphertext + 16-byte Auth Tag                              │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Output: (nonce, ciphertext_with_tag)                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The text body and the attachment of one message share the message key and
//! get independent nonces. No associated data is bound; the wire format used
//! by existing clients has none.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// AES-GCM IV length
pub const NONCE_SIZE: usize = 12;

/// AES-GCM tag length, appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// AES-256 key length, equal to the Kyber shared secret length
pub const KEY_SIZE: usize = 32;

/// The 12-byte AES-GCM IV carried in the `iv` field of an envelope
///
/// Fresh values only come out of [`encrypt`]. Received IVs can be rebuilt
/// for decryption, but there is no way to pick one for encryption, so a
/// message key is never used twice with the same IV.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Rebuild a received nonce
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Rebuild a received nonce from a slice of exactly [`NONCE_SIZE`] bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; NONCE_SIZE] = bytes.try_into().map_err(|_| {
            Error::ParseError(format!(
                "iv must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// A shared secret recovered from KEM encapsulation or decapsulation
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_SIZE]);

impl SharedSecret {
    /// Create from raw KEM output
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Message key for the text body and attachment of one envelope
///
/// Zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Encrypt a payload using AES-256-GCM
///
/// A fresh random nonce is generated for every call.
///
/// ## Returns
///
/// Tuple of (nonce, ciphertext_with_tag)
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<(Nonce, Vec<u8>)> {
    let nonce = Nonce::random();
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce.0), plaintext)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    Ok((nonce, ciphertext))
}

/// Decrypt a payload using AES-256-GCM
///
/// ## Errors
///
/// Returns `AuthenticationFailure` if:
/// - The ciphertext or tag was tampered with
/// - The key is wrong
/// - The nonce is wrong
pub fn decrypt(key: &EncryptionKey, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::Internal(format!("Invalid AES key: {}", e)))?;

    cipher
        .decrypt(AesNonce::from_slice(&nonce.0), ciphertext)
        .map_err(|_| Error::AuthenticationFailure)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn message_key() -> EncryptionKey {
        EncryptionKey::from_bytes([0x5a; KEY_SIZE])
    }

    #[test]
    fn test_text_and_binary_payloads_round_trip() {
        let key = message_key();
        let payloads: [&[u8]; 3] = [b"", "h\u{e9}llo \u{1f510}".as_bytes(), &[0u8, 255, 1, 254]];

        for payload in payloads {
            let (nonce, ciphertext) = encrypt(&key, payload).unwrap();
            assert_eq!(ciphertext.len(), payload.len() + TAG_SIZE);
            assert_eq!(decrypt(&key, &nonce, &ciphertext).unwrap(), payload);
        }
    }

    #[test]
    fn test_one_byte_tampering_is_rejected() {
        let key = message_key();
        let (nonce, ciphertext) = encrypt(&key, b"meet at noon").unwrap();

        for i in [0, ciphertext.len() / 2, ciphertext.len() - 1] {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x01;
            assert!(matches!(
                decrypt(&key, &nonce, &tampered),
                Err(Error::AuthenticationFailure)
            ));
        }

        let mut iv = *nonce.as_bytes();
        iv[0] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &Nonce::from_bytes(iv), &ciphertext),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_truncated_ciphertext_is_rejected() {
        let key = message_key();
        let (nonce, ciphertext) = encrypt(&key, b"x").unwrap();

        assert!(matches!(
            decrypt(&key, &nonce, &ciphertext[..TAG_SIZE - 1]),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_other_message_key_is_rejected() {
        let (nonce, ciphertext) = encrypt(&message_key(), b"for bob").unwrap();
        let other = EncryptionKey::from_bytes([0xa5; KEY_SIZE]);

        assert!(matches!(
            decrypt(&other, &nonce, &ciphertext),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_every_call_draws_a_fresh_nonce() {
        let key = message_key();
        let nonces: std::collections::HashSet<[u8; NONCE_SIZE]> = (0..32)
            .map(|_| *encrypt(&key, b"same body").unwrap().0.as_bytes())
            .collect();
        assert_eq!(nonces.len(), 32);
    }

    #[test]
    fn test_received_iv_must_be_twelve_bytes() {
        let wire_iv = [7u8; NONCE_SIZE];
        assert_eq!(Nonce::from_slice(&wire_iv).unwrap().as_bytes(), &wire_iv);
        assert!(matches!(Nonce::from_slice(&[0u8; 16]), Err(Error::ParseError(_))));
        assert!(matches!(Nonce::from_slice(&[]), Err(Error::ParseError(_))));
    }
}

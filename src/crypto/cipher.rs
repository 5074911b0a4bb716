//! # Hybrid Cipher
//!
//! KEM + AEAD: every message gets a freshly encapsulated key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       HYBRID ENCRYPTION                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Sender                                Recipient                       │
//! │  ──────                                ─────────                       │
//! │                                                                         │
//! │  seal(peer_pk)                                                         │
//! │   ├─ Encaps → (kem_ct, ss)                                             │
//! │   └─ key = derive(ss)                                                  │
//! │                                                                         │
//! │  aead_encrypt(text, key) → (iv, ct)                                   │
//! │  aead_encrypt(file, key) → (file_iv, file_ct)                         │
//! │                                                                         │
//! │        ─── {iv, ct, kem_ct, attachment} ───►                           │
//! │                                                                         │
//! │                                        open(kem_ct, own_sk)            │
//! │                                         ├─ Decaps → ss                 │
//! │                                         └─ key = derive(ss)            │
//! │                                        aead_decrypt(ct, iv, key)       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cipher holds no key state; it only carries the derivation mode.

use super::encryption::{self, EncryptionKey, Nonce, SharedSecret};
use super::kdf::{derive_message_key, KeyDerivation};
use super::kem::{self, KemPublicKey, KemSecretKey};
use crate::error::Result;

/// A freshly encapsulated message key
#[derive(Debug)]
pub struct MessageKey {
    /// KEM ciphertext, sent as `encryptedAESKey`
    pub kem_ciphertext: Vec<u8>,
    /// AES-256-GCM key for the text body and attachment
    pub key: EncryptionKey,
}

/// Stateless KEM + AEAD operations
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridCipher {
    derivation: KeyDerivation,
}

impl HybridCipher {
    /// Create a cipher using `derivation` to turn shared secrets into keys
    pub fn new(derivation: KeyDerivation) -> Self {
        Self { derivation }
    }

    /// The configured derivation mode
    pub fn derivation(&self) -> KeyDerivation {
        self.derivation
    }

    /// KEM encapsulation to a peer's public key
    pub fn encapsulate(&self, peer_public_key: &KemPublicKey) -> Result<(Vec<u8>, SharedSecret)> {
        kem::encapsulate(peer_public_key)
    }

    /// KEM decapsulation with the local secret key
    pub fn decapsulate(&self, kem_ciphertext: &[u8], own_secret_key: &KemSecretKey) -> Result<SharedSecret> {
        kem::decapsulate(kem_ciphertext, own_secret_key)
    }

    /// Encapsulate and derive the message key in one step (sender side)
    pub fn seal(&self, peer_public_key: &KemPublicKey) -> Result<MessageKey> {
        let (kem_ciphertext, shared) = self.encapsulate(peer_public_key)?;
        let key = derive_message_key(&shared, &kem_ciphertext, self.derivation)?;
        Ok(MessageKey { kem_ciphertext, key })
    }

    /// Decapsulate and derive the message key in one step (recipient side)
    pub fn open(&self, kem_ciphertext: &[u8], own_secret_key: &KemSecretKey) -> Result<EncryptionKey> {
        let shared = self.decapsulate(kem_ciphertext, own_secret_key)?;
        derive_message_key(&shared, kem_ciphertext, self.derivation)
    }

    /// AEAD-encrypt binary data under a fresh random nonce
    pub fn aead_encrypt(&self, plaintext: &[u8], key: &EncryptionKey) -> Result<(Nonce, Vec<u8>)> {
        encryption::encrypt(key, plaintext)
    }

    /// AEAD-decrypt binary data; `AuthenticationFailure` on tag mismatch
    pub fn aead_decrypt(&self, ciphertext: &[u8], nonce: &Nonce, key: &EncryptionKey) -> Result<Vec<u8>> {
        encryption::decrypt(key, nonce, ciphertext)
    }

    /// Encrypt a text body as UTF-8
    pub fn encrypt_text(&self, text: &str, key: &EncryptionKey) -> Result<(Nonce, Vec<u8>)> {
        self.aead_encrypt(text.as_bytes(), key)
    }

    /// Decrypt a text body; invalid UTF-8 sequences become U+FFFD
    pub fn decrypt_text(&self, ciphertext: &[u8], nonce: &Nonce, key: &EncryptionKey) -> Result<String> {
        let bytes = self.aead_decrypt(ciphertext, nonce, key)?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kem::KemKeyPair;
    use crate::error::Error;

    #[test]
    fn test_hybrid_round_trip_text() {
        let cipher = HybridCipher::default();
        let bob = KemKeyPair::generate();

        for plaintext in ["", "hi", "héllo wörld 🔐", &"x".repeat(64 * 1024)] {
            let sealed = cipher.seal(&bob.public).unwrap();
            let (nonce, ct) = cipher.encrypt_text(plaintext, &sealed.key).unwrap();

            let key = cipher.open(&sealed.kem_ciphertext, &bob.secret).unwrap();
            let recovered = cipher.decrypt_text(&ct, &nonce, &key).unwrap();
            assert_eq!(recovered, plaintext);
        }
    }

    #[test]
    fn test_hybrid_round_trip_binary_with_hkdf() {
        let cipher = HybridCipher::new(KeyDerivation::Hkdf);
        let bob = KemKeyPair::generate();
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

        let sealed = cipher.seal(&bob.public).unwrap();
        let (nonce, ct) = cipher.aead_encrypt(&payload, &sealed.key).unwrap();

        let key = cipher.open(&sealed.kem_ciphertext, &bob.secret).unwrap();
        assert_eq!(cipher.aead_decrypt(&ct, &nonce, &key).unwrap(), payload);
    }

    #[test]
    fn test_mismatched_derivation_modes_fail_authentication() {
        let bob = KemKeyPair::generate();
        let sender = HybridCipher::new(KeyDerivation::Raw);
        let receiver = HybridCipher::new(KeyDerivation::Hkdf);

        let sealed = sender.seal(&bob.public).unwrap();
        let (nonce, ct) = sender.encrypt_text("hi", &sealed.key).unwrap();

        let key = receiver.open(&sealed.kem_ciphertext, &bob.secret).unwrap();
        assert!(matches!(
            receiver.decrypt_text(&ct, &nonce, &key),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_tampered_kem_ciphertext_never_yields_plaintext() {
        let cipher = HybridCipher::default();
        let bob = KemKeyPair::generate();

        let mut sealed = cipher.seal(&bob.public).unwrap();
        let (nonce, ct) = cipher.encrypt_text("hi", &sealed.key).unwrap();
        sealed.kem_ciphertext[100] ^= 0x01;

        let key = cipher.open(&sealed.kem_ciphertext, &bob.secret).unwrap();
        assert!(matches!(
            cipher.decrypt_text(&ct, &nonce, &key),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_wrong_length_kem_ciphertext_is_reported() {
        let cipher = HybridCipher::default();
        let bob = KemKeyPair::generate();

        let result = cipher.open(&[0u8; 32], &bob.secret);
        assert!(matches!(result, Err(Error::DecapsulationFailure(_))));
    }
}

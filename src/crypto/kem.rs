//! # Key Encapsulation (Kyber-768)
//!
//! Long-term identity keys and per-message key encapsulation.
//!
//! ## Key Sizes
//!
//! | Item | Size | Where it lives |
//! |------|------|----------------|
//! | Public key | 1184 bytes | Key directory, peer key cache |
//! | Secret key | 2400 bytes | Local key-value store only |
//! | Ciphertext | 1088 bytes | `encryptedAESKey` wire field |
//! | Shared secret | 32 bytes | Never stored, recomputed per use |
//!
//! ## Failure Model
//!
//! Kyber decapsulation uses implicit rejection: a ciphertext of the right
//! length always decapsulates, and a corrupted one yields an unrelated shared
//! secret. That surfaces later as an AEAD `AuthenticationFailure`. Anything the
//! primitive refuses to decode (wrong ciphertext or secret key length) is a
//! `DecapsulationFailure`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use zeroize::Zeroizing;

use super::encryption::{SharedSecret, KEY_SIZE};
use super::kdf::compute_key_fingerprint;
use crate::error::{Error, Result};

/// Kyber-768 public key size in bytes
pub const PUBLIC_KEY_SIZE: usize = 1184;

/// Kyber-768 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 2400;

/// Kyber-768 ciphertext size in bytes
pub const CIPHERTEXT_SIZE: usize = 1088;

/// A validated Kyber-768 public key
#[derive(Clone, PartialEq, Eq)]
pub struct KemPublicKey(Vec<u8>);

impl KemPublicKey {
    /// Validate and wrap raw public key bytes
    ///
    /// Rejects anything that is not exactly [`PUBLIC_KEY_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(Error::InvalidKeyMaterial(format!(
                "Invalid public key length: {} (expected {} for Kyber-768)",
                bytes.len(),
                PUBLIC_KEY_SIZE
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Decode a base64 public key as served by the key directory
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidKeyMaterial(format!("public key is not base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Encode as base64 for upload to the key directory
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short fingerprint for logs and UI
    pub fn fingerprint(&self) -> String {
        compute_key_fingerprint(&self.0)
    }
}

impl std::fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KemPublicKey({})", self.fingerprint())
    }
}

/// A Kyber-768 secret key
///
/// Zeroized when dropped. Never leaves the local key-value store.
pub struct KemSecretKey(Zeroizing<Vec<u8>>);

impl KemSecretKey {
    /// Validate and wrap raw secret key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(Error::InvalidKeyMaterial(format!(
                "Invalid secret key length: {} (expected {})",
                bytes.len(),
                SECRET_KEY_SIZE
            )));
        }
        Ok(Self(Zeroizing::new(bytes.to_vec())))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for KemSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KemSecretKey(..)")
    }
}

/// The local user's long-term KEM keypair
#[derive(Debug)]
pub struct KemKeyPair {
    /// Public half, published through the key directory
    pub public: KemPublicKey,
    /// Secret half, persisted locally
    pub secret: KemSecretKey,
}

impl KemKeyPair {
    /// Generate a fresh keypair
    pub fn generate() -> Self {
        let (pk, sk) = kyber768::keypair();
        Self {
            public: KemPublicKey(pk.as_bytes().to_vec()),
            secret: KemSecretKey(Zeroizing::new(sk.as_bytes().to_vec())),
        }
    }
}

/// Encapsulate a fresh shared secret to `public_key`
///
/// Returns `(kem_ciphertext, shared_secret)`.
pub fn encapsulate(public_key: &KemPublicKey) -> Result<(Vec<u8>, SharedSecret)> {
    let pk = kyber768::PublicKey::from_bytes(public_key.as_bytes())
        .map_err(|e| Error::InvalidKeyMaterial(format!("public key rejected: {:?}", e)))?;

    let (ss, ct) = kyber768::encapsulate(&pk);
    let secret = shared_secret_from(ss.as_bytes())?;

    Ok((ct.as_bytes().to_vec(), secret))
}

/// Recover the shared secret from a received KEM ciphertext
pub fn decapsulate(ciphertext: &[u8], secret_key: &KemSecretKey) -> Result<SharedSecret> {
    if ciphertext.len() != CIPHERTEXT_SIZE {
        return Err(Error::DecapsulationFailure(format!(
            "ciphertext is {} bytes (expected {})",
            ciphertext.len(),
            CIPHERTEXT_SIZE
        )));
    }

    let ct = kyber768::Ciphertext::from_bytes(ciphertext)
        .map_err(|e| Error::DecapsulationFailure(format!("ciphertext rejected: {:?}", e)))?;
    let sk = kyber768::SecretKey::from_bytes(secret_key.as_bytes())
        .map_err(|e| Error::DecapsulationFailure(format!("secret key rejected: {:?}", e)))?;

    let ss = kyber768::decapsulate(&ct, &sk);
    shared_secret_from(ss.as_bytes())
}

fn shared_secret_from(bytes: &[u8]) -> Result<SharedSecret> {
    let array: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| Error::Internal(format!("KEM produced a {}-byte secret", bytes.len())))?;
    Ok(SharedSecret::from_bytes(array))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_sizes_match_primitive() {
        assert_eq!(kyber768::public_key_bytes(), PUBLIC_KEY_SIZE);
        assert_eq!(kyber768::secret_key_bytes(), SECRET_KEY_SIZE);
        assert_eq!(kyber768::ciphertext_bytes(), CIPHERTEXT_SIZE);
        assert_eq!(kyber768::shared_secret_bytes(), KEY_SIZE);
    }

    #[test]
    fn test_keypair_generation() {
        let kp = KemKeyPair::generate();
        assert_eq!(kp.public.as_bytes().len(), PUBLIC_KEY_SIZE);
        assert_eq!(kp.secret.as_bytes().len(), SECRET_KEY_SIZE);

        let other = KemKeyPair::generate();
        assert_ne!(kp.public, other.public);
    }

    #[test]
    fn test_shared_secret_agreement() {
        let kp = KemKeyPair::generate();

        let (ciphertext, sender_secret) = encapsulate(&kp.public).unwrap();
        assert_eq!(ciphertext.len(), CIPHERTEXT_SIZE);

        let recipient_secret = decapsulate(&ciphertext, &kp.secret).unwrap();
        assert_eq!(sender_secret, recipient_secret);
    }

    #[test]
    fn test_each_encapsulation_is_fresh() {
        let kp = KemKeyPair::generate();

        let (ct1, ss1) = encapsulate(&kp.public).unwrap();
        let (ct2, ss2) = encapsulate(&kp.public).unwrap();

        assert_ne!(ct1, ct2);
        assert_ne!(ss1, ss2);
    }

    #[test]
    fn test_wrong_secret_key_disagrees() {
        let alice = KemKeyPair::generate();
        let mallory = KemKeyPair::generate();

        let (ciphertext, secret) = encapsulate(&alice.public).unwrap();
        let recovered = decapsulate(&ciphertext, &mallory.secret).unwrap();

        assert_ne!(secret, recovered);
    }

    #[test]
    fn test_truncated_ciphertext_is_decapsulation_failure() {
        let kp = KemKeyPair::generate();
        let (ciphertext, _) = encapsulate(&kp.public).unwrap();

        let result = decapsulate(&ciphertext[..CIPHERTEXT_SIZE - 1], &kp.secret);
        assert!(matches!(result, Err(Error::DecapsulationFailure(_))));
    }

    #[test]
    fn test_public_key_length_validation() {
        assert!(matches!(
            KemPublicKey::from_bytes(&[0u8; 1183]),
            Err(Error::InvalidKeyMaterial(_))
        ));
        assert!(matches!(
            KemPublicKey::from_bytes(&[0u8; 1568]),
            Err(Error::InvalidKeyMaterial(_))
        ));
        assert!(KemPublicKey::from_bytes(&[0u8; PUBLIC_KEY_SIZE]).is_ok());
    }

    #[test]
    fn test_public_key_base64_round_trip() {
        let kp = KemKeyPair::generate();
        let encoded = kp.public.to_base64();
        let decoded = KemPublicKey::from_base64(&encoded).unwrap();
        assert_eq!(decoded, kp.public);

        assert!(KemPublicKey::from_base64("%%%").is_err());
    }

    #[test]
    fn test_secret_key_length_validation() {
        assert!(KemSecretKey::from_bytes(&[1u8; 32]).is_err());
        assert!(KemSecretKey::from_bytes(&[1u8; SECRET_KEY_SIZE]).is_ok());
    }
}

//! Identity secret key persistence and the peer public key cache.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use zeroize::Zeroizing;

use super::secure_store::{keys, user_key, KeyValueStore};
use crate::crypto::{KemKeyPair, KemPublicKey, KemSecretKey};
use crate::error::{Error, Result};

/// Owns the local identity secret key and caches peers' public keys
pub struct KeyMaterialStore {
    store: Arc<dyn KeyValueStore>,
    peer_keys: RwLock<HashMap<String, KemPublicKey>>,
}

impl KeyMaterialStore {
    /// Create a key store on top of a key-value backend
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            peer_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a new identity for `username` and persist its secret key
    ///
    /// Overwrites any secret key already stored for that user. The returned
    /// public key is what gets registered with the key directory.
    pub fn generate_identity(&self, username: &str) -> Result<KemKeyPair> {
        let keypair = KemKeyPair::generate();
        let encoded = Zeroizing::new(BASE64.encode(keypair.secret.as_bytes()));

        self.store
            .set(&user_key(username, keys::KYBER_PRIVATE_KEY), &encoded)?;

        tracing::info!(
            username = username,
            fingerprint = keypair.public.fingerprint().as_str(),
            "Generated identity keypair"
        );
        Ok(keypair)
    }

    /// Load the stored secret key for `username`
    ///
    /// `KeyNotFound` if nothing is stored; `InvalidKeyMaterial` if the stored
    /// value is not a base64 Kyber-768 secret key.
    pub fn own_secret_key(&self, username: &str) -> Result<KemSecretKey> {
        let encoded = self
            .store
            .get(&user_key(username, keys::KYBER_PRIVATE_KEY))?
            .ok_or_else(|| Error::KeyNotFound(username.to_string()))?;

        let bytes = Zeroizing::new(BASE64.decode(encoded.trim()).map_err(|e| {
            Error::InvalidKeyMaterial(format!("stored secret key is not base64: {}", e))
        })?);
        KemSecretKey::from_bytes(&bytes)
    }

    /// Whether a secret key is stored for `username`
    pub fn has_identity(&self, username: &str) -> Result<bool> {
        self.store
            .contains(&user_key(username, keys::KYBER_PRIVATE_KEY))
    }

    /// Validate and cache a peer's public key
    ///
    /// A key of the wrong length is rejected and any previously cached key
    /// for that peer is left untouched.
    pub fn cache_peer_key(&self, username: &str, public_key: &[u8]) -> Result<KemPublicKey> {
        let key = KemPublicKey::from_bytes(public_key).map_err(|e| {
            tracing::warn!(peer = username, len = public_key.len(), "Rejected peer public key");
            e
        })?;

        tracing::debug!(
            peer = username,
            fingerprint = key.fingerprint().as_str(),
            "Cached peer public key"
        );
        self.peer_keys.write().insert(username.to_string(), key.clone());
        Ok(key)
    }

    /// Cached public key for `username`, if any
    pub fn peer_key(&self, username: &str) -> Option<KemPublicKey> {
        self.peer_keys.read().get(username).cloned()
    }

    /// Drop every cached peer key
    pub fn clear_peer_keys(&self) {
        self.peer_keys.write().clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{encapsulate, decapsulate, PUBLIC_KEY_SIZE};
    use crate::storage::MemoryKeyValueStore;

    fn key_store() -> (Arc<MemoryKeyValueStore>, KeyMaterialStore) {
        let backend = Arc::new(MemoryKeyValueStore::new());
        let store = KeyMaterialStore::new(backend.clone());
        (backend, store)
    }

    #[test]
    fn test_generate_and_load_identity() {
        let (backend, store) = key_store();

        assert!(!store.has_identity("alice").unwrap());
        let keypair = store.generate_identity("alice").unwrap();
        assert!(store.has_identity("alice").unwrap());
        assert!(backend.contains("user_alice_kyber_private_key").unwrap());

        let secret = store.own_secret_key("alice").unwrap();
        let (ct, sent) = encapsulate(&keypair.public).unwrap();
        assert_eq!(decapsulate(&ct, &secret).unwrap(), sent);
    }

    #[test]
    fn test_missing_secret_key_is_key_not_found() {
        let (_, store) = key_store();
        assert!(matches!(
            store.own_secret_key("nobody"),
            Err(Error::KeyNotFound(name)) if name == "nobody"
        ));
    }

    #[test]
    fn test_corrupt_stored_secret_is_invalid_key_material() {
        let (backend, store) = key_store();
        backend
            .set("user_alice_kyber_private_key", "c2hvcnQ=")
            .unwrap();
        assert!(matches!(
            store.own_secret_key("alice"),
            Err(Error::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_peer_key_cache_validates_length() {
        let (_, store) = key_store();
        assert!(store.peer_key("bob").is_none());

        let good = KemKeyPair::generate().public;
        store.cache_peer_key("bob", good.as_bytes()).unwrap();
        assert_eq!(store.peer_key("bob"), Some(good.clone()));

        let result = store.cache_peer_key("bob", &[0u8; PUBLIC_KEY_SIZE - 1]);
        assert!(matches!(result, Err(Error::InvalidKeyMaterial(_))));
        assert_eq!(store.peer_key("bob"), Some(good));

        assert!(store.cache_peer_key("carol", &[]).is_err());
        assert!(store.peer_key("carol").is_none());
    }

    #[test]
    fn test_clear_peer_keys_keeps_identity() {
        let (_, store) = key_store();
        store.generate_identity("alice").unwrap();
        store
            .cache_peer_key("bob", KemKeyPair::generate().public.as_bytes())
            .unwrap();

        store.clear_peer_keys();
        assert!(store.peer_key("bob").is_none());
        assert!(store.own_secret_key("alice").is_ok());
    }
}

//! # Cryptography Module
//!
//! Post-quantum hybrid encryption for messages and attachments.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    KEY HIERARCHY                                │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Identity keypair (Kyber-768, generated at registration)       │   │
//! │  │     ├── public key  → key directory                            │   │
//! │  │     └── secret key  → local key-value store                    │   │
//! │  │                                                                 │   │
//! │  │  Per-message key (fresh KEM encapsulation)                     │   │
//! │  │     └── 32-byte shared secret → AES-256 key                    │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 ENCRYPTION SCHEME                               │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  1. Encapsulation: Kyber-768                                   │   │
//! │  │     Encaps(recipient_pk) = (kem_ciphertext, shared_secret)    │   │
//! │  │                                                                 │   │
//! │  │  2. Key Derivation: raw secret, or HKDF-SHA256                 │   │
//! │  │                                                                 │   │
//! │  │  3. Encryption: AES-256-GCM                                    │   │
//! │  │     • 256-bit key                                              │   │
//! │  │     • 96-bit nonce (random per payload)                        │   │
//! │  │     • 128-bit authentication tag                               │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | Kyber-768 | Key encapsulation |
//! | AES-256-GCM | Payload encryption |
//! | HKDF-SHA256 | Optional key derivation |
//! | SHA-256 | Key fingerprints |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: Secret keys, shared secrets and AES keys are zeroized on drop
//! 2. **Secure Random**: Nonces come from `rand::rngs::OsRng`
//! 3. **No Key Reuse**: Every message encapsulates a fresh key; every payload gets a fresh nonce
//! 4. **No Ratchet**: There is no forward secrecy beyond per-message encapsulation

mod cipher;
mod encryption;
mod kdf;
mod kem;

pub use cipher::{HybridCipher, MessageKey};
pub use encryption::{decrypt, encrypt, EncryptionKey, Nonce, SharedSecret, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use kdf::{compute_key_fingerprint, derive_message_key, KeyDerivation};
pub use kem::{
    decapsulate, encapsulate, KemKeyPair, KemPublicKey, KemSecretKey, CIPHERTEXT_SIZE,
    PUBLIC_KEY_SIZE, SECRET_KEY_SIZE,
};

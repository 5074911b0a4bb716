//! # Error Handling
//!
//! Error types for the messaging engine.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Session Errors                                                    │
//! │  │   ├── NoSession             - Not connected yet                     │
//! │  │   └── SessionClosed         - Session was torn down                 │
//! │  │                                                                      │
//! │  ├── Key Errors                                                        │
//! │  │   ├── KeyNotFound           - No secret key for the identity        │
//! │  │   ├── InvalidKeyMaterial    - Wrong key length / encoding           │
//! │  │   └── PeerKeyUnavailable    - Peer key not fetched yet              │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── EncryptionFailed      - AEAD encryption failed                │
//! │  │   ├── DecapsulationFailure  - KEM ciphertext rejected               │
//! │  │   ├── AuthenticationFailure - AEAD tag mismatch                     │
//! │  │   └── KeyDerivationFailed   - HKDF expansion failed                 │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageReadError      - Failed to read key-value store        │
//! │  │   └── StorageWriteError     - Failed to write key-value store       │
//! │  │                                                                      │
//! │  ├── Network Errors                                                    │
//! │  │   ├── TransportUnavailable  - Socket not open                       │
//! │  │   ├── ConnectionFailed      - WebSocket connect/IO failed           │
//! │  │   └── DirectoryError        - Key directory / log fetch failed      │
//! │  │                                                                      │
//! │  └── Message Errors                                                    │
//! │      ├── ParseError            - Malformed frame or envelope           │
//! │      ├── TransferStalled       - Attachment payload never arrived      │
//! │      ├── InvalidAttachment     - Attachment fails validation           │
//! │      └── EmptyMessage          - Nothing to send                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ERROR PROPAGATION                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Per-message failures (is_isolated)                                    │
//! │    ParseError, DecapsulationFailure, AuthenticationFailure,            │
//! │    KeyNotFound, InvalidKeyMaterial                                     │
//! │      → reported through SessionObserver::on_error                      │
//! │      → the message is skipped, the batch and session continue          │
//! │                                                                         │
//! │  TransportUnavailable                                                  │
//! │      → reconnect is requested, never fatal                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the messaging engine
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session Errors (100-199)
    // ========================================================================

    /// No transport has been attached to the session yet
    #[error("No active session. Connect first.")]
    NoSession,

    /// The session has been torn down (logout)
    #[error("Session has been closed.")]
    SessionClosed,

    // ========================================================================
    // Key Errors (200-299)
    // ========================================================================

    /// No secret key stored for the current identity
    #[error("Secret key not found for user: {0}")]
    KeyNotFound(String),

    /// Key bytes have the wrong length or encoding
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Peer public key has not been fetched
    #[error("Public key not available for {0}. Please try again.")]
    PeerKeyUnavailable(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// AEAD encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// KEM decapsulation rejected the ciphertext or secret key
    #[error("Key decapsulation failed: {0}")]
    DecapsulationFailure(String),

    /// AEAD tag mismatch (tampered data or wrong key)
    #[error("Decryption failed: authentication tag mismatch")]
    AuthenticationFailure,

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    // ========================================================================
    // Network Errors (500-599)
    // ========================================================================

    /// The transport is not connected
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// WebSocket connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Public key directory or message log request failed
    #[error("Directory request failed: {0}")]
    DirectoryError(String),

    // ========================================================================
    // Message Errors (700-799)
    // ========================================================================

    /// Malformed frame or envelope
    #[error("Parse error: {0}")]
    ParseError(String),

    /// An announced attachment never received its payload
    #[error("File transfer stalled: {0}")]
    TransferStalled(String),

    /// Attachment metadata fails validation
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),

    /// Neither text nor attachment was supplied
    #[error("Nothing to send.")]
    EmptyMessage,

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Session
    /// - 200-299: Keys
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Network
    /// - 700-799: Messages
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::NoSession => 100,
            Error::SessionClosed => 101,

            Error::KeyNotFound(_) => 200,
            Error::InvalidKeyMaterial(_) => 201,
            Error::PeerKeyUnavailable(_) => 202,

            Error::EncryptionFailed(_) => 300,
            Error::DecapsulationFailure(_) => 301,
            Error::AuthenticationFailure => 302,
            Error::KeyDerivationFailed(_) => 303,

            Error::StorageReadError(_) => 400,
            Error::StorageWriteError(_) => 401,

            Error::TransportUnavailable(_) => 500,
            Error::ConnectionFailed(_) => 501,
            Error::DirectoryError(_) => 502,

            Error::ParseError(_) => 700,
            Error::TransferStalled(_) => 701,
            Error::InvalidAttachment(_) => 702,
            Error::EmptyMessage => 703,

            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors clear up on their own: the transport reconnects,
    /// a stalled transfer is re-announced, a peer key gets fetched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::TransportUnavailable(_)
                | Error::ConnectionFailed(_)
                | Error::DirectoryError(_)
                | Error::TransferStalled(_)
                | Error::PeerKeyUnavailable(_)
        )
    }

    /// Check if this error is confined to a single message
    ///
    /// Isolated errors are reported and the offending message skipped;
    /// processing of the remaining frames or records continues.
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            Error::ParseError(_)
                | Error::DecapsulationFailure(_)
                | Error::AuthenticationFailure
                | Error::KeyNotFound(_)
                | Error::InvalidKeyMaterial(_)
                | Error::InvalidAttachment(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::ParseError(format!("invalid base64: {}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::DirectoryError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::ConnectionFailed(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageReadError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NoSession.code(), 100);
        assert_eq!(Error::SessionClosed.code(), 101);
        assert_eq!(Error::KeyNotFound("alice".into()).code(), 200);
        assert_eq!(Error::AuthenticationFailure.code(), 302);
        assert_eq!(Error::StorageReadError("x".into()).code(), 400);
        assert_eq!(Error::TransportUnavailable("x".into()).code(), 500);
        assert_eq!(Error::ParseError("x".into()).code(), 700);
        assert_eq!(Error::Internal("x".into()).code(), 900);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::TransportUnavailable("closed".into()).is_recoverable());
        assert!(Error::TransferStalled("report.pdf".into()).is_recoverable());
        assert!(!Error::AuthenticationFailure.is_recoverable());
        assert!(!Error::DecapsulationFailure("bad".into()).is_recoverable());
    }

    #[test]
    fn test_isolated_errors() {
        assert!(Error::ParseError("missing iv".into()).is_isolated());
        assert!(Error::AuthenticationFailure.is_isolated());
        assert!(!Error::TransportUnavailable("closed".into()).is_isolated());
        assert!(!Error::SessionClosed.is_isolated());
    }

    #[test]
    fn test_base64_error_becomes_parse_error() {
        use base64::Engine;
        let err: Error = base64::engine::general_purpose::STANDARD
            .decode("not base64!!")
            .unwrap_err()
            .into();
        assert_eq!(err.code(), 700);
    }
}

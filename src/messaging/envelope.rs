//! # Wire Envelopes
//!
//! JSON frames exchanged with the chat server and the codec that turns the
//! base64 wire envelope into typed bytes.
//!
//! ## Frame Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          TRANSPORT FRAMES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Server → Client                                                       │
//! │  ───────────────                                                        │
//! │  connected_clients     {clients: [username]}                           │
//! │  encrypted_message     Envelope                                        │
//! │  file_attachment_data  {sender, messageTimestamp, fileAttachment}      │
//! │  error                 {message}                                       │
//! │  debug_info            {client_id, active_connections}                 │
//! │                                                                         │
//! │  Client → Server                                                       │
//! │  ───────────────                                                        │
//! │  encrypted_message     Envelope                                        │
//! │  debug_info_request    {}                                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Large Attachments
//!
//! The server splits an `encrypted_message` larger than 1 MiB in two: the
//! envelope without `fileAttachment` but with `fileAttachmentFollowing=true`
//! and the file metadata, then a `file_attachment_data` frame carrying the
//! attachment. The pair is correlated by `(sender, timestamp)`.
//!
//! Wire structs are deliberately lenient (every field optional);
//! [`EnvelopeCodec::decode`] enforces what is required.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::crypto::Nonce;
use crate::error::{Error, Result};

// ============================================================================
// FRAMES
// ============================================================================

/// Frames received from the server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Current set of connected usernames
    ConnectedClients {
        #[serde(default)]
        clients: Vec<String>,
    },
    /// A message for this client
    EncryptedMessage(Envelope),
    /// The deferred payload of an announced attachment
    FileAttachmentData(AttachmentData),
    /// Server-side error
    Error {
        #[serde(default)]
        message: String,
    },
    /// Answer to a `debug_info_request`
    DebugInfo(DebugInfo),
    /// Any frame type this client does not handle
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::ParseError(format!("malformed frame: {}", e)))
    }

    /// Frame type name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectedClients { .. } => "connected_clients",
            Self::EncryptedMessage(_) => "encrypted_message",
            Self::FileAttachmentData(_) => "file_attachment_data",
            Self::Error { .. } => "error",
            Self::DebugInfo(_) => "debug_info",
            Self::Unknown => "unknown",
        }
    }
}

/// Frames sent to the server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A message for another user
    EncryptedMessage(Envelope),
    /// Ask the server for connection diagnostics
    DebugInfoRequest,
}

impl OutboundFrame {
    /// Serialize to a text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// WIRE STRUCTS
// ============================================================================

/// One message as it travels on the wire
///
/// Binary fields are standard base64.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
    /// KEM ciphertext
    #[serde(
        rename = "encryptedAESKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypted_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_attachment: Option<AttachmentEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_attachment_following: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// An encrypted attachment on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentEnvelope {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<String>,
}

/// Payload of a `file_attachment_data` frame
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentData {
    #[serde(default)]
    pub sender: String,
    /// Timestamp of the announcing message
    #[serde(default)]
    pub message_timestamp: String,
    pub file_attachment: AttachmentEnvelope,
}

/// Payload of a `debug_info` frame
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DebugInfo {
    pub client_id: Option<String>,
    pub active_connections: Vec<String>,
}

/// One entry of the durable message log
#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Server delivery status (`pending`, `sent`, `delivered`)
    #[serde(default)]
    pub status: Option<String>,
}

/// Response of `GET /messages/{username}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<LogEntry>,
}

// ============================================================================
// DECODED FORM
// ============================================================================

/// Attachment metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
}

/// An attachment with its binary fields decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedAttachment {
    pub meta: FileMeta,
    pub iv: Nonce,
    pub ciphertext: Vec<u8>,
}

/// A message with its binary fields decoded, still encrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub message_id: Option<String>,
    pub sender: String,
    pub recipient: String,
    pub timestamp: String,
    pub iv: Nonce,
    pub ciphertext: Vec<u8>,
    /// KEM ciphertext the message key is recovered from
    pub kem_ciphertext: Vec<u8>,
    /// Inline attachment
    pub attachment: Option<SealedAttachment>,
    /// Set when the attachment arrives in a separate frame
    pub following: Option<FileMeta>,
}

// ============================================================================
// CODEC
// ============================================================================

/// Converts between wire envelopes and [`SealedMessage`]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Encode a message for the wire
    pub fn encode(message: &SealedMessage) -> Envelope {
        let mut envelope = Envelope {
            message_id: message.message_id.clone(),
            sender: Some(message.sender.clone()),
            recipient: Some(message.recipient.clone()),
            timestamp: Some(message.timestamp.clone()),
            iv: Some(BASE64.encode(message.iv.as_bytes())),
            encrypted_content: Some(BASE64.encode(&message.ciphertext)),
            encrypted_key: Some(BASE64.encode(&message.kem_ciphertext)),
            file_attachment: message.attachment.as_ref().map(Self::encode_attachment),
            ..Envelope::default()
        };

        if let Some(meta) = &message.following {
            envelope.file_attachment_following = Some(true);
            envelope.file_name = Some(meta.file_name.clone());
            envelope.file_size = Some(meta.file_size);
            envelope.file_type = Some(meta.file_type.clone());
        }

        envelope
    }

    /// Decode and validate a wire envelope
    ///
    /// `sender`, `recipient`, `timestamp`, `iv` and `encryptedAESKey` are
    /// required. `encryptedContent` is required unless the envelope announces
    /// a following attachment, in which case it may be absent.
    pub fn decode(envelope: &Envelope) -> Result<SealedMessage> {
        let following = if envelope.file_attachment_following.unwrap_or(false) {
            Some(FileMeta {
                file_name: envelope.file_name.clone().unwrap_or_else(|| "unknown".into()),
                file_type: envelope
                    .file_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".into()),
                file_size: envelope.file_size.unwrap_or(0),
            })
        } else {
            None
        };

        let ciphertext = match (&envelope.encrypted_content, &following) {
            (Some(content), _) => decode_binary("encryptedContent", content)?,
            (None, Some(_)) => Vec::new(),
            (None, None) => return Err(missing("encryptedContent")),
        };

        let attachment = match &envelope.file_attachment {
            Some(wire) => Some(Self::decode_attachment(wire)?),
            None => None,
        };

        Ok(SealedMessage {
            message_id: envelope.message_id.clone(),
            sender: required("sender", &envelope.sender)?.to_string(),
            recipient: required("recipient", &envelope.recipient)?.to_string(),
            timestamp: required("timestamp", &envelope.timestamp)?.to_string(),
            iv: decode_nonce("iv", required("iv", &envelope.iv)?)?,
            ciphertext,
            kem_ciphertext: decode_binary(
                "encryptedAESKey",
                required("encryptedAESKey", &envelope.encrypted_key)?,
            )?,
            attachment,
            following,
        })
    }

    /// Encode an attachment for the wire
    pub fn encode_attachment(attachment: &SealedAttachment) -> AttachmentEnvelope {
        AttachmentEnvelope {
            file_name: attachment.meta.file_name.clone(),
            file_type: attachment.meta.file_type.clone(),
            file_size: attachment.meta.file_size,
            iv: Some(BASE64.encode(attachment.iv.as_bytes())),
            encrypted_data: Some(BASE64.encode(&attachment.ciphertext)),
        }
    }

    /// Decode and validate a wire attachment
    pub fn decode_attachment(wire: &AttachmentEnvelope) -> Result<SealedAttachment> {
        Ok(SealedAttachment {
            meta: FileMeta {
                file_name: wire.file_name.clone(),
                file_type: wire.file_type.clone(),
                file_size: wire.file_size,
            },
            iv: decode_nonce("fileAttachment.iv", required("fileAttachment.iv", &wire.iv)?)?,
            ciphertext: decode_binary(
                "fileAttachment.encryptedData",
                required("fileAttachment.encryptedData", &wire.encrypted_data)?,
            )?,
        })
    }
}

fn missing(field: &str) -> Error {
    Error::ParseError(format!("missing field `{}`", field))
}

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str> {
    value.as_deref().ok_or_else(|| missing(field))
}

fn decode_binary(field: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| Error::ParseError(format!("`{}` is not valid base64: {}", field, e)))
}

fn decode_nonce(field: &str, value: &str) -> Result<Nonce> {
    let bytes = decode_binary(field, value)?;
    Nonce::from_slice(&bytes)
}

// ============================================================================
// TESTS
// ============================================================================

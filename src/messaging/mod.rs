//! # Messaging Module
//!
//! Wire envelopes, the per-peer message history and deferred attachments.
//!
//! ## Inbound Message Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      INBOUND MESSAGE FLOW                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Text frame                                                            │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  InboundFrame::parse ──► EnvelopeCodec::decode ──► SealedMessage       │
//! │                                                      │                  │
//! │                        ┌─────────────────────────────┤                  │
//! │                        ▼                             ▼                  │
//! │             fileAttachmentFollowing          regular / inline file      │
//! │                        │                             │                  │
//! │                        ▼                             ▼                  │
//! │       FileTransferAssembler::announce        HybridCipher::open         │
//! │       placeholder record (is_loading)        decrypt text + file        │
//! │                        │                             │                  │
//! │                        └──────────────┬──────────────┘                  │
//! │                                       ▼                                 │
//! │                        HistoryReconciler::merge_live                    │
//! │                                       │                                 │
//! │                                       ▼                                 │
//! │                        SessionObserver::on_history_updated              │
//! │                                                                         │
//! │  file_attachment_data ──► FileTransferAssembler::resolve                │
//! │      → decapsulate the announcing message's key, decrypt the file      │
//! │      → HistoryReconciler::update replaces the placeholder              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Record Identity
//!
//! A record is identified by `(sender, timestamp)` within a peer's history.
//! When both sides carry a `messageId`, that id is used instead.

mod envelope;
mod files;
mod history;

pub use envelope::{
    AttachmentData, AttachmentEnvelope, DebugInfo, Envelope, EnvelopeCodec, FileMeta,
    HistoryResponse, InboundFrame, LogEntry, OutboundFrame, SealedAttachment, SealedMessage,
};
pub use files::{FileTransferAssembler, PendingAttachment, StalledTransfer};
pub use history::{BulkMerge, HistoryReconciler};

use serde::{Deserialize, Serialize};

/// Body shown for an announced attachment whose message has no text
pub fn receiving_placeholder(file_name: &str) -> String {
    format!("Receiving file: {}...", file_name)
}

/// Delivery status of a history record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Not yet delivered to the recipient's socket
    Pending,
    /// Delivered to the recipient's socket
    Delivered,
}

impl DeliveryStatus {
    /// Map a server log status (`pending`, `sent`, `delivered`)
    ///
    /// Anything other than `delivered` is pending.
    pub fn from_server(status: Option<&str>) -> Self {
        match status {
            Some(s) if s.eq_ignore_ascii_case("delivered") => Self::Delivered,
            _ => Self::Pending,
        }
    }

    /// Convert to the wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }
}

/// State of an attachment announced with `fileAttachmentFollowing`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// Placeholder created, payload not yet received
    Announced,
    /// Payload received and decrypted
    Resolved,
    /// Payload received but could not be decrypted; still awaiting
    Failed,
    /// Announced for longer than the configured stall timeout
    Stalled,
    /// Replaced by a newer announcement from the same peer
    Superseded,
}

/// A decrypted (or decryptable) attachment on a history record
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    /// Decrypted file bytes; `None` while loading or if decryption failed
    pub data: Option<Vec<u8>>,
    /// Payload still expected in a separate frame
    pub is_loading: bool,
}

impl Attachment {
    /// Loading placeholder for an announced attachment
    pub fn loading(meta: &FileMeta) -> Self {
        Self {
            file_name: meta.file_name.clone(),
            file_type: meta.file_type.clone(),
            file_size: meta.file_size,
            data: None,
            is_loading: true,
        }
    }

    /// Completed attachment
    pub fn loaded(meta: &FileMeta, data: Vec<u8>) -> Self {
        Self {
            file_name: meta.file_name.clone(),
            file_type: meta.file_type.clone(),
            file_size: meta.file_size,
            data: Some(data),
            is_loading: false,
        }
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("file_type", &self.file_type)
            .field("file_size", &self.file_size)
            .field("data_len", &self.data.as_ref().map(Vec::len))
            .field("is_loading", &self.is_loading)
            .finish()
    }
}

/// Address of one record within a peer's history
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordRef {
    pub sender: String,
    pub timestamp: String,
    pub message_id: Option<String>,
}

impl RecordRef {
    /// Address by `(sender, timestamp)` and an optional message id
    pub fn new(
        sender: impl Into<String>,
        timestamp: impl Into<String>,
        message_id: Option<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            timestamp: timestamp.into(),
            message_id,
        }
    }

    /// Whether `record` is the addressed message
    ///
    /// Sender and timestamp must match. The message ids must also match when
    /// both sides carry one.
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        if self.sender != record.sender || self.timestamp != record.timestamp {
            return false;
        }
        match (&self.message_id, &record.message_id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// One message in a peer's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Explicit message id, when the sender supplied one
    pub message_id: Option<String>,
    pub sender: String,
    pub recipient: String,
    /// ISO-8601 millisecond timestamp, compared as an opaque string
    pub timestamp: String,
    /// Decrypted body; `None` until decrypted
    pub plaintext: Option<String>,
    pub attachment: Option<Attachment>,
    pub delivery_status: DeliveryStatus,
    /// Encrypted form, kept for lazy decryption and redelivery checks
    pub sealed: Option<SealedMessage>,
}

impl HistoryRecord {
    /// Build an undecrypted record from a sealed message
    pub fn from_sealed(sealed: SealedMessage, delivery_status: DeliveryStatus) -> Self {
        Self {
            message_id: sealed.message_id.clone(),
            sender: sealed.sender.clone(),
            recipient: sealed.recipient.clone(),
            timestamp: sealed.timestamp.clone(),
            plaintext: None,
            attachment: sealed.following.as_ref().map(Attachment::loading),
            delivery_status,
            sealed: Some(sealed),
        }
    }

    /// Address of this record
    pub fn record_ref(&self) -> RecordRef {
        RecordRef::new(&self.sender, &self.timestamp, self.message_id.clone())
    }

    /// Whether the body has been decrypted
    pub fn is_decrypted(&self) -> bool {
        self.plaintext.is_some()
    }

    /// Whether this record is a placeholder waiting for its attachment
    pub fn is_loading(&self) -> bool {
        self.attachment.as_ref().is_some_and(|a| a.is_loading)
    }

    /// The other party of the conversation, seen from `me`
    pub fn peer<'a>(&'a self, me: &str) -> &'a str {
        if self.sender == me {
            &self.recipient
        } else {
            &self.sender
        }
    }

    /// Whether `other` is the same message
    ///
    /// Uses the message ids when both records carry one, otherwise
    /// `(sender, timestamp)`.
    pub fn same_message(&self, other: &HistoryRecord) -> bool {
        match (&self.message_id, &other.message_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.sender == other.sender && self.timestamp == other.timestamp,
        }
    }

    fn ciphertext(&self) -> Option<&[u8]> {
        self.sealed.as_ref().map(|s| s.ciphertext.as_slice())
    }

    /// Whether `other` is a redelivery of this record: same `(sender,
    /// timestamp)` and the same ciphertext or plaintext
    pub fn is_redelivery_of(&self, other: &HistoryRecord) -> bool {
        if self.sender != other.sender || self.timestamp != other.timestamp {
            return false;
        }
        let same_ciphertext = matches!(
            (self.ciphertext(), other.ciphertext()),
            (Some(a), Some(b)) if a == b
        );
        let same_plaintext = matches!(
            (&self.plaintext, &other.plaintext),
            (Some(a), Some(b)) if a == b
        );
        same_ciphertext || same_plaintext
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sender: &str, timestamp: &str, text: &str) -> HistoryRecord {
        HistoryRecord {
            message_id: None,
            sender: sender.into(),
            recipient: "bob".into(),
            timestamp: timestamp.into(),
            plaintext: Some(text.into()),
            attachment: None,
            delivery_status: DeliveryStatus::Delivered,
            sealed: None,
        }
    }

    #[test]
    fn test_delivery_status_from_server() {
        assert_eq!(DeliveryStatus::from_server(Some("delivered")), DeliveryStatus::Delivered);
        assert_eq!(DeliveryStatus::from_server(Some("sent")), DeliveryStatus::Pending);
        assert_eq!(DeliveryStatus::from_server(Some("pending")), DeliveryStatus::Pending);
        assert_eq!(DeliveryStatus::from_server(None), DeliveryStatus::Pending);
    }

    #[test]
    fn test_record_ref_respects_message_id() {
        let mut first = record("alice", "2024-05-01T12:00:00.000Z", "one");
        first.message_id = Some("m-1".into());
        let mut second = record("alice", "2024-05-01T12:00:00.000Z", "two");
        second.message_id = Some("m-2".into());
        let legacy = record("alice", "2024-05-01T12:00:00.000Z", "three");

        let by_id = first.record_ref();
        assert!(by_id.matches(&first));
        assert!(!by_id.matches(&second));
        assert!(by_id.matches(&legacy));

        let by_pair = RecordRef::new("alice", "2024-05-01T12:00:00.000Z", None);
        assert!(by_pair.matches(&first));
        assert!(by_pair.matches(&second));
        assert!(!RecordRef::new("carol", "2024-05-01T12:00:00.000Z", None).matches(&first));
    }

    #[test]
    fn test_record_identity() {
        let a = record("alice", "2024-05-01T12:00:00.000Z", "hi");
        let b = record("alice", "2024-05-01T12:00:00.000Z", "different");
        let c = record("alice", "2024-05-01T12:00:00.001Z", "hi");

        assert!(a.same_message(&b));
        assert!(!a.same_message(&c));
        assert!(a.is_redelivery_of(&a.clone()));
        assert!(!a.is_redelivery_of(&b));

        let mut with_id = a.clone();
        with_id.message_id = Some("m-1".into());
        let mut other_id = b.clone();
        other_id.message_id = Some("m-2".into());
        assert!(!with_id.same_message(&other_id));
        assert!(with_id.same_message(&b));
    }

    #[test]
    fn test_record_peer() {
        let r = record("alice", "t", "hi");
        assert_eq!(r.peer("alice"), "bob");
        assert_eq!(r.peer("bob"), "alice");
    }

    #[test]
    fn test_placeholder_text() {
        assert_eq!(receiving_placeholder("report.pdf"), "Receiving file: report.pdf...");
    }
}

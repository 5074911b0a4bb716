//! # Deferred Attachments
//!
//! Tracks attachments announced with `fileAttachmentFollowing=true` until
//! their `file_attachment_data` frame arrives.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  ANNOUNCED ATTACHMENT LIFECYCLE                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   announce(sender, ts)                                                 │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   ┌─────────────┐  resolve(sender, ts)   ┌─────────────┐               │
//! │   │  Announced  │───────────────────────►│  (removed)  │ → decrypt     │
//! │   └─────────────┘                        └─────────────┘               │
//! │      │      ▲                                   │                       │
//! │      │      └──────── restore() ◄── decrypt failed                     │
//! │      │                                                                  │
//! │      │  announce(sender, ts')        ┌─────────────┐                   │
//! │      └──────────────────────────────►│ Superseded  │ (removed)         │
//! │                                      └─────────────┘                   │
//! │                                                                         │
//! │   stalled(now): Announced longer than the timeout, reported once       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries hold the announcing message's KEM ciphertext, never a derived key;
//! the key is recomputed from the local secret key when the payload arrives.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

use super::envelope::FileMeta;
use super::RecordRef;

/// An announced attachment awaiting its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub sender: String,
    /// Timestamp of the announcing message
    pub timestamp: String,
    /// Message id of the announcing message, when it carried one
    pub message_id: Option<String>,
    pub meta: FileMeta,
    /// KEM ciphertext of the announcing message
    pub kem_ciphertext: Vec<u8>,
    /// When the announcement was received (unix millis)
    pub announced_at: i64,
    stall_reported: bool,
}

impl PendingAttachment {
    /// Create a pending entry
    pub fn new(
        sender: impl Into<String>,
        timestamp: impl Into<String>,
        meta: FileMeta,
        kem_ciphertext: Vec<u8>,
        announced_at: i64,
    ) -> Self {
        Self {
            sender: sender.into(),
            timestamp: timestamp.into(),
            message_id: None,
            meta,
            kem_ciphertext,
            announced_at,
            stall_reported: false,
        }
    }

    /// Tag the entry with the announcing message's id
    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    /// History address of the announcing message
    pub fn record_ref(&self) -> RecordRef {
        RecordRef::new(&self.sender, &self.timestamp, self.message_id.clone())
    }
}

/// A pending attachment that exceeded the stall timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledTransfer {
    pub sender: String,
    pub timestamp: String,
    pub file_name: String,
    /// How long it has been waiting
    pub waiting: Duration,
}

/// Pending attachments keyed by `(sender, timestamp)`
///
/// At most one unresolved announcement is kept per sender.
#[derive(Default)]
pub struct FileTransferAssembler {
    pending: RwLock<HashMap<(String, String), PendingAttachment>>,
}

impl FileTransferAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an announced attachment
    ///
    /// Returns the entry it supersedes, if the same sender still had an
    /// unresolved announcement.
    pub fn announce(&self, pending: PendingAttachment) -> Option<PendingAttachment> {
        let mut map = self.pending.write();

        let previous_key = map
            .iter()
            .find(|((sender, timestamp), _)| {
                *sender == pending.sender && *timestamp != pending.timestamp
            })
            .map(|(key, _)| key.clone());
        let superseded = previous_key.and_then(|key| map.remove(&key));

        if let Some(old) = &superseded {
            tracing::debug!(
                peer = old.sender.as_str(),
                timestamp = old.timestamp.as_str(),
                file_name = old.meta.file_name.as_str(),
                "Announced attachment superseded"
            );
        }

        map.insert(
            (pending.sender.clone(), pending.timestamp.clone()),
            pending,
        );
        superseded
    }

    /// Take the pending entry for `(sender, timestamp)`
    ///
    /// The entry is removed; hand it back with [`restore`](Self::restore) if
    /// the payload cannot be decrypted.
    pub fn resolve(&self, sender: &str, timestamp: &str) -> Option<PendingAttachment> {
        self.pending
            .write()
            .remove(&(sender.to_string(), timestamp.to_string()))
    }

    /// Put back an entry whose payload failed to decrypt
    ///
    /// Dropped if a newer announcement from the same sender arrived meanwhile.
    pub fn restore(&self, pending: PendingAttachment) {
        let mut map = self.pending.write();
        if map.keys().any(|(sender, _)| *sender == pending.sender) {
            return;
        }
        map.insert(
            (pending.sender.clone(), pending.timestamp.clone()),
            pending,
        );
    }

    /// Drop the entry for `(sender, timestamp)` without resolving it
    pub fn discard(&self, sender: &str, timestamp: &str) -> Option<PendingAttachment> {
        self.resolve(sender, timestamp)
    }

    /// Whether `(sender, timestamp)` is awaiting its payload
    pub fn is_pending(&self, sender: &str, timestamp: &str) -> bool {
        self.pending
            .read()
            .contains_key(&(sender.to_string(), timestamp.to_string()))
    }

    /// Entries announced more than `timeout` before `now` (unix millis)
    ///
    /// Each entry is returned once; later calls skip it.
    pub fn stalled(&self, now: i64, timeout: Duration) -> Vec<StalledTransfer> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let mut stalled = Vec::new();

        for entry in self.pending.write().values_mut() {
            let waited = now.saturating_sub(entry.announced_at);
            if entry.stall_reported || waited < timeout_ms {
                continue;
            }
            entry.stall_reported = true;
            stalled.push(StalledTransfer {
                sender: entry.sender.clone(),
                timestamp: entry.timestamp.clone(),
                file_name: entry.meta.file_name.clone(),
                waiting: Duration::from_millis(u64::try_from(waited).unwrap_or(0)),
            });
        }

        stalled
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.pending.read().len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.read().is_empty()
    }

    /// Drop every pending entry
    pub fn clear(&self) {
        self.pending.write().clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================

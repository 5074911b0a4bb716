//! Per-peer message history with deduplicating merges.
//!
//! Bulk fetches from the durable log and live frames can interleave in any
//! order. Both merge paths check and insert under one write lock, so a record
//! is never added twice whichever path sees it first.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{DeliveryStatus, HistoryRecord, RecordRef};

/// Outcome of a bulk merge
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BulkMerge {
    /// Records that were not present before
    pub added: usize,
    /// Existing records whose status was raised to delivered
    pub upgraded: usize,
    /// Log records carrying the attachment inline for a message that is
    /// still a loading placeholder here. They are not applied: the caller
    /// decrypts them and hands them to [`HistoryReconciler::replace_placeholder`].
    pub placeholder_candidates: Vec<HistoryRecord>,
}

impl BulkMerge {
    /// Whether the merge changed anything
    pub fn changed(&self) -> bool {
        self.added > 0 || self.upgraded > 0
    }
}

/// Deduplicated message history, one ordered list per peer
///
/// Order is arrival order, not timestamp order.
#[derive(Default)]
pub struct HistoryReconciler {
    histories: RwLock<HashMap<String, Vec<HistoryRecord>>>,
}

impl HistoryReconciler {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge records fetched from the durable log
    ///
    /// Records already present are kept as they are (a decrypted record is
    /// never replaced by its undecrypted log copy), except that a `delivered`
    /// log status is carried over. Log copies of loading placeholders that
    /// carry the attachment inline come back as candidates.
    pub fn merge_bulk(&self, peer: &str, records: Vec<HistoryRecord>) -> BulkMerge {
        let mut outcome = BulkMerge::default();
        let mut histories = self.histories.write();
        let history = histories.entry(peer.to_string()).or_default();

        for record in records {
            let Some(existing) = history.iter_mut().find(|r| r.same_message(&record)) else {
                history.push(record);
                outcome.added += 1;
                continue;
            };

            let carries_attachment = record
                .sealed
                .as_ref()
                .is_some_and(|s| s.attachment.is_some());
            if existing.is_loading() && carries_attachment {
                outcome.placeholder_candidates.push(record);
                continue;
            }

            if existing.delivery_status == DeliveryStatus::Pending
                && record.delivery_status == DeliveryStatus::Delivered
            {
                existing.delivery_status = DeliveryStatus::Delivered;
                outcome.upgraded += 1;
            }
        }

        tracing::debug!(
            peer = peer,
            added = outcome.added,
            upgraded = outcome.upgraded,
            candidates = outcome.placeholder_candidates.len(),
            total = history.len(),
            "Merged bulk history"
        );
        outcome
    }

    /// Merge one live record
    ///
    /// Returns `false` if it is already present, either as the same message
    /// or as a redelivery with matching ciphertext or plaintext.
    pub fn merge_live(&self, peer: &str, record: HistoryRecord) -> bool {
        let mut histories = self.histories.write();
        let history = histories.entry(peer.to_string()).or_default();

        let duplicate = history
            .iter()
            .any(|r| r.same_message(&record) || r.is_redelivery_of(&record));
        if duplicate {
            tracing::debug!(
                peer = peer,
                sender = record.sender.as_str(),
                timestamp = record.timestamp.as_str(),
                "Dropped duplicate live message"
            );
            return false;
        }

        history.push(record);
        true
    }

    /// Swap a loading placeholder for its completed record
    ///
    /// Only applies while the placeholder is still loading; returns whether
    /// it was replaced.
    pub fn replace_placeholder(&self, peer: &str, record: HistoryRecord) -> bool {
        let target = record.record_ref();
        let mut histories = self.histories.write();
        let existing = histories
            .get_mut(peer)
            .and_then(|history| history.iter_mut().find(|r| target.matches(r)));

        match existing {
            Some(existing) if existing.is_loading() => {
                let status = existing.delivery_status.max(record.delivery_status);
                *existing = record;
                existing.delivery_status = status;
                true
            }
            _ => false,
        }
    }

    /// Apply `f` to the record `target` of `peer`
    ///
    /// Returns whether the record was found.
    pub fn update<F>(&self, peer: &str, target: &RecordRef, f: F) -> bool
    where
        F: FnOnce(&mut HistoryRecord),
    {
        let mut histories = self.histories.write();
        let record = histories
            .get_mut(peer)
            .and_then(|history| history.iter_mut().find(|r| target.matches(r)));

        match record {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Copy of one record
    pub fn get(&self, peer: &str, target: &RecordRef) -> Option<HistoryRecord> {
        self.histories
            .read()
            .get(peer)
            .and_then(|history| history.iter().find(|r| target.matches(r)).cloned())
    }

    /// Read-only copy of a peer's history
    pub fn snapshot(&self, peer: &str) -> Vec<HistoryRecord> {
        self.histories.read().get(peer).cloned().unwrap_or_default()
    }

    /// Every record of `peer` not yet decrypted
    pub fn undecrypted(&self, peer: &str) -> Vec<RecordRef> {
        self.histories
            .read()
            .get(peer)
            .map(|history| {
                history
                    .iter()
                    .filter(|r| !r.is_decrypted())
                    .map(HistoryRecord::record_ref)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.histories.write().clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Nonce;
    use crate::messaging::{Attachment, FileMeta, SealedAttachment, SealedMessage};

    const T1: &str = "2024-05-01T12:00:00.000Z";
    const T2: &str = "2024-05-01T12:00:01.000Z";

    fn sealed(sender: &str, timestamp: &str, ciphertext: &[u8]) -> SealedMessage {
        SealedMessage {
            message_id: None,
            sender: sender.into(),
            recipient: "bob".into(),
            timestamp: timestamp.into(),
            iv: Nonce::from_bytes([0u8; 12]),
            ciphertext: ciphertext.to_vec(),
            kem_ciphertext: vec![1u8; 1088],
            attachment: None,
            following: None,
        }
    }

    fn from_log(sender: &str, timestamp: &str, status: DeliveryStatus) -> HistoryRecord {
        HistoryRecord::from_sealed(sealed(sender, timestamp, b"ct"), status)
    }

    fn decrypted(sender: &str, timestamp: &str, text: &str) -> HistoryRecord {
        let mut record = from_log(sender, timestamp, DeliveryStatus::Delivered);
        record.plaintext = Some(text.into());
        record
    }

    #[test]
    fn test_bulk_then_live_yields_one_record() {
        let history = HistoryReconciler::new();

        let outcome = history.merge_bulk("alice", vec![from_log("alice", T1, DeliveryStatus::Delivered)]);
        assert_eq!(outcome.added, 1);
        assert!(!history.merge_live("alice", decrypted("alice", T1, "hi")));

        assert_eq!(history.snapshot("alice").len(), 1);
    }

    #[test]
    fn test_live_then_bulk_keeps_decrypted_record() {
        let history = HistoryReconciler::new();

        assert!(history.merge_live("alice", decrypted("alice", T1, "hi")));
        let outcome = history.merge_bulk(
            "alice",
            vec![
                from_log("alice", T1, DeliveryStatus::Delivered),
                from_log("alice", T2, DeliveryStatus::Delivered),
            ],
        );
        assert_eq!(outcome.added, 1);

        let records = history.snapshot("alice");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].plaintext.as_deref(), Some("hi"));
        assert!(!records[1].is_decrypted());
    }

    #[test]
    fn test_repeated_bulk_merge_is_idempotent() {
        let history = HistoryReconciler::new();
        let batch = || {
            vec![
                from_log("alice", T1, DeliveryStatus::Delivered),
                from_log("bob", T1, DeliveryStatus::Delivered),
                from_log("alice", T1, DeliveryStatus::Delivered),
            ]
        };

        assert_eq!(history.merge_bulk("alice", batch()).added, 2);
        assert!(!history.merge_bulk("alice", batch()).changed());
        assert_eq!(history.snapshot("alice").len(), 2);
    }

    #[test]
    fn test_live_redelivery_is_dropped() {
        let history = HistoryReconciler::new();
        let record = decrypted("alice", T1, "hi");

        assert!(history.merge_live("alice", record.clone()));
        assert!(!history.merge_live("alice", record));

        let mut with_id = decrypted("alice", T1, "hi");
        with_id.message_id = Some("m-1".into());
        assert!(!history.merge_live("alice", with_id));

        assert_eq!(history.snapshot("alice").len(), 1);
    }

    #[test]
    fn test_message_ids_disambiguate_same_timestamp() {
        let history = HistoryReconciler::new();

        let mut first = decrypted("alice", T1, "one");
        first.message_id = Some("m-1".into());
        first.sealed.as_mut().unwrap().ciphertext = b"ct-1".to_vec();
        let mut second = decrypted("alice", T1, "two");
        second.message_id = Some("m-2".into());
        second.sealed.as_mut().unwrap().ciphertext = b"ct-2".to_vec();

        assert!(history.merge_live("alice", first));
        assert!(history.merge_live("alice", second));
        assert_eq!(history.snapshot("alice").len(), 2);
    }

    #[test]
    fn test_bulk_raises_delivery_status() {
        let history = HistoryReconciler::new();
        let mut outgoing = decrypted("bob", T1, "hi");
        outgoing.delivery_status = DeliveryStatus::Pending;
        history.merge_live("alice", outgoing);

        let outcome = history.merge_bulk("alice", vec![from_log("bob", T1, DeliveryStatus::Delivered)]);
        assert_eq!(outcome.upgraded, 1);
        assert_eq!(history.snapshot("alice")[0].delivery_status, DeliveryStatus::Delivered);
        assert_eq!(history.snapshot("alice")[0].plaintext.as_deref(), Some("hi"));
    }

    fn placeholder_and_log_copy() -> (HistoryRecord, HistoryRecord) {
        let meta = FileMeta {
            file_name: "report.pdf".into(),
            file_type: "application/pdf".into(),
            file_size: 3,
        };

        let mut placeholder = decrypted("alice", T1, "Receiving file: report.pdf...");
        placeholder.attachment = Some(Attachment::loading(&meta));

        let mut full = sealed("alice", T1, b"ct");
        full.attachment = Some(SealedAttachment {
            meta,
            iv: Nonce::from_bytes([2u8; 12]),
            ciphertext: vec![9, 9, 9],
        });
        (placeholder, HistoryRecord::from_sealed(full, DeliveryStatus::Delivered))
    }

    #[test]
    fn test_bulk_leaves_loading_placeholder_in_place() {
        let history = HistoryReconciler::new();
        let (placeholder, log_copy) = placeholder_and_log_copy();
        history.merge_live("alice", placeholder.clone());

        let outcome = history.merge_bulk("alice", vec![log_copy.clone()]);

        assert_eq!(outcome.placeholder_candidates, vec![log_copy]);
        assert!(!outcome.changed());
        assert_eq!(history.snapshot("alice"), vec![placeholder]);
    }

    #[test]
    fn test_replace_placeholder_only_while_loading() {
        let history = HistoryReconciler::new();
        let (placeholder, mut completed) = placeholder_and_log_copy();
        history.merge_live("alice", placeholder);

        completed.plaintext = Some(String::new());
        completed.attachment = Some(Attachment::loaded(
            &completed.sealed.as_ref().unwrap().attachment.as_ref().unwrap().meta,
            b"pdf".to_vec(),
        ));
        assert!(history.replace_placeholder("alice", completed.clone()));

        let records = history.snapshot("alice");
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_loading());
        assert_eq!(records[0].attachment.as_ref().unwrap().data.as_deref(), Some(&b"pdf"[..]));

        assert!(!history.replace_placeholder("alice", completed));
        assert!(!history.replace_placeholder("carol", decrypted("alice", T1, "x")));
    }

    #[test]
    fn test_update_and_undecrypted() {
        let history = HistoryReconciler::new();
        history.merge_bulk(
            "alice",
            vec![
                from_log("alice", T1, DeliveryStatus::Delivered),
                from_log("bob", T2, DeliveryStatus::Pending),
            ],
        );
        assert_eq!(history.undecrypted("alice").len(), 2);

        let first = RecordRef::new("alice", T1, None);
        assert!(history.update("alice", &first, |r| r.plaintext = Some("hi".into())));
        assert!(!history.update("alice", &RecordRef::new("carol", T1, None), |_| {}));
        assert!(!history.update("nobody", &first, |_| {}));

        assert_eq!(
            history.undecrypted("alice"),
            vec![RecordRef::new("bob", T2, None)]
        );
        assert_eq!(
            history.get("alice", &first).unwrap().plaintext.as_deref(),
            Some("hi")
        );

        history.clear();
        assert!(history.snapshot("alice").is_empty());
    }

    #[test]
    fn test_update_targets_message_id_on_shared_timestamp() {
        let history = HistoryReconciler::new();

        let mut first = from_log("alice", T1, DeliveryStatus::Delivered);
        first.message_id = Some("m-1".into());
        first.sealed.as_mut().unwrap().ciphertext = b"ct-1".to_vec();
        let mut second = from_log("alice", T1, DeliveryStatus::Delivered);
        second.message_id = Some("m-2".into());
        second.sealed.as_mut().unwrap().ciphertext = b"ct-2".to_vec();
        history.merge_bulk("alice", vec![first, second]);

        let target = RecordRef::new("alice", T1, Some("m-2".into()));
        assert!(history.update("alice", &target, |r| r.plaintext = Some("two".into())));

        let records = history.snapshot("alice");
        assert_eq!(records[0].plaintext, None);
        assert_eq!(records[1].plaintext.as_deref(), Some("two"));
        assert_eq!(
            history.get("alice", &target).unwrap().message_id.as_deref(),
            Some("m-2")
        );
        assert_eq!(
            history.undecrypted("alice"),
            vec![RecordRef::new("alice", T1, Some("m-1".into()))]
        );
    }
}

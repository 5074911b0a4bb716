//! # Session
//!
//! [`SessionContext`] ties the components together for one logged-in user.
//! It is created at login, attached to a transport with
//! [`connect`](SessionContext::connect) and dropped (or
//! [`teardown`](SessionContext::teardown)) at logout. Nothing lives in
//! globals.
//!
//! ## Frame Dispatch
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         FRAME DISPATCH                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  TransportEvent::Frame ──► InboundFrame::parse                         │
//! │                                                                         │
//! │  connected_clients     → online set (own name removed)                 │
//! │  encrypted_message     → decrypt → merge_live, or announce + placeholder│
//! │  file_attachment_data  → resolve pending → decrypt → replace placeholder│
//! │  error                 → SessionObserver::on_error                     │
//! │  debug_info            → debug log                                     │
//! │  anything else         → ignored                                       │
//! │                                                                         │
//! │  A failure is reported and the frame skipped; the next frame is        │
//! │  processed normally.                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Frames are handled one at a time by a single task. Every history and
//! transfer mutation happens under one lock acquisition with no `.await`
//! between check and commit, so a bulk fetch running concurrently on another
//! task cannot duplicate a record.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::crypto::{HybridCipher, KemSecretKey};
use crate::error::{Error, Result};
use crate::messaging::{
    receiving_placeholder, AttachmentData, Attachment, DeliveryStatus, Envelope, EnvelopeCodec,
    FileMeta, FileTransferAssembler, HistoryReconciler, HistoryRecord, InboundFrame,
    OutboundFrame, PendingAttachment, RecordRef, SealedAttachment, SealedMessage,
    StalledTransfer, TransferState,
};
use crate::network::{
    ConnectionState, Connector, Directory, HttpDirectory, TransportEvent, TransportSession,
};
use crate::storage::{KeyMaterialStore, KeyValueStore};
use crate::time::{millis_to_iso8601, now_iso8601, now_timestamp_millis};

// ============================================================================
// OBSERVER
// ============================================================================

/// Receives state changes for presentation
///
/// Callbacks run on the session's frame task; keep them short.
pub trait SessionObserver: Send + Sync {
    /// A peer's history changed; `records` is a full snapshot
    fn on_history_updated(&self, peer: &str, records: &[HistoryRecord]);

    /// Something went wrong that the user should see
    fn on_error(&self, message: &str);

    /// An announced attachment changed state
    fn on_transfer_progress(&self, peer: &str, timestamp: &str, state: TransferState);

    /// The set of online peers changed
    fn on_presence_changed(&self, _online: &[String]) {}

    /// The transport changed state
    fn on_connection_state(&self, _state: ConnectionState) {}
}

/// A file to attach to an outgoing message
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub file_name: String,
    /// MIME type
    pub file_type: String,
    pub data: Vec<u8>,
}

impl OutgoingFile {
    /// Create an attachment
    pub fn new(file_name: impl Into<String>, file_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            file_type: file_type.into(),
            data,
        }
    }
}

impl std::fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("file_name", &self.file_name)
            .field("file_type", &self.file_type)
            .field("len", &self.data.len())
            .finish()
    }
}

// ============================================================================
// SESSION CONTEXT
// ============================================================================

/// All state of one logged-in user
pub struct SessionContext {
    config: ClientConfig,
    username: String,
    keys: KeyMaterialStore,
    cipher: HybridCipher,
    directory: Arc<dyn Directory>,
    history: HistoryReconciler,
    transfers: FileTransferAssembler,
    online: RwLock<BTreeSet<String>>,
    selected_peer: RwLock<Option<String>>,
    transport: RwLock<Option<TransportSession>>,
    observer: Arc<dyn SessionObserver>,
    /// Unix millis of the last outgoing timestamp
    last_sent: Mutex<i64>,
    closed: AtomicBool,
}

impl SessionContext {
    /// Create a session for `username`
    pub fn new(
        config: ClientConfig,
        username: impl Into<String>,
        keys: KeyMaterialStore,
        directory: Arc<dyn Directory>,
        observer: Arc<dyn SessionObserver>,
    ) -> Arc<Self> {
        let cipher = HybridCipher::new(config.key_derivation);
        Arc::new(Self {
            config,
            username: username.into(),
            keys,
            cipher,
            directory,
            history: HistoryReconciler::new(),
            transfers: FileTransferAssembler::new(),
            online: RwLock::new(BTreeSet::new()),
            selected_peer: RwLock::new(None),
            transport: RwLock::new(None),
            observer,
            last_sent: Mutex::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a session that talks to the configured server over HTTP
    pub fn with_http_directory(
        config: ClientConfig,
        username: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        observer: Arc<dyn SessionObserver>,
    ) -> Arc<Self> {
        let directory = Arc::new(HttpDirectory::new(config.clone()));
        Self::new(config, username, KeyMaterialStore::new(store), directory, observer)
    }

    /// The logged-in user
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Local key material
    pub fn keys(&self) -> &KeyMaterialStore {
        &self.keys
    }

    /// Open the transport and start handling frames
    ///
    /// Requires a stored identity. Replaces any previous transport.
    pub fn connect(self: &Arc<Self>, connector: Arc<dyn Connector>) -> Result<()> {
        self.ensure_open()?;
        if !self.keys.has_identity(&self.username)? {
            return Err(Error::KeyNotFound(self.username.clone()));
        }

        let url = self.config.ws_url(&self.username);
        tracing::info!(username = self.username.as_str(), url = url.as_str(), "Connecting session");

        let (transport, events) =
            TransportSession::start(url, self.config.reconnect_delay, connector);
        if let Some(previous) = self.transport.write().replace(transport) {
            previous.shutdown();
        }

        tokio::spawn(run_event_pump(Arc::downgrade(self), events));
        Ok(())
    }

    /// Current transport state; `None` before [`connect`](Self::connect)
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.transport.read().as_ref().map(TransportSession::state)
    }

    /// The client became visible again; reconnects if not connected
    pub fn on_foreground(&self) {
        if let Some(transport) = self.transport.read().as_ref() {
            transport.on_foreground();
        }
    }

    /// Online peers, sorted, excluding the local user
    pub fn online_peers(&self) -> Vec<String> {
        self.online.read().iter().cloned().collect()
    }

    /// Peer whose conversation is open
    pub fn selected_peer(&self) -> Option<String> {
        self.selected_peer.read().clone()
    }

    /// Snapshot of a peer's history
    pub fn history(&self, peer: &str) -> Vec<HistoryRecord> {
        self.history.snapshot(peer)
    }

    /// Open the conversation with `peer`
    ///
    /// Fetches the durable log, fetches the peer's public key if it is not
    /// cached, and decrypts the peer's records that are still encrypted.
    /// Directory and per-record failures are reported through the observer;
    /// the returned snapshot contains whatever could be loaded.
    pub async fn select_peer(&self, peer: &str) -> Result<Vec<HistoryRecord>> {
        self.ensure_open()?;
        *self.selected_peer.write() = Some(peer.to_string());
        self.refresh_peer(peer).await;
        Ok(self.history.snapshot(peer))
    }

    /// Encrypt and send a message
    ///
    /// The message is recorded in the history before it is handed to the
    /// transport. If the transport is down nothing is queued; the record
    /// stays `pending` and a reconnect is requested.
    pub fn send_message(
        &self,
        peer: &str,
        text: &str,
        file: Option<OutgoingFile>,
    ) -> Result<HistoryRecord> {
        self.ensure_open()?;
        if text.trim().is_empty() && file.is_none() {
            return Err(Error::EmptyMessage);
        }
        if let Some(file) = &file {
            self.validate_attachment(file)?;
        }
        if self.transport.read().is_none() {
            return Err(Error::NoSession);
        }

        let peer_key = self
            .keys
            .peer_key(peer)
            .ok_or_else(|| Error::PeerKeyUnavailable(peer.to_string()))?;

        let message_key = self.cipher.seal(&peer_key)?;
        let (iv, ciphertext) = self.cipher.encrypt_text(text, &message_key.key)?;

        let (sealed_file, attachment) = match file {
            Some(file) => {
                let meta = FileMeta {
                    file_name: file.file_name,
                    file_type: file.file_type,
                    file_size: file.data.len() as u64,
                };
                let (file_iv, file_ciphertext) =
                    self.cipher.aead_encrypt(&file.data, &message_key.key)?;
                let attachment = Attachment::loaded(&meta, file.data);
                let sealed = SealedAttachment {
                    meta,
                    iv: file_iv,
                    ciphertext: file_ciphertext,
                };
                (Some(sealed), Some(attachment))
            }
            None => (None, None),
        };

        let sealed = SealedMessage {
            message_id: Some(Uuid::new_v4().to_string()),
            sender: self.username.clone(),
            recipient: peer.to_string(),
            timestamp: self.next_timestamp(),
            iv,
            ciphertext,
            kem_ciphertext: message_key.kem_ciphertext,
            attachment: sealed_file,
            following: None,
        };

        let frame = OutboundFrame::EncryptedMessage(EnvelopeCodec::encode(&sealed));
        let sent = match self.transport_send(&frame) {
            Ok(()) => true,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(peer = peer, error = %e, "Message not sent, transport is down");
                false
            }
            Err(e) => return Err(e),
        };

        let delivery_status = if sent && self.online.read().contains(peer) {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Pending
        };

        let mut record = HistoryRecord::from_sealed(sealed, delivery_status);
        record.plaintext = Some(text.to_string());
        record.attachment = attachment;

        tracing::debug!(
            peer = peer,
            timestamp = record.timestamp.as_str(),
            status = delivery_status.as_str(),
            has_file = record.attachment.is_some(),
            "Sent message"
        );

        self.history.merge_live(peer, record.clone());
        self.notify_history(peer);
        Ok(record)
    }

    /// Ask the server for connection diagnostics
    pub fn request_debug_info(&self) -> Result<()> {
        self.ensure_open()?;
        self.transport_send(&OutboundFrame::DebugInfoRequest)
    }

    /// Report announced attachments that have waited longer than the
    /// configured stall timeout
    ///
    /// Does nothing when `stall_timeout` is `None`. Each transfer is reported
    /// once and stays pending.
    pub fn check_stalled_transfers(&self) -> Vec<StalledTransfer> {
        let Some(timeout) = self.config.stall_timeout else {
            return Vec::new();
        };

        let stalled = self.transfers.stalled(now_timestamp_millis(), timeout);
        for transfer in &stalled {
            self.report(&Error::TransferStalled(format!(
                "{} from {} has been waiting {}s",
                transfer.file_name,
                transfer.sender,
                transfer.waiting.as_secs()
            )));
            self.observer.on_transfer_progress(
                &transfer.sender,
                &transfer.timestamp,
                TransferState::Stalled,
            );
        }
        stalled
    }

    /// Log out: stop the transport and forget everything but the stored
    /// secret key
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(transport) = self.transport.write().take() {
            transport.shutdown();
        }
        self.transfers.clear();
        self.history.clear();
        self.keys.clear_peer_keys();
        self.online.write().clear();
        *self.selected_peer.write() = None;

        tracing::info!(username = self.username.as_str(), "Session torn down");
    }

    /// Whether [`teardown`](Self::teardown) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // INBOUND FRAMES
    // ========================================================================

    /// Handle one text frame from the server
    pub fn handle_frame(&self, text: &str) {
        if self.is_closed() {
            return;
        }

        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.report(&e);
                return;
            }
        };
        tracing::trace!(kind = frame.kind(), "Dispatching frame");

        match frame {
            InboundFrame::ConnectedClients { clients } => self.update_presence(clients),
            InboundFrame::EncryptedMessage(envelope) => self.handle_message(&envelope),
            InboundFrame::FileAttachmentData(data) => self.handle_attachment_data(data),
            InboundFrame::Error { message } => {
                tracing::warn!(message = message.as_str(), "Server reported an error");
                self.observer.on_error(&message);
            }
            InboundFrame::DebugInfo(info) => {
                tracing::debug!(
                    client_id = ?info.client_id,
                    active_connections = ?info.active_connections,
                    "Server debug info"
                );
            }
            InboundFrame::Unknown => tracing::debug!("Ignoring frame of unknown type"),
        }
    }

    fn update_presence(&self, clients: Vec<String>) {
        let online: BTreeSet<String> = clients
            .into_iter()
            .filter(|client| *client != self.username)
            .collect();
        let list: Vec<String> = online.iter().cloned().collect();
        *self.online.write() = online;

        tracing::debug!(online = list.len(), "Presence updated");
        self.observer.on_presence_changed(&list);
    }

    fn handle_message(&self, envelope: &Envelope) {
        let sealed = match EnvelopeCodec::decode(envelope) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.report(&e);
                return;
            }
        };
        if sealed.recipient != self.username {
            tracing::debug!(
                recipient = sealed.recipient.as_str(),
                "Ignoring message addressed to another user"
            );
            return;
        }

        let peer = sealed.sender.clone();
        let following = sealed.following.clone();
        let mut record = HistoryRecord::from_sealed(sealed, DeliveryStatus::Delivered);

        let opened = self
            .keys
            .own_secret_key(&self.username)
            .and_then(|secret_key| self.open_record(&mut record, &secret_key));
        if let Err(e) = opened {
            self.report_with("Failed to decrypt message", &e);
            return;
        }

        match following {
            Some(meta) => self.announce_attachment(&peer, record, meta),
            None => {
                if self.history.merge_live(&peer, record) {
                    self.notify_history(&peer);
                }
            }
        }
    }

    fn announce_attachment(&self, peer: &str, record: HistoryRecord, meta: FileMeta) {
        let Some(kem_ciphertext) = record.sealed.as_ref().map(|s| s.kem_ciphertext.clone()) else {
            return;
        };
        let target = record.record_ref();
        let timestamp = target.timestamp.clone();

        if !self.history.merge_live(peer, record) {
            let still_loading = self
                .history
                .get(peer, &target)
                .is_some_and(|r| r.is_loading());
            if !still_loading {
                tracing::debug!(
                    peer = peer,
                    timestamp = timestamp.as_str(),
                    "Attachment already complete, ignoring announcement"
                );
                return;
            }
        }

        tracing::info!(
            peer = peer,
            timestamp = timestamp.as_str(),
            file_name = meta.file_name.as_str(),
            file_size = meta.file_size,
            "Attachment announced"
        );

        let pending = PendingAttachment::new(
            target.sender,
            timestamp.clone(),
            meta,
            kem_ciphertext,
            now_timestamp_millis(),
        )
        .with_message_id(target.message_id);
        if let Some(old) = self.transfers.announce(pending) {
            self.history.update(peer, &old.record_ref(), |r| {
                if let Some(attachment) = r.attachment.as_mut() {
                    attachment.is_loading = false;
                }
            });
            self.observer
                .on_transfer_progress(peer, &old.timestamp, TransferState::Superseded);
        }

        self.observer
            .on_transfer_progress(peer, &timestamp, TransferState::Announced);
        self.notify_history(peer);
    }

    fn handle_attachment_data(&self, data: AttachmentData) {
        let Some(pending) = self
            .transfers
            .resolve(&data.sender, &data.message_timestamp)
        else {
            tracing::warn!(
                peer = data.sender.as_str(),
                timestamp = data.message_timestamp.as_str(),
                "Attachment data without a pending announcement"
            );
            return;
        };

        let peer = pending.sender.clone();
        let timestamp = pending.timestamp.clone();

        let (file, bytes) = match self.decrypt_pending(&pending, &data) {
            Ok(decrypted) => decrypted,
            Err(e) => {
                self.report_with("Failed to decrypt file attachment", &e);
                self.transfers.restore(pending);
                self.observer
                    .on_transfer_progress(&peer, &timestamp, TransferState::Failed);
                return;
            }
        };

        let placeholder = receiving_placeholder(&pending.meta.file_name);
        let found = self.history.update(&peer, &pending.record_ref(), |r| {
            r.attachment = Some(Attachment::loaded(&file.meta, bytes));
            if r.plaintext.as_deref() == Some(placeholder.as_str()) {
                r.plaintext = Some(String::new());
            }
            if let Some(sealed) = r.sealed.as_mut() {
                sealed.attachment = Some(file);
                sealed.following = None;
            }
        });
        if !found {
            tracing::warn!(
                peer = peer.as_str(),
                timestamp = timestamp.as_str(),
                "Resolved attachment has no history record"
            );
        }

        tracing::info!(
            peer = peer.as_str(),
            timestamp = timestamp.as_str(),
            "Attachment resolved"
        );
        self.observer
            .on_transfer_progress(&peer, &timestamp, TransferState::Resolved);
        self.notify_history(&peer);
    }

    fn decrypt_pending(
        &self,
        pending: &PendingAttachment,
        data: &AttachmentData,
    ) -> Result<(SealedAttachment, Vec<u8>)> {
        let file = EnvelopeCodec::decode_attachment(&data.file_attachment)?;
        let secret_key = self.keys.own_secret_key(&self.username)?;
        let key = self.cipher.open(&pending.kem_ciphertext, &secret_key)?;
        let bytes = self.cipher.aead_decrypt(&file.ciphertext, &file.iv, &key)?;
        Ok((file, bytes))
    }

    /// Decrypt a record's body and inline attachment in place
    ///
    /// A body failure is returned. An inline attachment failure is reported
    /// and the body kept.
    fn open_record(&self, record: &mut HistoryRecord, secret_key: &KemSecretKey) -> Result<()> {
        let Some(sealed) = record.sealed.as_ref() else {
            return Err(Error::Internal("record has no encrypted form".into()));
        };

        let key = self.cipher.open(&sealed.kem_ciphertext, secret_key)?;
        let text = if sealed.ciphertext.is_empty() {
            String::new()
        } else {
            self.cipher.decrypt_text(&sealed.ciphertext, &sealed.iv, &key)?
        };
        let text = match &sealed.following {
            Some(meta) if text.is_empty() => receiving_placeholder(&meta.file_name),
            _ => text,
        };

        let attachment = sealed.attachment.as_ref().map(|file| {
            match self.cipher.aead_decrypt(&file.ciphertext, &file.iv, &key) {
                Ok(bytes) => Attachment::loaded(&file.meta, bytes),
                Err(e) => {
                    self.report_with("Failed to decrypt file attachment", &e);
                    Attachment {
                        data: None,
                        is_loading: false,
                        ..Attachment::loading(&file.meta)
                    }
                }
            }
        });

        record.plaintext = Some(text);
        if attachment.is_some() {
            record.attachment = attachment;
        }
        Ok(())
    }

    // ========================================================================
    // HISTORY REFRESH
    // ========================================================================

    async fn refresh_peer(&self, peer: &str) {
        if let Err(e) = self.refresh_history().await {
            self.report(&e);
        }
        if self.keys.peer_key(peer).is_none() {
            if let Err(e) = self.fetch_peer_key(peer).await {
                self.report_with("Failed to fetch public key", &e);
            }
        }
        self.decrypt_history(peer);
        self.notify_history(peer);
    }

    /// Fetch the durable log and merge it into every peer's history
    async fn refresh_history(&self) -> Result<()> {
        let entries = self.directory.fetch_history(&self.username).await?;

        let mut by_peer: HashMap<String, Vec<HistoryRecord>> = HashMap::new();
        for entry in entries {
            let sealed = match EnvelopeCodec::decode(&entry.envelope) {
                Ok(sealed) => sealed,
                Err(e) => {
                    self.report(&e);
                    continue;
                }
            };
            if sealed.sender != self.username && sealed.recipient != self.username {
                continue;
            }

            let status = DeliveryStatus::from_server(entry.status.as_deref());
            let record = HistoryRecord::from_sealed(sealed, status);
            by_peer
                .entry(record.peer(&self.username).to_string())
                .or_default()
                .push(record);
        }

        for (peer, records) in by_peer {
            let outcome = self.history.merge_bulk(&peer, records);
            let mut changed = outcome.changed();
            for candidate in outcome.placeholder_candidates {
                changed |= self.complete_placeholder(&peer, candidate);
            }
            if changed {
                self.notify_history(&peer);
            }
        }
        Ok(())
    }

    /// Resolve a loading placeholder from the log's copy with the attachment
    /// inline
    ///
    /// The placeholder and its pending transfer stay untouched unless the
    /// copy decrypts together with its attachment.
    fn complete_placeholder(&self, peer: &str, mut record: HistoryRecord) -> bool {
        let target = record.record_ref();
        let opened = self
            .keys
            .own_secret_key(&self.username)
            .and_then(|secret_key| self.open_record(&mut record, &secret_key));
        if let Err(e) = opened {
            self.report_with("Failed to decrypt message", &e);
            return false;
        }
        let complete = record
            .attachment
            .as_ref()
            .is_some_and(|a| a.data.is_some());
        if !complete || !self.history.replace_placeholder(peer, record) {
            return false;
        }

        tracing::info!(
            peer = peer,
            timestamp = target.timestamp.as_str(),
            "Attachment resolved from message log"
        );
        if self
            .transfers
            .discard(&target.sender, &target.timestamp)
            .is_some()
        {
            self.observer
                .on_transfer_progress(peer, &target.timestamp, TransferState::Resolved);
        }
        true
    }

    async fn fetch_peer_key(&self, peer: &str) -> Result<()> {
        let bytes = self.directory.fetch_public_key(peer).await?;
        self.keys.cache_peer_key(peer, &bytes)?;
        Ok(())
    }

    /// Decrypt every record of `peer` that is still encrypted
    ///
    /// Outgoing records from earlier sessions are skipped: they are sealed to
    /// the recipient's key and cannot be opened locally.
    fn decrypt_history(&self, peer: &str) {
        let targets: Vec<RecordRef> = self
            .history
            .undecrypted(peer)
            .into_iter()
            .filter(|target| target.sender != self.username)
            .collect();
        if targets.is_empty() {
            return;
        }

        let secret_key = match self.keys.own_secret_key(&self.username) {
            Ok(key) => key,
            Err(e) => {
                self.report(&e);
                return;
            }
        };

        let mut decrypted = 0usize;
        for target in targets {
            let Some(mut record) = self.history.get(peer, &target) else {
                continue;
            };
            if let Err(e) = self.open_record(&mut record, &secret_key) {
                self.report_with("Failed to decrypt message", &e);
                if e.is_isolated() {
                    continue;
                }
                break;
            }

            self.history.update(peer, &target, |r| {
                if !r.is_decrypted() {
                    r.plaintext = record.plaintext;
                    r.attachment = record.attachment;
                }
            });
            decrypted += 1;
        }

        tracing::debug!(peer = peer, decrypted = decrypted, "Decrypted history");
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn transport_send(&self, frame: &OutboundFrame) -> Result<()> {
        match self.transport.read().as_ref() {
            Some(transport) => transport.send(frame),
            None => Err(Error::NoSession),
        }
    }

    fn validate_attachment(&self, file: &OutgoingFile) -> Result<()> {
        let size = file.data.len() as u64;
        if size == 0 {
            return Err(Error::InvalidAttachment(format!("{} is empty", file.file_name)));
        }
        if size > self.config.max_file_size {
            return Err(Error::InvalidAttachment(format!(
                "{} is {} bytes, the limit is {}",
                file.file_name, size, self.config.max_file_size
            )));
        }

        let name_len = file.file_name.chars().count();
        if file.file_name.trim().is_empty() || name_len > self.config.max_file_name_len {
            return Err(Error::InvalidAttachment(format!(
                "file name must be 1 to {} characters",
                self.config.max_file_name_len
            )));
        }
        if file.file_type.trim().is_empty() {
            return Err(Error::InvalidAttachment("file type is missing".into()));
        }
        Ok(())
    }

    /// Timestamp for an outgoing message, strictly increasing per session so
    /// `(sender, timestamp)` stays unique
    fn next_timestamp(&self) -> String {
        let mut last = self.last_sent.lock();
        let millis = now_timestamp_millis().max(*last + 1);
        *last = millis;
        millis_to_iso8601(millis).unwrap_or_else(now_iso8601)
    }

    fn notify_history(&self, peer: &str) {
        let records = self.history.snapshot(peer);
        self.observer.on_history_updated(peer, &records);
    }

    fn report(&self, error: &Error) {
        tracing::warn!(code = error.code(), error = %error, "Session error");
        self.observer.on_error(&error.to_string());
    }

    fn report_with(&self, context: &str, error: &Error) {
        tracing::warn!(code = error.code(), error = %error, "{}", context);
        self.observer.on_error(&format!("{}: {}", context, error));
    }
}

/// Feed transport events into the session until the transport stops
async fn run_event_pump(
    session: Weak<SessionContext>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut was_connected = false;

    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };

        match event {
            TransportEvent::Frame(text) => session.handle_frame(&text),
            TransportEvent::StateChanged(state) => {
                session.observer.on_connection_state(state);
                if state != ConnectionState::Connected {
                    continue;
                }
                if was_connected && session.config.refresh_on_reconnect {
                    if let Some(peer) = session.selected_peer() {
                        tracing::info!(peer = peer.as_str(), "Reconnected, refreshing history");
                        session.refresh_peer(&peer).await;
                    }
                }
                was_connected = true;
            }
        }
    }

    tracing::debug!("Session event pump stopped");
}

// ============================================================================
// TESTS
// ============================================================================

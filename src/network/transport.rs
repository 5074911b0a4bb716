//! # Transport Session
//!
//! Owns the persistent WebSocket connection to the chat server.
//!
//! ## Connection State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     CONNECTION STATE MACHINE                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │        start()                                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │   ┌──────────────┐   connected    ┌──────────────┐                     │
//! │   │  Connecting  │───────────────►│  Connected   │                     │
//! │   └──────────────┘                └──────────────┘                     │
//! │        ▲     │ failed                    │ closed / error               │
//! │        │     ▼                           ▼                              │
//! │        │  ┌────────────────────────────────────┐                       │
//! │        └──│           Disconnected             │                       │
//! │           │  wait reconnect_delay (fixed 3 s)  │                       │
//! │           │  or wake early on send/foreground  │                       │
//! │           └────────────────────────────────────┘                       │
//! │                                                                         │
//! │  No backoff, no attempt cap. Nothing is queued while disconnected:     │
//! │  send() fails with TransportUnavailable and wakes the reconnect.       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound text frames and state changes are delivered in order on the
//! event channel returned by [`TransportSession::start`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::error::{Error, Result};
use crate::messaging::OutboundFrame;

macro_rules! frame_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "verbose-logging")]
        tracing::debug!($($arg)*);
        #[cfg(not(feature = "verbose-logging"))]
        tracing::trace!($($arg)*);
    };
}

// ============================================================================
// TYPES
// ============================================================================

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection attempt in progress
    Connecting,
    /// Socket open
    Connected,
    /// Socket closed; a reconnect is scheduled
    Disconnected,
}

/// Events emitted by the connection loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection state changed
    StateChanged(ConnectionState),
    /// A text frame arrived
    Frame(String),
}

/// One open connection, as a pair of text channels
///
/// Dropping `outgoing` closes the connection. `incoming` ends when the
/// remote side closes or the connection fails.
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens connections to a URL
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection
    async fn connect(&self, url: &str) -> Result<Link>;
}

// ============================================================================
// WEBSOCKET CONNECTOR
// ============================================================================

/// [`Connector`] over `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Link> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Writer: pump outgoing frames until the session drops its sender
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(WsMessage::Text(text.into())).await {
                    tracing::warn!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Reader: forward text frames until close or error
        let url = url.to_string();
        tokio::spawn(async move {
            while let Some(msg_result) = ws_receiver.next().await {
                match msg_result {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!(url = url.as_str(), "Server sent close frame");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(url = url.as_str(), error = %e, "WebSocket error");
                        break;
                    }
                    // tungstenite answers pings itself
                    _ => {}
                }
            }
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

// ============================================================================
// TRANSPORT SESSION
// ============================================================================

struct Shared {
    state: RwLock<ConnectionState>,
    outgoing: RwLock<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState, events: &mpsc::UnboundedSender<TransportEvent>) {
        {
            let mut current = self.state.write();
            if *current == state {
                return;
            }
            *current = state;
        }
        tracing::debug!(state = ?state, "Transport state changed");
        let _ = events.send(TransportEvent::StateChanged(state));
    }
}

/// Handle to the background connection loop
///
/// Dropping the handle stops the loop.
pub struct TransportSession {
    shared: Arc<Shared>,
    wake: mpsc::UnboundedSender<()>,
    shutdown: watch::Sender<bool>,
}

impl TransportSession {
    /// Start connecting to `url` in the background
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        url: impl Into<String>,
        reconnect_delay: Duration,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Disconnected),
            outgoing: RwLock::new(None),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(connection_loop(
            shared.clone(),
            url.into(),
            reconnect_delay,
            connector,
            events_tx,
            wake_rx,
            shutdown_rx,
        ));

        let session = Self {
            shared,
            wake: wake_tx,
            shutdown: shutdown_tx,
        };
        (session, events_rx)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Whether the socket is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Send a frame
    ///
    /// When not connected nothing is sent or queued: a reconnect is requested
    /// and `TransportUnavailable` returned.
    pub fn send(&self, frame: &OutboundFrame) -> Result<()> {
        let json = frame.to_json()?;

        let sender = if self.is_connected() {
            self.shared.outgoing.read().clone()
        } else {
            None
        };

        match sender {
            Some(tx) => {
                frame_log!(bytes = json.len(), "Sending frame");
                tx.send(json).map_err(|_| {
                    self.request_reconnect();
                    Error::TransportUnavailable("connection closed while sending".into())
                })
            }
            None => {
                tracing::debug!(state = ?self.state(), "Send while not connected, requesting reconnect");
                self.request_reconnect();
                Err(Error::TransportUnavailable(format!(
                    "socket is {:?}",
                    self.state()
                )))
            }
        }
    }

    /// Skip the remaining reconnect delay if currently disconnected
    pub fn request_reconnect(&self) {
        if self.state() == ConnectionState::Disconnected {
            let _ = self.wake.send(());
        }
    }

    /// The client became visible again
    pub fn on_foreground(&self) {
        if !self.is_connected() {
            tracing::info!("Foregrounded while not connected, reconnecting");
            self.request_reconnect();
        }
    }

    /// Stop the connection loop and close the socket
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn connection_loop(
    shared: Arc<Shared>,
    url: String,
    reconnect_delay: Duration,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut wake: mpsc::UnboundedReceiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(url = url.as_str(), "Transport loop starting");

    'outer: loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_state(ConnectionState::Connecting, &events);
        let attempt = tokio::select! {
            result = connector.connect(&url) => result,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok(link) => {
                let mut incoming = link.incoming;
                *shared.outgoing.write() = Some(link.outgoing);
                // wake requests made before this connection are stale
                while wake.try_recv().is_ok() {}
                shared.set_state(ConnectionState::Connected, &events);
                tracing::info!(url = url.as_str(), "Connected");

                loop {
                    tokio::select! {
                        frame = incoming.recv() => match frame {
                            Some(text) => {
                                frame_log!(bytes = text.len(), "Received frame");
                                if events.send(TransportEvent::Frame(text)).is_err() {
                                    shared.outgoing.write().take();
                                    break 'outer;
                                }
                            }
                            None => break,
                        },
                        _ = shutdown.changed() => {
                            shared.outgoing.write().take();
                            shared.set_state(ConnectionState::Disconnected, &events);
                            break 'outer;
                        }
                    }
                }

                shared.outgoing.write().take();
                tracing::info!(url = url.as_str(), "Connection closed");
            }
            Err(e) => {
                tracing::warn!(url = url.as_str(), error = %e, "Connection attempt failed");
            }
        }

        shared.set_state(ConnectionState::Disconnected, &events);
        tracing::debug!(
            delay_ms = reconnect_delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = wake.recv() => {
                tracing::debug!("Reconnect requested early");
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!(url = url.as_str(), "Transport loop stopped");
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(3);

    struct FakeServer {
        to_client: mpsc::UnboundedSender<String>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    struct FakeConnector {
        attempts: AtomicUsize,
        fail_first: usize,
        servers: mpsc::UnboundedSender<FakeServer>,
    }

    impl FakeConnector {
        fn new(fail_first: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                attempts: AtomicUsize::new(0),
                fail_first,
                servers: tx,
            });
            (connector, rx)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, _url: &str) -> Result<Link> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(Error::ConnectionFailed("refused".into()));
            }
            let (c2s_tx, c2s_rx) = mpsc::unbounded_channel();
            let (s2c_tx, s2c_rx) = mpsc::unbounded_channel();
            let _ = self.servers.send(FakeServer {
                to_client: s2c_tx,
                from_client: c2s_rx,
            });
            Ok(Link {
                outgoing: c2s_tx,
                incoming: s2c_rx,
            })
        }
    }

    async fn next_state(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> ConnectionState {
        loop {
            match events.recv().await {
                Some(TransportEvent::StateChanged(state)) => return state,
                Some(TransportEvent::Frame(_)) => continue,
                None => panic!("transport loop ended"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_exchange_frames() {
        let (connector, mut servers) = FakeConnector::new(0);
        let (session, mut events) = TransportSession::start("ws://test/ws/alice", DELAY, connector);

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert!(session.is_connected());

        let mut server = servers.recv().await.unwrap();
        server
            .to_client
            .send(r#"{"type":"connected_clients","clients":[]}"#.into())
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Frame(r#"{"type":"connected_clients","clients":[]}"#.into()))
        );

        session.send(&OutboundFrame::DebugInfoRequest).unwrap();
        assert_eq!(
            server.from_client.recv().await.unwrap(),
            r#"{"type":"debug_info_request"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay() {
        let (connector, mut servers) = FakeConnector::new(0);
        let (_session, mut events) =
            TransportSession::start("ws://test/ws/alice", DELAY, connector.clone());

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        drop(servers.recv().await.unwrap());
        assert_eq!(next_state(&mut events).await, ConnectionState::Disconnected);
        let closed_at = Instant::now();

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert!(closed_at.elapsed() >= DELAY);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_retry_without_backoff() {
        let (connector, _servers) = FakeConnector::new(3);
        let (_session, mut events) =
            TransportSession::start("ws://test/ws/alice", DELAY, connector.clone());

        let started = Instant::now();
        for _ in 0..3 {
            assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
            assert_eq!(next_state(&mut events).await, ConnectionState::Disconnected);
        }
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        assert!(started.elapsed() >= DELAY * 3);
        assert!(started.elapsed() < DELAY * 4);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_is_noop_and_wakes_reconnect() {
        let (connector, mut servers) = FakeConnector::new(1);
        let (session, mut events) = TransportSession::start("ws://test/ws/alice", DELAY, connector);

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Disconnected);
        let failed_at = Instant::now();

        let result = session.send(&OutboundFrame::DebugInfoRequest);
        assert!(matches!(result, Err(Error::TransportUnavailable(_))));

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert!(failed_at.elapsed() < DELAY);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        // the frame sent while disconnected was dropped, not queued
        let mut server = servers.recv().await.unwrap();
        assert!(server.from_client.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_wakes_reconnect() {
        let (connector, _servers) = FakeConnector::new(1);
        let (session, mut events) = TransportSession::start("ws://test/ws/alice", DELAY, connector);

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Disconnected);
        let failed_at = Instant::now();

        session.on_foreground();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert!(failed_at.elapsed() < DELAY);

        // foregrounding while connected does nothing
        session.on_foreground();
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let (connector, _servers) = FakeConnector::new(0);
        let (session, mut events) = TransportSession::start("ws://test/ws/alice", DELAY, connector);

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        session.shutdown();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::StateChanged(ConnectionState::Disconnected))
        );
        assert_eq!(events.recv().await, None);
        assert!(matches!(
            session.send(&OutboundFrame::DebugInfoRequest),
            Err(Error::TransportUnavailable(_))
        ));
    }
}

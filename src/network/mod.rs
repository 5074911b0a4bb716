//! # Network Module
//!
//! Connections to the chat server.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SERVER INTERFACES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  WebSocket  ws(s)://host/ws/{username}                                 │
//! │     TransportSession: live frames, presence, fixed-delay reconnect     │
//! │                                                                         │
//! │  HTTP       GET /get_public_key/{username}  → {public_key}             │
//! │             GET /messages/{username}        → {messages: [...]}        │
//! │     Directory: peer key lookup and durable log fetch                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both sides sit behind traits ([`Connector`], [`Directory`]) so the session
//! can be driven by in-memory implementations.

mod directory;
mod transport;

pub use directory::{Directory, HttpDirectory};
pub use transport::{
    ConnectionState, Connector, Link, TransportEvent, TransportSession, WebSocketConnector,
};

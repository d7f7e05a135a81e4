//! # Parlor Client
//!
//! Transport-agnostic Rust client for the Parlor room chat protocol.
//!
//! The crate manages exactly one logical chat session — a user's presence
//! inside a room over one socket connection. [`ParlorClient`] owns the
//! asynchronous handshake, queues the single pending room operation until the
//! connection signals readiness, recovers automatically from connection loss
//! by rejoining the persisted session, and translates inbound protocol events
//! (chat messages, typing presence) into consistent application state.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement [`Transport`] and [`Connector`] for
//!   any backend
//! - **WebSocket built-in** — the default `transport-websocket` feature
//!   provides [`WebSocketTransport`] and [`WebSocketConnector`]
//! - **Event-driven** — receive typed [`ParlorEvent`]s via a channel, or read
//!   current state from the handle
//! - **Session persistence** — a [`SessionStore`] survives restarts and
//!   enables silent rejoin
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use parlor_client::{ParlorClient, ParlorConfig, ParlorEvent, WebSocketConnector};
//! use parlor_client::session_store::FileSessionStore;
//!
//! let connector = WebSocketConnector::new("wss://chat.example/ws");
//! let store = FileSessionStore::new("session.json");
//! let (client, mut events) = ParlorClient::start(connector, store, ParlorConfig::new());
//!
//! client.login("Alice", "", true, None)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ParlorEvent::SessionEstablished { session } => {
//!             println!("joined room {}", session.room_id);
//!         }
//!         ParlorEvent::MessageReceived { message } => {
//!             println!("{}: {}", message.sender_nickname, message.body);
//!         }
//!         ParlorEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod protocol;
pub mod session_store;
pub mod transport;
pub mod transports;
pub mod typing;

// Re-export primary types for ergonomic imports.
pub use client::{ConnectionState, ParlorClient, ParlorConfig};
pub use error::ParlorError;
pub use event::ParlorEvent;
pub use protocol::{ChatMessage, Session, SocketMessage};
pub use session_store::SessionStore;
pub use transport::{Connector, Transport};
pub use typing::TypingDebouncer;

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};

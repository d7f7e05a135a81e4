//! Transport abstraction for the Parlor protocol.
//!
//! Two seams are defined here. [`Transport`] is a bidirectional text message
//! channel carrying one JSON envelope per call — framing (WebSocket frames,
//! length-prefixed TCP, ...) is the implementation's concern. [`Connector`] is
//! the factory that dials a fresh, connected [`Transport`]: the client owns at
//! most one live socket but dials a new one on every login and on every
//! reconnection attempt, so connection setup is part of this crate's surface
//! rather than something done once by the caller.
//!
//! # Implementing a custom transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use parlor_client::error::ParlorError;
//! use parlor_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ParlorError> {
//!         // Send one JSON text message
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ParlorError>> {
//!         // Receive the next JSON text message;
//!         // return None on clean connection close
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ParlorError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector { /* ... */ }
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&self) -> Result<MyTransport, ParlorError> {
//!         // Dial and hand back a connected transport
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ParlorError;

/// A bidirectional text message transport for the Parlor protocol.
///
/// Implementations must be `Send + Sync` because the controller task that
/// owns the transport is spawned onto the runtime and may migrate between
/// worker threads.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the controller
/// polls it inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose a message. Channel-backed implementations
/// are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::TransportSend`] if the message could not be
    /// sent.
    async fn send(&mut self, message: String) -> Result<(), ParlorError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, ParlorError>>;

    /// Close the transport gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// release resources regardless.
    async fn close(&mut self) -> Result<(), ParlorError>;
}

/// Factory for fresh [`Transport`] connections.
///
/// Called once per session attempt: on every `login` and on every scheduled
/// reconnection. Implementations hold whatever endpoint configuration they
/// need (a URL, a host/port pair) and must be safe to call repeatedly.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport type this connector produces.
    type Transport: Transport;

    /// Dial the server and return a connected transport.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::ConnectionInit`] (or a transport-specific
    /// error) when the connection cannot be established.
    async fn connect(&self) -> Result<Self::Transport, ParlorError>;
}

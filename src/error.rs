//! Error types for the Parlor client.

use thiserror::Error;

/// Errors that can occur when using the Parlor client.
#[derive(Debug, Error)]
pub enum ParlorError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to establish a new socket connection.
    #[error("connection init error: {0}")]
    ConnectionInit(String),

    /// The server rejected a room create/join request.
    #[error("room operation failed: {0}")]
    RoomOperation(String),

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires a running controller, but it has shut down.
    #[error("not connected to server")]
    NotConnected,

    /// `login` was called with an empty nickname.
    #[error("nickname must not be empty")]
    EmptyNickname,

    /// `login` was called to join a room without a room id.
    #[error("room id must not be empty when joining")]
    EmptyRoomId,

    /// Failed to read or write the persisted session.
    #[error("session store error: {0}")]
    SessionStore(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Parlor client operations.
pub type Result<T> = std::result::Result<T, ParlorError>;

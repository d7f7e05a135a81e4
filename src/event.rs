//! Events published by the client to the presentation layer.

use crate::protocol::{ChatMessage, Session};

/// State changes emitted on the event channel returned from
/// [`ParlorClient::start`](crate::ParlorClient::start).
///
/// Under backpressure all events except [`Disconnected`](Self::Disconnected)
/// may be dropped (with a warning logged); the current state is always
/// recoverable through the accessors on the client handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ParlorEvent {
    /// The socket signalled readiness. Any pending room operation has just
    /// been issued.
    Connected,
    /// A room create/join completed and a new session is live.
    SessionEstablished {
        /// The freshly published session.
        session: Session,
    },
    /// A chat message arrived and was appended to the history.
    MessageReceived {
        /// The appended message.
        message: ChatMessage,
    },
    /// The set of users currently typing was replaced.
    TypingPresenceChanged {
        /// The new set, in server order.
        users_typing: Vec<String>,
    },
    /// A room create/join was rejected by the server. The socket stays
    /// connected; no retry is scheduled.
    RoomOperationFailed {
        /// User-visible failure description.
        message: String,
    },
    /// The socket closed unexpectedly.
    ConnectionLost {
        /// Transport-level reason, when one is known.
        reason: Option<String>,
        /// Whether a rejoin has been scheduled. `false` when the close
        /// happened before any session was established.
        will_retry: bool,
    },
    /// `logout` completed: session, history and persisted state are cleared.
    LoggedOut,
    /// The controller shut down. Always the last event on the channel and
    /// never dropped.
    Disconnected {
        /// Shutdown reason, when one is known.
        reason: Option<String>,
    },
}

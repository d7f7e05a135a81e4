#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Parlor client integration tests.
//!
//! Provides a scriptable [`MockConnector`] that hands out channel-driven
//! [`MockTransport`]s, plus helpers for building server response JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use parlor_client::protocol::{
    ChatMessage, MessageType, ServerErrorPayload, SessionResultPayload, SocketMessage,
    UsersTypingPayload,
};
use parlor_client::{Connector, ParlorError, Transport};

type Inbound = Option<Result<String, ParlorError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-driven mock transport.
///
/// The test side holds a [`SocketHandle`] to feed inbound messages (or a
/// close) and to inspect everything the client sent.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Inbound>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ParlorError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ParlorError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            // Test side dropped the handle — keep the socket open forever.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ParlorError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Test-side handle to a [`MockTransport`].
#[derive(Clone)]
pub struct SocketHandle {
    incoming: mpsc::UnboundedSender<Inbound>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl SocketHandle {
    /// Deliver a raw inbound JSON message.
    pub fn push_json(&self, json: String) {
        self.incoming.send(Some(Ok(json))).unwrap();
    }

    /// Deliver a transport receive error.
    pub fn push_error(&self, message: &str) {
        self.incoming
            .send(Some(Err(ParlorError::TransportReceive(message.into()))))
            .unwrap();
    }

    /// Signal a clean connection close.
    pub fn push_close(&self) {
        self.incoming.send(None).unwrap();
    }

    /// Everything the client sent, as raw JSON strings.
    pub fn sent_raw(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Everything the client sent, parsed back into envelopes.
    pub fn sent_messages(&self) -> Vec<SocketMessage> {
        self.sent_raw()
            .iter()
            .map(|raw| SocketMessage::from_json(raw).expect("client sent invalid JSON"))
            .collect()
    }

    /// Whether `close()` was called on the transport.
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Wait until the client has sent at least `count` messages.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<SocketMessage> {
        for _ in 0..500 {
            if self.sent.lock().unwrap().len() >= count {
                return self.sent_messages();
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!(
            "timed out waiting for {count} sent messages, got {:?}",
            self.sent_raw()
        );
    }
}

// ── MockConnector ───────────────────────────────────────────────────

enum ConnectOutcome {
    Transport(MockTransport),
    Failure(String),
    /// A dial attempt that never completes (until aborted).
    Hang,
}

/// A [`Connector`] replaying scripted dial outcomes in order.
///
/// Each expected connection is scripted up front; dialling with nothing
/// scripted parks forever, which keeps the controller in its connecting
/// state instead of failing tests with a confusing panic.
#[derive(Clone)]
pub struct MockConnector {
    outcomes: Arc<StdMutex<VecDeque<ConnectOutcome>>>,
    connects: Arc<StdMutex<usize>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(StdMutex::new(VecDeque::new())),
            connects: Arc::new(StdMutex::new(0)),
        }
    }

    /// Script a successful dial and return the test-side socket handle.
    pub fn expect_connection(&self) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = MockTransport {
            incoming: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        self.outcomes
            .lock()
            .unwrap()
            .push_back(ConnectOutcome::Transport(transport));
        SocketHandle {
            incoming: tx,
            sent,
            closed,
        }
    }

    /// Script a failed dial.
    pub fn expect_failure(&self, message: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(ConnectOutcome::Failure(message.into()));
    }

    /// Script a dial that hangs until superseded.
    pub fn expect_hanging_connection(&self) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(ConnectOutcome::Hang);
    }

    /// How many dial attempts have been made.
    pub fn connect_count(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<MockTransport, ParlorError> {
        *self.connects.lock().unwrap() += 1;
        let outcome = self.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(ConnectOutcome::Transport(transport)) => Ok(transport),
            Some(ConnectOutcome::Failure(message)) => Err(ParlorError::ConnectionInit(message)),
            Some(ConnectOutcome::Hang) | None => std::future::pending().await,
        }
    }
}

// ── JSON helpers ────────────────────────────────────────────────────

/// Inbound `sendMessage` envelope.
pub fn chat_message_json(sender: &str, body: &str, timestamp_millis: u64) -> String {
    SocketMessage::new(
        MessageType::SendMessage,
        &ChatMessage {
            sender_nickname: sender.into(),
            body: body.into(),
            timestamp_millis,
            is_system_message: false,
        },
    )
    .and_then(|e| e.to_json())
    .expect("chat_message_json serialization")
}

/// Inbound `setTypingPresence` envelope.
pub fn typing_presence_json(users: &[&str]) -> String {
    SocketMessage::new(
        MessageType::SetTypingPresence,
        &UsersTypingPayload {
            users_typing: users.iter().map(|u| (*u).into()).collect(),
        },
    )
    .and_then(|e| e.to_json())
    .expect("typing_presence_json serialization")
}

/// Inbound `createSession` response carrying the server-assigned room id.
pub fn session_created_json(room_id: &str) -> String {
    SocketMessage::new(
        MessageType::CreateSession,
        &SessionResultPayload {
            room_id: room_id.into(),
        },
    )
    .and_then(|e| e.to_json())
    .expect("session_created_json serialization")
}

/// Inbound `joinSession` response.
pub fn session_joined_json(room_id: &str) -> String {
    SocketMessage::new(
        MessageType::JoinSession,
        &SessionResultPayload {
            room_id: room_id.into(),
        },
    )
    .and_then(|e| e.to_json())
    .expect("session_joined_json serialization")
}

/// Inbound `error` envelope.
pub fn server_error_json(message: &str) -> String {
    SocketMessage::new(
        MessageType::Error,
        &ServerErrorPayload {
            message: message.into(),
        },
    )
    .and_then(|e| e.to_json())
    .expect("server_error_json serialization")
}

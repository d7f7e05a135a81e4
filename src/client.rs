//! Async session lifecycle controller for the Parlor protocol.
//!
//! [`ParlorClient`] is a thin handle over a background controller task that
//! owns the socket, the single-slot pending room operation, the reconnection
//! timer and all published state. Commands are queued over an unbounded MPSC
//! channel; state changes are emitted on a bounded channel
//! ([`tokio::sync::mpsc::Receiver<ParlorEvent>`]) returned from
//! [`ParlorClient::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("wss://chat.example/ws");
//! let store = FileSessionStore::new("session.json");
//! let (client, mut events) = ParlorClient::start(connector, store, ParlorConfig::new());
//!
//! client.login("Alice", "", true, None)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ParlorEvent::SessionEstablished { session } => { /* … */ }
//!         ParlorEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::error::{ParlorError, Result};
use crate::event::ParlorEvent;
use crate::protocol::{
    ChatMessage, CreateSessionPayload, JoinSessionPayload, MessageType, SendMessagePayload,
    ServerErrorPayload, Session, SessionResultPayload, SocketMessage, TypingUpdatePayload,
    UsersTypingPayload,
};
use crate::session_store::SessionStore;
use crate::transport::{Connector, Transport};
use crate::typing::TypingDebouncer;

/// Default delay before a scheduled rejoin after an unexpected close.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default quiet window of the typing debouncer.
const DEFAULT_TYPING_WINDOW: Duration = Duration::from_secs(3);

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Error surfaced when the socket closes while a session is live.
const CONNECTION_LOST_MESSAGE: &str = "Connection lost. Reconnecting...";

/// Error surfaced when the server rejects a room create/join.
const ROOM_OPERATION_FAILED_MESSAGE: &str = "Failed to create/join room. Please try again.";

/// Error surfaced when a fresh socket cannot be dialled.
const CONNECTION_INIT_FAILED_MESSAGE: &str = "Failed to initialize connection. Please try again.";

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ParlorClient`]. All fields have defaults.
///
/// # Example
///
/// ```
/// use parlor_client::ParlorConfig;
/// use std::time::Duration;
///
/// let config = ParlorConfig::new()
///     .with_reconnect_delay(Duration::from_secs(5))
///     .with_restore_session(false);
/// assert_eq!(config.reconnect_delay, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ParlorConfig {
    /// Delay before the single scheduled rejoin after an unexpected close.
    ///
    /// Defaults to **3 seconds**.
    pub reconnect_delay: Duration,
    /// Quiet window of [`TypingDebouncer`]s handed out by this client.
    ///
    /// Defaults to **3 seconds**.
    pub typing_window: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) rather than blocking the controller. The final `Disconnected`
    /// event is always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown before the controller task is
    /// aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Whether to read the session store at startup and silently rejoin a
    /// persisted session.
    ///
    /// Defaults to **true**.
    pub restore_session: bool,
}

impl ParlorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            typing_window: DEFAULT_TYPING_WINDOW,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            restore_session: true,
        }
    }

    /// Set the delay before a scheduled rejoin.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the typing debounce window.
    #[must_use]
    pub fn with_typing_window(mut self, window: Duration) -> Self {
        self.typing_window = window;
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable the silent rejoin of a persisted session at startup.
    #[must_use]
    pub fn with_restore_session(mut self, restore: bool) -> Self {
        self.restore_session = restore;
        self
    }
}

impl Default for ParlorConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle of the socket connection, owned exclusively by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no attempt in progress.
    Disconnected,
    /// A user-initiated login is dialling a fresh socket.
    Connecting,
    /// The socket is ready for requests.
    Connected,
    /// The socket was lost after a successful join; a rejoin is scheduled or
    /// in progress.
    Reconnecting,
}

// ── Pending room operation ──────────────────────────────────────────

/// The single queued create-or-join intent awaiting connection readiness.
///
/// At most one exists; a newer login overwrites it. Consumed exactly once,
/// on the transition into [`ConnectionState::Connected`].
#[derive(Debug, Clone)]
enum PendingOp {
    Create {
        nickname: String,
        user_icon: Option<String>,
    },
    Join {
        nickname: String,
        room_id: String,
        user_icon: Option<String>,
    },
}

impl PendingOp {
    fn nickname(&self) -> &str {
        match self {
            Self::Create { nickname, .. } | Self::Join { nickname, .. } => nickname,
        }
    }

    fn user_icon(&self) -> Option<String> {
        match self {
            Self::Create { user_icon, .. } | Self::Join { user_icon, .. } => user_icon.clone(),
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// User intents queued from the handle to the controller task.
#[derive(Debug)]
pub(crate) enum Command {
    Login {
        nickname: String,
        room_id: String,
        is_creating: bool,
        user_icon: Option<String>,
    },
    SendChat {
        body: String,
    },
    SetTyping {
        typing: bool,
    },
    Logout,
}

// ── Shared state ────────────────────────────────────────────────────

/// State published by the controller task and read through the handle.
#[derive(Debug, Default)]
struct SharedState {
    connection: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
    messages: Mutex<Vec<ChatMessage>>,
    users_typing: Mutex<Vec<String>>,
    last_error: Mutex<Option<String>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to the session lifecycle controller.
///
/// Created via [`ParlorClient::start`], which spawns the controller task and
/// returns this handle together with an event receiver. All methods queue a
/// command and return once it is enqueued (no round-trip await); current
/// state is available through the async accessors.
pub struct ParlorClient {
    /// Sender half of the command channel to the controller task.
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// State published by the controller task.
    shared: Arc<SharedState>,
    /// Handle to the controller task.
    task: Option<JoinHandle<()>>,
    /// Oneshot sender signalling the controller to shut down gracefully.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
    /// Quiet window handed to [`TypingDebouncer`]s.
    typing_window: Duration,
}

impl ParlorClient {
    /// Start the controller task and return a handle plus event receiver.
    ///
    /// When `config.restore_session` is set and `store` holds a session, the
    /// controller immediately dials the server and rejoins that room.
    ///
    /// # Arguments
    ///
    /// * `connector` — dials a fresh [`Transport`] per session attempt.
    /// * `store` — persistent session storage kept in sync with the live
    ///   session.
    /// * `config` — tuning knobs; see [`ParlorConfig`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C, S>(
        connector: C,
        store: S,
        config: ParlorConfig,
    ) -> (Self, mpsc::Receiver<ParlorEvent>)
    where
        C: Connector,
        S: SessionStore,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ParlorEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(SharedState::default());
        let shutdown_timeout = config.shutdown_timeout;
        let typing_window = config.typing_window;

        let controller = Controller {
            connector: Arc::new(connector),
            store,
            shared: Arc::clone(&shared),
            event_tx,
            cmd_rx,
            shutdown_rx,
            config,
            socket: None,
            connecting: None,
            pending: None,
            in_flight: None,
            reconnect: None,
        };

        let task = tokio::spawn(controller.run());

        let client = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
            typing_window,
        };

        (client, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Create or join a room.
    ///
    /// With `is_creating` the server assigns the room id and `room_id` is
    /// ignored; otherwise `room_id` names the room to join. The operation is
    /// queued as the single pending room operation and executes when the
    /// socket signals readiness (immediately, if a connected socket already
    /// exists). A second `login` before the first resolves replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::EmptyNickname`] or [`ParlorError::EmptyRoomId`]
    /// on invalid parameters, and [`ParlorError::NotConnected`] if the
    /// controller has shut down.
    pub fn login(
        &self,
        nickname: impl Into<String>,
        room_id: impl Into<String>,
        is_creating: bool,
        user_icon: Option<String>,
    ) -> Result<()> {
        let nickname = nickname.into();
        let room_id = room_id.into();
        if nickname.trim().is_empty() {
            return Err(ParlorError::EmptyNickname);
        }
        if !is_creating && room_id.trim().is_empty() {
            return Err(ParlorError::EmptyRoomId);
        }
        self.send_cmd(Command::Login {
            nickname,
            room_id,
            is_creating,
            user_icon,
        })
    }

    /// Send a chat message to the room.
    ///
    /// Blank bodies are silently ignored. The message is not appended to the
    /// local history; it appears when the server echoes it back.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::NotConnected`] if the controller has shut down.
    pub fn send_chat_message(&self, body: impl Into<String>) -> Result<()> {
        let body = body.into();
        if body.trim().is_empty() {
            return Ok(());
        }
        self.send_cmd(Command::SendChat { body })
    }

    /// Publish a raw typing-presence transition for the local user.
    ///
    /// Most callers should drive this through a [`TypingDebouncer`] instead
    /// of calling it per keystroke.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::NotConnected`] if the controller has shut down.
    pub fn set_typing(&self, typing: bool) -> Result<()> {
        self.send_cmd(Command::SetTyping { typing })
    }

    /// Leave the room and clear all session state, including the persisted
    /// session and any scheduled reconnection.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::NotConnected`] if the controller has shut down.
    pub fn logout(&self) -> Result<()> {
        self.send_cmd(Command::Logout)
    }

    /// Create a [`TypingDebouncer`] feeding this client, using the configured
    /// typing window.
    pub fn typing_debouncer(&self) -> TypingDebouncer {
        TypingDebouncer::new(self.cmd_tx.clone(), self.typing_window)
    }

    /// Shut down the client, closing the socket and stopping the controller
    /// task. The event receiver yields a final
    /// [`Disconnected`](ParlorEvent::Disconnected) and then `None`.
    pub async fn shutdown(&mut self) {
        debug!("ParlorClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the controller with a timeout. If it does not exit in time,
        // abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("controller task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("controller task did not exit within timeout; aborting");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("controller task aborted: {join_err}");
                    }
                }
            }
        }

        *self.shared.connection.lock().await = ConnectionState::Disconnected;
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current connection lifecycle state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.connection.lock().await
    }

    /// The live session, if a room create/join has completed.
    pub async fn session(&self) -> Option<Session> {
        self.shared.session.lock().await.clone()
    }

    /// The chat history in arrival order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.shared.messages.lock().await.clone()
    }

    /// Nicknames currently typing, in server order.
    pub async fn users_typing(&self) -> Vec<String> {
        self.shared.users_typing.lock().await.clone()
    }

    /// The last surfaced error message, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().await.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send_cmd(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| ParlorError::NotConnected)
    }
}

impl std::fmt::Debug for ParlorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParlorClient")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ParlorClient {
    fn drop(&mut self) {
        // `Drop` is synchronous, so a graceful shutdown cannot be awaited
        // here. Aborting the task drops the controller future, which in turn
        // drops the socket.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Controller ──────────────────────────────────────────────────────

/// A dial attempt in progress. `retry` distinguishes a scheduled rejoin from
/// a user-initiated login: only the former keeps the reconnection chain alive
/// when the dial itself fails.
struct ConnectAttempt<T> {
    handle: JoinHandle<Result<T>>,
    retry: bool,
}

/// The background task owning all mutable lifecycle state.
///
/// Everything is driven from a single `select!` loop, so command handling,
/// socket events and timer firings never run concurrently with each other.
struct Controller<C: Connector, S> {
    connector: Arc<C>,
    store: S,
    shared: Arc<SharedState>,
    event_tx: mpsc::Sender<ParlorEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    shutdown_rx: oneshot::Receiver<()>,
    config: ParlorConfig,
    /// The one live socket. Replacing or dropping it supersedes the old
    /// connection; a superseded socket is no longer polled, so its events
    /// are structurally discarded.
    socket: Option<C::Transport>,
    connecting: Option<ConnectAttempt<C::Transport>>,
    /// Single-slot pending room operation.
    pending: Option<PendingOp>,
    /// The room operation whose server response is still outstanding.
    in_flight: Option<PendingOp>,
    /// Single-slot reconnect timer.
    reconnect: Option<Pin<Box<Sleep>>>,
}

/// Poll the live socket, or park forever when there is none.
async fn next_inbound<T: Transport>(socket: &mut Option<T>) -> Option<Result<String>> {
    match socket.as_mut() {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

/// Await the dial attempt in progress, or park forever when there is none.
async fn connect_finished<T>(
    connecting: &mut Option<ConnectAttempt<T>>,
) -> std::result::Result<Result<T>, tokio::task::JoinError> {
    match connecting.as_mut() {
        Some(attempt) => (&mut attempt.handle).await,
        None => std::future::pending().await,
    }
}

/// Await the reconnect timer, or park forever when none is armed.
async fn reconnect_due(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl<C, S> Controller<C, S>
where
    C: Connector,
    S: SessionStore,
{
    async fn run(mut self) {
        debug!("controller task started");

        if self.config.restore_session {
            self.restore_persisted_session().await;
        }

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        // Command channel closed: the handle was dropped.
                        None => {
                            debug!("command channel closed, shutting down controller");
                            self.close_socket().await;
                            self.emit_final(Some("client shut down".into())).await;
                            break;
                        }
                    }
                }

                _ = &mut self.shutdown_rx => {
                    debug!("shutdown signal received");
                    self.close_socket().await;
                    self.emit_final(Some("client shut down".into())).await;
                    break;
                }

                done = connect_finished(&mut self.connecting) => {
                    self.handle_connect_finished(done).await;
                }

                inbound = next_inbound(&mut self.socket) => {
                    match inbound {
                        Some(Ok(text)) => self.handle_message(&text).await,
                        Some(Err(e)) => {
                            error!("transport receive error: {e}");
                            self.handle_socket_closed(Some(e.to_string())).await;
                        }
                        None => {
                            debug!("socket closed by server");
                            self.handle_socket_closed(None).await;
                        }
                    }
                }

                () = reconnect_due(&mut self.reconnect) => {
                    self.handle_reconnect_due().await;
                }
            }
        }

        debug!("controller task exited");
    }

    // ── Startup ─────────────────────────────────────────────────────

    /// Attempt a silent rejoin of a session persisted by a previous run.
    async fn restore_persisted_session(&mut self) {
        match self.store.get() {
            Ok(Some(session)) => {
                info!(room_id = %session.room_id, "restoring persisted session");
                // Seed the live session so a failed dial still retries.
                *self.shared.session.lock().await = Some(session.clone());
                let op = PendingOp::Join {
                    nickname: session.nickname,
                    room_id: session.room_id,
                    user_icon: session.user_icon,
                };
                self.begin_login(op, true).await;
            }
            Ok(None) => {}
            Err(e) => warn!("failed to read persisted session: {e}"),
        }
    }

    // ── Command handling ────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Login {
                nickname,
                room_id,
                is_creating,
                user_icon,
            } => {
                let op = if is_creating {
                    PendingOp::Create {
                        nickname,
                        user_icon,
                    }
                } else {
                    PendingOp::Join {
                        nickname,
                        room_id,
                        user_icon,
                    }
                };
                self.begin_login(op, false).await;
            }
            Command::SendChat { body } => self.send_chat(body).await,
            Command::SetTyping { typing } => self.send_typing(typing).await,
            Command::Logout => self.handle_logout().await,
        }
    }

    /// Queue a room operation and make sure a socket is on the way.
    ///
    /// `reconnecting` marks a scheduled rejoin (or startup restore) rather
    /// than a user-initiated login.
    async fn begin_login(&mut self, op: PendingOp, reconnecting: bool) {
        self.set_error(None).await;
        self.shared.messages.lock().await.clear();
        self.shared.users_typing.lock().await.clear();
        self.in_flight = None;
        // A new intent replaces any stale pending operation and supersedes a
        // scheduled rejoin.
        self.pending = Some(op);
        self.reconnect = None;

        let connected = self.socket.is_some()
            && *self.shared.connection.lock().await == ConnectionState::Connected;
        if connected {
            // Fast path: the existing socket is already ready, execute
            // without waiting for a readiness event.
            self.execute_pending().await;
        } else {
            self.set_state(if reconnecting {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            })
            .await;
            self.dial(reconnecting);
        }
    }

    /// Discard the current socket and spawn a fresh dial attempt.
    fn dial(&mut self, retry: bool) {
        self.socket = None;
        if let Some(attempt) = self.connecting.take() {
            attempt.handle.abort();
        }
        let connector = Arc::clone(&self.connector);
        let handle = tokio::spawn(async move { connector.connect().await });
        self.connecting = Some(ConnectAttempt { handle, retry });
    }

    async fn handle_connect_finished(
        &mut self,
        done: std::result::Result<Result<C::Transport>, tokio::task::JoinError>,
    ) {
        let Some(attempt) = self.connecting.take() else {
            return;
        };
        drop(attempt.handle);

        match done {
            Ok(Ok(transport)) => {
                debug!("socket ready");
                self.socket = Some(transport);
                self.set_state(ConnectionState::Connected).await;
                self.emit(ParlorEvent::Connected).await;
                self.execute_pending().await;
            }
            Ok(Err(e)) => {
                self.handle_init_failure(attempt.retry, e.to_string()).await;
            }
            Err(join_err) => {
                error!("connect task failed: {join_err}");
                self.handle_init_failure(attempt.retry, join_err.to_string())
                    .await;
            }
        }
    }

    /// A dial attempt failed before the socket ever became ready.
    ///
    /// User-initiated logins are terminal here: the pending operation is
    /// discarded and the user must resubmit. A failed rejoin keeps the
    /// sequential reconnection chain alive instead.
    async fn handle_init_failure(&mut self, retry: bool, reason: String) {
        error!("connection init failed: {reason}");
        let has_session = self.shared.session.lock().await.is_some();
        if retry && has_session {
            self.set_state(ConnectionState::Reconnecting).await;
            self.set_error(Some(CONNECTION_LOST_MESSAGE.into())).await;
            self.reconnect = Some(Box::pin(tokio::time::sleep(self.config.reconnect_delay)));
            self.emit(ParlorEvent::ConnectionLost {
                reason: Some(reason),
                will_retry: true,
            })
            .await;
        } else {
            self.pending = None;
            self.set_state(ConnectionState::Disconnected).await;
            self.set_error(Some(CONNECTION_INIT_FAILED_MESSAGE.into()))
                .await;
            self.emit(ParlorEvent::ConnectionLost {
                reason: Some(reason),
                will_retry: false,
            })
            .await;
        }
    }

    /// Consume the pending room operation, exactly once.
    ///
    /// The slot is cleared before the request goes out; whatever the outcome,
    /// it is never executed a second time.
    async fn execute_pending(&mut self) {
        let Some(op) = self.pending.take() else {
            return;
        };

        let envelope = match &op {
            PendingOp::Create {
                nickname,
                user_icon,
            } => SocketMessage::new(
                MessageType::CreateSession,
                &CreateSessionPayload {
                    nickname: nickname.clone(),
                    user_icon: user_icon.clone(),
                },
            ),
            PendingOp::Join {
                nickname,
                room_id,
                user_icon,
            } => SocketMessage::new(
                MessageType::JoinSession,
                &JoinSessionPayload {
                    nickname: nickname.clone(),
                    room_id: room_id.clone(),
                    user_icon: user_icon.clone(),
                },
            ),
        };

        self.in_flight = Some(op);
        match envelope.and_then(|e| e.to_json()) {
            Ok(json) => self.send_raw(json).await,
            Err(e) => {
                // Serialization of our own payloads failing is a programming
                // bug; surface it without killing the controller.
                error!("failed to serialize room operation: {e}");
                self.in_flight = None;
            }
        }
    }

    async fn send_chat(&mut self, body: String) {
        if self.socket.is_none() {
            debug!("dropping chat message, no live socket");
            return;
        }
        match SocketMessage::new(MessageType::SendMessage, &SendMessagePayload { body })
            .and_then(|e| e.to_json())
        {
            Ok(json) => self.send_raw(json).await,
            Err(e) => error!("failed to serialize chat message: {e}"),
        }
    }

    async fn send_typing(&mut self, typing: bool) {
        if self.socket.is_none() {
            debug!("dropping typing update, no live socket");
            return;
        }
        let nickname = {
            let session = self.shared.session.lock().await;
            session.as_ref().map(|s| s.nickname.clone()).or_else(|| {
                self.in_flight
                    .as_ref()
                    .or(self.pending.as_ref())
                    .map(|op| op.nickname().to_owned())
            })
        };
        let Some(nickname) = nickname else {
            debug!("dropping typing update, no known nickname");
            return;
        };
        match SocketMessage::new(
            MessageType::SetTypingPresence,
            &TypingUpdatePayload { typing, nickname },
        )
        .and_then(|e| e.to_json())
        {
            Ok(json) => self.send_raw(json).await,
            Err(e) => error!("failed to serialize typing update: {e}"),
        }
    }

    /// Write one envelope to the live socket. A send failure is treated as a
    /// connection loss.
    async fn send_raw(&mut self, json: String) {
        let Some(transport) = self.socket.as_mut() else {
            return;
        };
        if let Err(e) = transport.send(json).await {
            error!("transport send error: {e}");
            self.handle_socket_closed(Some(e.to_string())).await;
        }
    }

    async fn handle_logout(&mut self) {
        debug!("logout requested");
        self.pending = None;
        self.in_flight = None;
        // Cancel a scheduled rejoin so no stale login fires after an explicit
        // exit.
        self.reconnect = None;
        if let Some(attempt) = self.connecting.take() {
            attempt.handle.abort();
        }
        // Connection teardown belongs to the dropped transport.
        self.socket = None;

        *self.shared.session.lock().await = None;
        self.shared.messages.lock().await.clear();
        self.shared.users_typing.lock().await.clear();
        self.set_error(None).await;
        self.set_state(ConnectionState::Disconnected).await;

        if let Err(e) = self.store.clear() {
            warn!("failed to clear persisted session: {e}");
        }

        self.emit(ParlorEvent::LoggedOut).await;
    }

    // ── Inbound messages ────────────────────────────────────────────

    async fn handle_message(&mut self, text: &str) {
        let envelope = match SocketMessage::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("failed to parse inbound message: {e} — raw: {text}");
                return;
            }
        };

        match envelope.message_type {
            MessageType::SendMessage => {
                // Structural trust in the transport: a malformed payload
                // still becomes a (defaulted) history entry rather than
                // being rejected.
                let message: ChatMessage = envelope.payload().unwrap_or_else(|e| {
                    warn!("malformed sendMessage payload, appending defaults: {e}");
                    ChatMessage::default()
                });
                self.shared.messages.lock().await.push(message.clone());
                self.emit(ParlorEvent::MessageReceived { message }).await;
            }
            MessageType::SetTypingPresence => {
                let payload: UsersTypingPayload = envelope.payload().unwrap_or_default();
                *self.shared.users_typing.lock().await = payload.users_typing.clone();
                self.emit(ParlorEvent::TypingPresenceChanged {
                    users_typing: payload.users_typing,
                })
                .await;
            }
            MessageType::CreateSession | MessageType::JoinSession => {
                self.complete_room_operation(&envelope).await;
            }
            MessageType::Error => {
                let payload: ServerErrorPayload = envelope.payload().unwrap_or_default();
                self.handle_server_error(payload.message).await;
            }
            MessageType::Unknown => {
                debug!("ignoring inbound message of unknown type");
            }
        }
    }

    /// The server answered a create/join request: publish the session.
    ///
    /// Only the response kind matching the in-flight operation completes it;
    /// a `joinSession` response cannot resolve an outstanding create (or vice
    /// versa).
    async fn complete_room_operation(&mut self, envelope: &SocketMessage) {
        let kind_matches = match self.in_flight.as_ref() {
            Some(PendingOp::Create { .. }) => envelope.message_type == MessageType::CreateSession,
            Some(PendingOp::Join { .. }) => envelope.message_type == MessageType::JoinSession,
            None => {
                debug!("room operation response without an in-flight operation, ignoring");
                return;
            }
        };
        if !kind_matches {
            warn!(
                message_type = ?envelope.message_type,
                "room operation response does not match the in-flight operation, ignoring"
            );
            return;
        }
        let Some(op) = self.in_flight.take() else {
            return;
        };

        let result: SessionResultPayload = envelope.payload().unwrap_or_default();
        let room_id = match &op {
            // Creates adopt the server-assigned room id.
            PendingOp::Create { .. } => result.room_id,
            // Joins keep the id the caller supplied.
            PendingOp::Join { room_id, .. } => room_id.clone(),
        };

        let session = Session::new(op.nickname(), room_id, op.user_icon());
        info!(room_id = %session.room_id, nickname = %session.nickname, "session established");

        *self.shared.session.lock().await = Some(session.clone());
        if let Err(e) = self.store.set(&session) {
            warn!("failed to persist session: {e}");
        }

        self.emit(ParlorEvent::SessionEstablished { session }).await;
    }

    /// An inbound `error` message. While a room operation is outstanding it
    /// completes that operation as failed; otherwise it is surfaced as-is.
    /// The socket itself is healthy either way, so the state stays
    /// `Connected` and nothing is retried.
    async fn handle_server_error(&mut self, message: String) {
        if self.in_flight.take().is_some() {
            warn!("room operation rejected: {message}");
            self.set_error(Some(ROOM_OPERATION_FAILED_MESSAGE.into()))
                .await;
            self.emit(ParlorEvent::RoomOperationFailed { message }).await;
        } else {
            warn!("server error: {message}");
            self.set_error(Some(message)).await;
        }
    }

    // ── Connection loss and recovery ────────────────────────────────

    /// The socket closed or errored. Schedules exactly one rejoin when a
    /// session exists; before the first successful join nothing is retried.
    async fn handle_socket_closed(&mut self, reason: Option<String>) {
        self.socket = None;
        self.in_flight = None;

        let has_session = self.shared.session.lock().await.is_some();
        if has_session {
            self.set_state(ConnectionState::Reconnecting).await;
            self.set_error(Some(CONNECTION_LOST_MESSAGE.into())).await;
            // Single-slot: a new timer replaces any previous one.
            self.reconnect = Some(Box::pin(tokio::time::sleep(self.config.reconnect_delay)));
            self.emit(ParlorEvent::ConnectionLost {
                reason,
                will_retry: true,
            })
            .await;
        } else {
            self.set_state(ConnectionState::Disconnected).await;
            self.emit(ParlorEvent::ConnectionLost {
                reason,
                will_retry: false,
            })
            .await;
        }
    }

    /// The reconnect timer fired: rejoin the existing session. Always a
    /// join, never a create — the room already exists.
    async fn handle_reconnect_due(&mut self) {
        self.reconnect = None;
        let session = self.shared.session.lock().await.clone();
        let Some(session) = session else {
            debug!("reconnect timer fired without a session, ignoring");
            return;
        };
        info!(room_id = %session.room_id, "attempting to rejoin room");
        let op = PendingOp::Join {
            nickname: session.nickname,
            room_id: session.room_id,
            user_icon: session.user_icon,
        };
        self.begin_login(op, true).await;
    }

    // ── Shutdown ────────────────────────────────────────────────────

    async fn close_socket(&mut self) {
        if let Some(attempt) = self.connecting.take() {
            attempt.handle.abort();
        }
        self.reconnect = None;
        if let Some(mut transport) = self.socket.take() {
            let _ = transport.close().await;
        }
    }

    // ── State and event plumbing ────────────────────────────────────

    async fn set_state(&self, state: ConnectionState) {
        *self.shared.connection.lock().await = state;
    }

    async fn set_error(&self, message: Option<String>) {
        *self.shared.last_error.lock().await = message;
    }

    /// Emit an event. If the channel is full, log and drop the event rather
    /// than blocking the controller.
    async fn emit(&self, event: ParlorEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// Emit the final [`Disconnected`](ParlorEvent::Disconnected) event.
    ///
    /// Uses a blocking `send().await` because this is always the last event
    /// on the channel and must never be silently dropped.
    async fn emit_final(&self, reason: Option<String>) {
        self.set_state(ConnectionState::Disconnected).await;
        if self
            .event_tx
            .send(ParlorEvent::Disconnected { reason })
            .await
            .is_err()
        {
            debug!("event channel closed, receiver dropped");
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ParlorConfig::new();
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.typing_window, Duration::from_secs(3));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.restore_session);
    }

    #[test]
    fn config_builder_overrides() {
        let config = ParlorConfig::new()
            .with_reconnect_delay(Duration::from_secs(7))
            .with_typing_window(Duration::from_millis(500))
            .with_shutdown_timeout(Duration::from_secs(2))
            .with_restore_session(false);
        assert_eq!(config.reconnect_delay, Duration::from_secs(7));
        assert_eq!(config.typing_window, Duration::from_millis(500));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
        assert!(!config.restore_session);
    }

    #[test]
    fn event_channel_capacity_clamped_to_one() {
        let config = ParlorConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn pending_op_accessors() {
        let create = PendingOp::Create {
            nickname: "alice".into(),
            user_icon: Some("icon".into()),
        };
        assert_eq!(create.nickname(), "alice");
        assert_eq!(create.user_icon().as_deref(), Some("icon"));

        let join = PendingOp::Join {
            nickname: "bob".into(),
            room_id: "R1".into(),
            user_icon: None,
        };
        assert_eq!(join.nickname(), "bob");
        assert_eq!(join.user_icon(), None);
    }
}

//! Wire types for the Parlor room chat protocol.
//!
//! Every message travels as a JSON envelope of the form
//! `{"type": "<camelCase>", "data": {...}}` in both directions. Payloads are
//! decoded permissively: missing fields take their defaults and unrecognized
//! message types map to [`MessageType::Unknown`] so a newer server never
//! breaks an older client.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ── Message types ───────────────────────────────────────────────────

/// Discriminant of a [`SocketMessage`] envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    /// Chat message. Outbound carries `{body}`; the server echoes the full
    /// [`ChatMessage`] payload back to every room member, sender included.
    SendMessage,
    /// Typing presence. Outbound carries `{typing, nickname}`; inbound
    /// replaces the whole typing list via [`UsersTypingPayload`].
    SetTypingPresence,
    /// Create a new room. The response carries the server-assigned room id.
    CreateSession,
    /// Join an existing room by id.
    JoinSession,
    /// Server-side failure report.
    Error,
    /// Any message type this client does not understand.
    #[serde(other)]
    Unknown,
}

// ── Envelope ────────────────────────────────────────────────────────

/// The JSON envelope every protocol message is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketMessage {
    /// Message discriminant.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Type-specific payload. `null` when the message carries no data.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SocketMessage {
    /// Wrap a typed payload into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::Serialization`](crate::ParlorError::Serialization)
    /// if the payload cannot be represented as JSON.
    pub fn new<T: Serialize>(message_type: MessageType, payload: &T) -> Result<Self> {
        Ok(Self {
            message_type,
            data: serde_json::to_value(payload)?,
        })
    }

    /// Serialize the envelope to its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::Serialization`](crate::ParlorError::Serialization)
    /// on failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope from its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::Serialization`](crate::ParlorError::Serialization)
    /// if the text is not a valid envelope. An unrecognized `type` string is
    /// not an error; it decodes to [`MessageType::Unknown`].
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::Serialization`](crate::ParlorError::Serialization)
    /// if the payload does not fit `T`. Payload structs in this module default
    /// every field, so this only fails on structurally wrong data (e.g. a
    /// string where an object is expected).
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

// ── Outbound payloads ───────────────────────────────────────────────

/// Payload of an outbound `sendMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    /// Message text.
    pub body: String,
}

/// Payload of an outbound `setTypingPresence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingUpdatePayload {
    /// Whether the local user currently has unsent input.
    pub typing: bool,
    /// Nickname the presence applies to.
    pub nickname: String,
}

/// Payload of an outbound `createSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionPayload {
    /// Display name of the creating user.
    pub nickname: String,
    /// Optional avatar, as a data URL.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_icon: Option<String>,
}

/// Payload of an outbound `joinSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionPayload {
    /// Display name of the joining user.
    pub nickname: String,
    /// Id of the room to join.
    pub room_id: String,
    /// Optional avatar, as a data URL.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_icon: Option<String>,
}

// ── Inbound payloads ────────────────────────────────────────────────

/// A chat message as delivered by the server.
///
/// Decoded permissively: a payload missing any of these fields still yields a
/// `ChatMessage` with defaults in place, preserving arrival order over strict
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessage {
    /// Nickname of the sender. Empty for messages the server could not
    /// attribute.
    pub sender_nickname: String,
    /// Message text.
    pub body: String,
    /// Server-side timestamp, milliseconds since the Unix epoch.
    pub timestamp_millis: u64,
    /// Whether this is a system notice (user joined, user left, ...)
    /// rather than a user message.
    pub is_system_message: bool,
}

/// Inbound `setTypingPresence` payload: the full set of users typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UsersTypingPayload {
    /// Nicknames with unsent input right now. Replaces the previous set
    /// wholesale; an absent list means nobody is typing.
    pub users_typing: Vec<String>,
}

/// Response payload for `createSession` and `joinSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionResultPayload {
    /// Room id. Server-assigned for creates; echoes the request for joins
    /// (and may be omitted there).
    pub room_id: String,
}

/// Inbound `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerErrorPayload {
    /// Human-readable failure description.
    pub message: String,
}

// ── Session ─────────────────────────────────────────────────────────

/// A user's current room membership.
///
/// Created when a room create/join completes, persisted through the
/// [`SessionStore`](crate::SessionStore) on every change, and cleared on
/// logout. Replaced wholesale on room re-entry, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Display name inside the room.
    pub nickname: String,
    /// Opaque server-issued room id.
    pub room_id: String,
    /// Optional avatar, as a data URL.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_icon: Option<String>,
}

impl Session {
    /// Create a new session value.
    pub fn new(
        nickname: impl Into<String>,
        room_id: impl Into<String>,
        user_icon: Option<String>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            room_id: room_id.into(),
            user_icon,
        }
    }
}

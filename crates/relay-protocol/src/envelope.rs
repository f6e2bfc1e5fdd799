//! Envelope types for the relay protocol.
//!
//! Envelopes are the unit of communication between clients and the relay.
//! Each envelope is a JSON object whose field names are fixed for wire
//! compatibility: `type`, `from`, `to`, `roomId` and `payload`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Sender recorded on envelopes the server emits on its own behalf.
pub const SERVER_SENDER: &str = "server";

/// Envelope kinds generated by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemKind {
    /// Sent once to a freshly registered connection.
    Connected,
    /// Another connection joined the recipient's room.
    UserJoined,
    /// Another connection left the recipient's room.
    UserLeft,
}

impl SystemKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SystemKind::Connected => "connected",
            SystemKind::UserJoined => "user-joined",
            SystemKind::UserLeft => "user-left",
        }
    }

    /// Parse a wire name into a system kind.
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "connected" => Some(SystemKind::Connected),
            "user-joined" => Some(SystemKind::UserJoined),
            "user-left" => Some(SystemKind::UserLeft),
            _ => None,
        }
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an envelope should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Deliver to a single connection.
    Direct(&'a str),
    /// Deliver to every member of a room except the sender.
    Room(&'a str),
}

/// A protocol envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind. Application kinds are opaque to the relay.
    #[serde(rename = "type")]
    pub kind: String,

    /// Sender connection id. Always overwritten for inbound envelopes, so
    /// whatever a client puts here is accepted and discarded.
    #[serde(default, deserialize_with = "any_sender")]
    pub from: String,

    /// Target connection id for direct delivery.
    #[serde(default, skip_serializing_if = "is_blank")]
    pub to: Option<String>,

    /// Target room for broadcast delivery.
    #[serde(rename = "roomId", default, skip_serializing_if = "is_blank")]
    pub room: Option<String>,

    /// Application data, passed through untouched. An explicit `null` is
    /// kept and relayed as `null`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn any_sender<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(from) => Ok(from),
        _ => Ok(String::new()),
    }
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Create an envelope of the given kind with no routing information.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            from: String::new(),
            to: None,
            room: None,
            payload: None,
        }
    }

    /// Set the sender.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Set the direct target.
    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Set the target room.
    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The `connected` greeting sent to a newly registered connection.
    #[must_use]
    pub fn connected(client_id: &str) -> Self {
        Self::new(SystemKind::Connected.as_str())
            .with_from(SERVER_SENDER)
            .with_to(client_id)
            .with_payload(serde_json::json!({ "clientId": client_id }))
    }

    /// Notification that `from` joined `room`.
    #[must_use]
    pub fn user_joined(from: impl Into<String>, room: impl Into<String>) -> Self {
        Self::new(SystemKind::UserJoined.as_str())
            .with_from(from)
            .with_room(room)
    }

    /// Notification that `from` left `room`.
    #[must_use]
    pub fn user_left(from: impl Into<String>, room: impl Into<String>) -> Self {
        Self::new(SystemKind::UserLeft.as_str())
            .with_from(from)
            .with_room(room)
    }

    /// The system kind of this envelope, if it is one the server generates.
    #[must_use]
    pub fn system_kind(&self) -> Option<SystemKind> {
        SystemKind::parse(&self.kind)
    }

    /// Resolve the routing mode.
    ///
    /// A non-empty `to` wins over a non-empty `roomId`. Returns `None` when
    /// the envelope carries neither and cannot be routed.
    #[must_use]
    pub fn route(&self) -> Option<Route<'_>> {
        if let Some(to) = self.to.as_deref().filter(|to| !to.is_empty()) {
            return Some(Route::Direct(to));
        }
        self.room
            .as_deref()
            .filter(|room| !room.is_empty())
            .map(Route::Room)
    }
}

//! Wire envelopes exchanged over the relay socket.
//!
//! Every application frame is a JSON text frame shaped `{type, message}`.
//! Clients send `register` (with a `name` field) and free-form envelopes;
//! the server only ever produces the four [`ServerEnvelope`] variants.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Envelopes produced by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "lowercase")]
pub enum ServerEnvelope {
    /// Registration confirmed; human-readable text embedding the name.
    Registered(String),
    /// Current participant names, in registration order.
    Online {
        /// Registered display names.
        users: Vec<String>,
    },
    /// A participant registered.
    Join(String),
    /// A participant disconnected.
    Left(String),
}

impl ServerEnvelope {
    /// Confirmation sent back to a freshly registered client.
    pub fn registered(name: &str) -> Self {
        Self::Registered(format!("{name}, you are registered."))
    }

    /// Wire `type` tag of this envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered(_) => "registered",
            Self::Online { .. } => "online",
            Self::Join(_) => "join",
            Self::Left(_) => "left",
        }
    }

    /// Serialize to a shareable JSON text frame.
    pub fn encode(&self) -> Result<Arc<String>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::new)
    }
}

/// Why a `register` envelope was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameRejection {
    /// No `name` field, or not a string.
    Missing,
    /// Empty after trimming whitespace.
    Blank,
    /// Longer than the configured limit.
    TooLong,
}

impl NameRejection {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Blank => "blank",
            Self::TooLong => "too_long",
        }
    }
}

/// Classification of one inbound text frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// `register` with a usable (trimmed) name.
    Register(String),
    /// `register` whose name could not be used.
    InvalidRegister(NameRejection),
    /// A JSON object of any other type, or without a type.
    Message,
    /// Not a JSON object at all.
    Malformed,
}

/// Classify a text frame without taking ownership of it.
///
/// Only the `register` control envelope is interpreted; everything else is
/// opaque to the relay and is forwarded verbatim by the caller.
pub fn classify(text: &str, max_name_chars: usize) -> Inbound {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
        return Inbound::Malformed;
    };
    if map.get("type").and_then(Value::as_str) != Some("register") {
        return Inbound::Message;
    }
    let Some(Value::String(raw)) = map.get("name") else {
        return Inbound::InvalidRegister(NameRejection::Missing);
    };
    let name = raw.trim();
    if name.is_empty() {
        Inbound::InvalidRegister(NameRejection::Blank)
    } else if name.chars().count() > max_name_chars {
        Inbound::InvalidRegister(NameRejection::TooLong)
    } else {
        Inbound::Register(name.to_string())
    }
}

//! Ordered participant registry and broadcast fan-out.
//!
//! The registry is the only shared state of the relay. Every mutation and
//! every snapshot goes through one `parking_lot::RwLock`, which is never held
//! across an `.await`. Fan-out takes a snapshot under the lock and delivers
//! outside it, so a slow recipient can never stall the others.

use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_SLOW_CLIENT_DISCONNECTS_TOTAL};
use crate::websocket::connection::{ClientConnection, ConnectionId, DeliveryError};

/// Default lifetime drop count before a slow client is disconnected.
pub const DEFAULT_MAX_DROPPED_MESSAGES: u64 = 100;

/// A registered connection and its display name.
#[derive(Clone, Debug)]
pub struct Participant {
    /// Display name claimed at registration (not unique).
    pub name: String,
    /// Send handle of the participant's socket.
    pub connection: Arc<ClientConnection>,
}

impl Participant {
    /// Connection id of this participant.
    pub fn id(&self) -> &ConnectionId {
        &self.connection.id
    }
}

/// Registered participants in registration order.
pub struct Registry {
    participants: RwLock<Vec<Participant>>,
    max_dropped_messages: u64,
}

impl Registry {
    /// Create an empty registry with the default drop threshold.
    pub fn new() -> Self {
        Self::with_drop_threshold(DEFAULT_MAX_DROPPED_MESSAGES)
    }

    /// Create an empty registry that disconnects a recipient once it has
    /// refused `max_dropped_messages` deliveries.
    pub fn with_drop_threshold(max_dropped_messages: u64) -> Self {
        Self {
            participants: RwLock::new(Vec::new()),
            max_dropped_messages: max_dropped_messages.max(1),
        }
    }

    /// Register `connection` under `name`.
    ///
    /// If the connection is already registered its name is replaced in place
    /// and `false` is returned; otherwise the participant is appended.
    pub fn add(&self, name: impl Into<String>, connection: Arc<ClientConnection>) -> bool {
        let name = name.into();
        let mut participants = self.participants.write();
        if let Some(existing) = participants
            .iter_mut()
            .find(|p| p.connection.id == connection.id)
        {
            existing.name = name;
            return false;
        }
        participants.push(Participant { name, connection });
        true
    }

    /// Remove the participant for `id`, returning it if it was registered.
    pub fn remove(&self, id: &ConnectionId) -> Option<Participant> {
        let mut participants = self.participants.write();
        let index = participants.iter().position(|p| &p.connection.id == id)?;
        Some(participants.remove(index))
    }

    /// The participant registered for `id`.
    pub fn find(&self, id: &ConnectionId) -> Option<Participant> {
        self.participants
            .read()
            .iter()
            .find(|p| &p.connection.id == id)
            .cloned()
    }

    /// Point-in-time copy of all participants, in registration order.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.read().clone()
    }

    /// Names of all participants, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.participants
            .read()
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    /// Whether nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }

    /// Deliver `text` to every participant.
    ///
    /// Returns the number of recipients whose queue accepted the frame.
    pub fn broadcast_all(&self, text: Arc<String>) -> usize {
        self.fan_out(None, &text)
    }

    /// Deliver `text` to every participant except `excluded`.
    pub fn broadcast_except(&self, excluded: &ConnectionId, text: Arc<String>) -> usize {
        self.fan_out(Some(excluded), &text)
    }

    fn fan_out(&self, excluded: Option<&ConnectionId>, text: &Arc<String>) -> usize {
        let recipients = self.snapshot();
        let mut delivered = 0usize;
        for participant in recipients
            .iter()
            .filter(|p| excluded != Some(&p.connection.id))
        {
            let conn = &participant.connection;
            match conn.send(Arc::clone(text)) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::QueueFull) => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    let drops = conn.drop_count();
                    if drops >= self.max_dropped_messages {
                        if !conn.is_disconnecting() {
                            warn!(conn_id = %conn.id, name = %participant.name, drops, "disconnecting slow client");
                            counter!(WS_SLOW_CLIENT_DISCONNECTS_TOTAL).increment(1);
                            conn.disconnect();
                        }
                    } else {
                        warn!(conn_id = %conn.id, total_drops = drops, "failed to send to client (queue full)");
                    }
                }
                Err(e) => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    debug!(conn_id = %conn.id, error = %e, "skipping recipient");
                }
            }
        }
        debug!(
            recipients = recipients.len(),
            delivered,
            excluded = excluded.map(ConnectionId::as_str),
            "broadcast"
        );
        delivered
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("participants", &self.len())
            .field("max_dropped_messages", &self.max_dropped_messages)
            .finish()
    }
}

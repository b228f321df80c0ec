//! Per-connection relay state machine.
//!
//! A [`Dispatcher`] consumes the events of one socket (text, binary, ping,
//! close) and decides who receives what. It owns no socket: replies go
//! through the connection's outbound queue and fan-out goes through the
//! shared [`Registry`].

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::metrics::{RELAY_MESSAGES_TOTAL, RELAY_REGISTRATIONS_TOTAL};
use crate::protocol::{Inbound, NameRejection, ServerEnvelope, classify};
use crate::registry::Registry;

use super::connection::ClientConnection;

/// Lifecycle of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchState {
    /// Upgraded but not yet registered; invisible to other participants.
    Connected,
    /// Registered under a display name.
    Registered {
        /// Current display name.
        name: String,
    },
    /// Terminal; further events are ignored.
    Closed,
}

/// Why an inbound text frame produced no traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Chat or malformed frame from a connection that has not registered.
    Unregistered,
    /// `register` whose name was refused.
    InvalidName(NameRejection),
}

/// What the dispatcher did with an inbound text frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The connection was registered (or renamed) under `name`.
    Registered {
        /// Name now bound to the connection.
        name: String,
        /// Whether this replaced an earlier registration.
        renamed: bool,
        /// Participants notified with `join`.
        notified: usize,
    },
    /// The frame was relayed verbatim.
    Relayed {
        /// Participants whose queue accepted the frame.
        recipients: usize,
    },
    /// Nothing was sent.
    Dropped(DropReason),
    /// The dispatcher is closed.
    Ignored,
}

/// Routes the events of one connection.
pub struct Dispatcher {
    connection: Arc<ClientConnection>,
    registry: Arc<Registry>,
    max_name_chars: usize,
    state: DispatchState,
}

impl Dispatcher {
    /// Create a dispatcher in the [`DispatchState::Connected`] state.
    pub fn new(
        connection: Arc<ClientConnection>,
        registry: Arc<Registry>,
        max_name_chars: usize,
    ) -> Self {
        debug!(conn_id = %connection.id, "connection opened");
        Self {
            connection,
            registry,
            max_name_chars,
            state: DispatchState::Connected,
        }
    }

    /// Current state.
    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    /// Handle an inbound text frame.
    pub fn on_text(&mut self, text: &str) -> Outcome {
        if self.state == DispatchState::Closed {
            return Outcome::Ignored;
        }
        let registered = matches!(self.state, DispatchState::Registered { .. });

        match classify(text, self.max_name_chars) {
            Inbound::Register(name) => self.register(name),
            Inbound::InvalidRegister(reason) => {
                debug!(conn_id = %self.connection.id, reason = reason.as_str(), "register refused");
                Outcome::Dropped(DropReason::InvalidName(reason))
            }
            Inbound::Message | Inbound::Malformed if registered => {
                let recipients = self.registry.broadcast_all(Arc::new(text.to_owned()));
                counter!(RELAY_MESSAGES_TOTAL).increment(1);
                debug!(conn_id = %self.connection.id, recipients, bytes = text.len(), "relayed message");
                Outcome::Relayed { recipients }
            }
            Inbound::Message | Inbound::Malformed => {
                debug!(conn_id = %self.connection.id, bytes = text.len(), "dropping message from unregistered connection");
                Outcome::Dropped(DropReason::Unregistered)
            }
        }
    }

    /// Handle an inbound binary frame. Binary payloads are never routed.
    pub fn on_binary(&self, len: usize) {
        debug!(conn_id = %self.connection.id, len, "ignoring binary frame");
    }

    /// Handle an inbound ping.
    pub fn on_ping(&self) {
        debug!(conn_id = %self.connection.id, "ping");
    }

    /// Handle the end of the connection, graceful or not.
    ///
    /// A registered participant is announced with `left` to everyone else
    /// and removed. Calling this more than once is a no-op.
    pub fn on_close(&mut self) {
        if self.state == DispatchState::Closed {
            return;
        }
        self.state = DispatchState::Closed;

        let id = &self.connection.id;
        let Some(participant) = self.registry.find(id) else {
            debug!(conn_id = %id, "closed before registering");
            return;
        };

        let notified = match ServerEnvelope::Left(participant.name.clone()).encode() {
            Ok(frame) => self.registry.broadcast_except(id, frame),
            Err(e) => {
                warn!(conn_id = %id, error = %e, "failed to serialize left envelope");
                0
            }
        };
        let _ = self.registry.remove(id);
        info!(conn_id = %id, name = %participant.name, notified, "participant left");
    }

    fn register(&mut self, name: String) -> Outcome {
        let conn = &self.connection;
        let renamed = !self.registry.add(name.clone(), Arc::clone(conn));
        counter!(RELAY_REGISTRATIONS_TOTAL).increment(1);

        let replies = [
            ServerEnvelope::registered(&name),
            ServerEnvelope::Online {
                users: self.registry.names(),
            },
        ];
        for reply in &replies {
            if let Err(e) = conn.send_envelope(reply) {
                warn!(conn_id = %conn.id, kind = reply.kind(), error = %e, "failed to queue reply");
            }
        }

        let notified = match ServerEnvelope::Join(name.clone()).encode() {
            Ok(frame) => self.registry.broadcast_except(&conn.id, frame),
            Err(e) => {
                warn!(conn_id = %conn.id, error = %e, "failed to serialize join envelope");
                0
            }
        };

        info!(conn_id = %conn.id, name = %name, renamed, notified, "participant registered");
        self.state = DispatchState::Registered { name: name.clone() };
        Outcome::Registered {
            name,
            renamed,
            notified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Peer {
        dispatcher: Dispatcher,
        rx: mpsc::Receiver<Arc<String>>,
    }

    impl Peer {
        fn new(id: &str, registry: &Arc<Registry>) -> Self {
            let (tx, rx) = mpsc::channel(32);
            let conn = Arc::new(ClientConnection::new(id.into(), tx, CancellationToken::new()));
            Self {
                dispatcher: Dispatcher::new(conn, Arc::clone(registry), 16),
                rx,
            }
        }

        fn register(&mut self, name: &str) -> Outcome {
            self.dispatcher
                .on_text(&json!({"type": "register", "name": name}).to_string())
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(serde_json::from_str(&frame).unwrap_or(Value::String(frame.to_string())));
            }
            out
        }

        fn drain_raw(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(frame.to_string());
            }
            out
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new())
    }

    #[test]
    fn starts_connected_without_registry_entry() {
        let reg = registry();
        let peer = Peer::new("a", &reg);
        assert_eq!(peer.dispatcher.state(), &DispatchState::Connected);
        assert!(reg.is_empty());
    }

    #[test]
    fn first_registration_replies_in_order() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);

        let outcome = a.register("alice");
        assert_eq!(
            outcome,
            Outcome::Registered {
                name: "alice".into(),
                renamed: false,
                notified: 0
            }
        );
        assert_eq!(
            a.drain(),
            vec![
                json!({"type": "registered", "message": "alice, you are registered."}),
                json!({"type": "online", "message": {"users": ["alice"]}}),
            ]
        );
        assert_eq!(
            a.dispatcher.state(),
            &DispatchState::Registered {
                name: "alice".into()
            }
        );
    }

    #[test]
    fn second_registration_notifies_others_only() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let _ = a.register("alice");
        let _ = a.drain();

        let _ = b.register("bob");
        assert_eq!(
            b.drain(),
            vec![
                json!({"type": "registered", "message": "bob, you are registered."}),
                json!({"type": "online", "message": {"users": ["alice", "bob"]}}),
            ]
        );
        assert_eq!(a.drain(), vec![json!({"type": "join", "message": "bob"})]);
    }

    #[test]
    fn chat_is_echoed_to_everyone_verbatim() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let _ = a.register("alice");
        let _ = b.register("bob");
        let _ = a.drain();
        let _ = b.drain();

        let raw = r#"{"type":"chat","message":"hi",  "extra":[1,2]}"#;
        assert_eq!(a.dispatcher.on_text(raw), Outcome::Relayed { recipients: 2 });
        assert_eq!(a.drain_raw(), vec![raw.to_string()]);
        assert_eq!(b.drain_raw(), vec![raw.to_string()]);
    }

    #[test]
    fn malformed_text_from_registered_is_relayed() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let _ = a.register("alice");
        let _ = a.drain();

        assert_eq!(a.dispatcher.on_text("not json"), Outcome::Relayed { recipients: 1 });
        assert_eq!(a.drain_raw(), vec!["not json".to_string()]);
    }

    #[test]
    fn unregistered_chatter_is_dropped() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let _ = a.register("alice");
        let _ = a.drain();

        for text in [r#"{"type":"chat","message":"psst"}"#, "garbage", "[]"] {
            assert_eq!(
                b.dispatcher.on_text(text),
                Outcome::Dropped(DropReason::Unregistered)
            );
        }
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
        assert_eq!(b.dispatcher.state(), &DispatchState::Connected);
    }

    #[test]
    fn invalid_register_is_dropped() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);

        assert_eq!(
            a.dispatcher.on_text(r#"{"type":"register"}"#),
            Outcome::Dropped(DropReason::InvalidName(NameRejection::Missing))
        );
        assert_eq!(
            a.register("   "),
            Outcome::Dropped(DropReason::InvalidName(NameRejection::Blank))
        );
        assert_eq!(
            a.register("a-name-that-is-far-too-long"),
            Outcome::Dropped(DropReason::InvalidName(NameRejection::TooLong))
        );
        assert!(a.drain().is_empty());
        assert!(reg.is_empty());
        assert_eq!(a.dispatcher.state(), &DispatchState::Connected);
    }

    #[test]
    fn invalid_register_while_registered_keeps_name() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let _ = a.register("alice");
        let _ = a.drain();

        assert!(matches!(a.register(""), Outcome::Dropped(_)));
        assert!(a.drain().is_empty());
        assert_eq!(reg.names(), vec!["alice"]);
    }

    #[test]
    fn re_register_renames_in_place() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let _ = a.register("alice");
        let _ = b.register("bob");
        let _ = a.drain();
        let _ = b.drain();

        let outcome = a.register("alicia");
        assert_eq!(
            outcome,
            Outcome::Registered {
                name: "alicia".into(),
                renamed: true,
                notified: 1
            }
        );
        assert_eq!(reg.names(), vec!["alicia", "bob"]);
        assert_eq!(
            a.drain(),
            vec![
                json!({"type": "registered", "message": "alicia, you are registered."}),
                json!({"type": "online", "message": {"users": ["alicia", "bob"]}}),
            ]
        );
        assert_eq!(b.drain(), vec![json!({"type": "join", "message": "alicia"})]);
    }

    #[test]
    fn registered_name_is_trimmed() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let _ = a.register("  alice  ");
        assert_eq!(reg.names(), vec!["alice"]);
    }

    #[test]
    fn close_announces_left_to_others() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let mut c = Peer::new("c", &reg);
        let _ = a.register("alice");
        let _ = b.register("bob");
        let _ = c.register("carol");
        let _ = (a.drain(), b.drain(), c.drain());

        b.dispatcher.on_close();

        let left = json!({"type": "left", "message": "bob"});
        assert_eq!(a.drain(), vec![left.clone()]);
        assert_eq!(c.drain(), vec![left]);
        assert!(b.drain().is_empty());
        assert_eq!(reg.names(), vec!["alice", "carol"]);
        assert_eq!(b.dispatcher.state(), &DispatchState::Closed);

        let mut d = Peer::new("d", &reg);
        let _ = d.register("dave");
        assert_eq!(
            d.drain()[1],
            json!({"type": "online", "message": {"users": ["alice", "carol", "dave"]}})
        );
    }

    #[test]
    fn close_before_registering_sends_nothing() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let _ = a.register("alice");
        let _ = a.drain();

        b.dispatcher.on_close();
        assert!(a.drain().is_empty());
        assert_eq!(reg.names(), vec!["alice"]);
    }

    #[test]
    fn closed_dispatcher_ignores_events() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let _ = a.register("alice");
        let _ = b.register("bob");
        let _ = (a.drain(), b.drain());

        b.dispatcher.on_close();
        b.dispatcher.on_close();
        assert_eq!(a.drain().len(), 1);

        assert_eq!(b.register("bob"), Outcome::Ignored);
        assert_eq!(b.dispatcher.on_text("hello"), Outcome::Ignored);
        assert!(a.drain().is_empty());
        assert!(reg.find(&"b".into()).is_none());
    }

    #[test]
    fn binary_and_ping_route_nothing() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let _ = a.register("alice");
        let _ = b.register("bob");
        let _ = (a.drain(), b.drain());

        a.dispatcher.on_binary(128);
        a.dispatcher.on_ping();
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
    }

    #[test]
    fn duplicate_names_are_distinct_participants() {
        let reg = registry();
        let mut a = Peer::new("a", &reg);
        let mut b = Peer::new("b", &reg);
        let _ = a.register("sam");
        let _ = b.register("sam");
        let _ = (a.drain(), b.drain());

        a.dispatcher.on_close();
        assert_eq!(b.drain(), vec![json!({"type": "left", "message": "sam"})]);
        assert_eq!(reg.len(), 1);
        assert!(reg.find(&"b".into()).is_some());
    }
}

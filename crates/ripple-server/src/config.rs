//! Server configuration.

use std::time::Duration;

use ripple_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server pings, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence tolerated before a connection is closed, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub send_queue_capacity: usize,
    /// Deadline for a single socket write, in milliseconds.
    pub send_timeout_ms: u64,
    /// Lifetime queue-full drops before a client is disconnected.
    pub max_dropped_messages: u64,
    /// Longest accepted display name, in characters.
    pub max_name_chars: usize,
}

impl ServerConfig {
    /// Build the runtime configuration from loaded settings.
    ///
    /// Zero values that would make the server unusable are raised to one.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        let heartbeat_interval_ms = settings.heartbeat_interval_ms.max(1);
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections.max(1),
            heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.heartbeat_timeout_ms.max(heartbeat_interval_ms),
            max_message_size: settings.max_message_size.max(1),
            send_queue_capacity: settings.send_queue_capacity.max(1),
            send_timeout_ms: settings.send_timeout_ms.max(1),
            max_dropped_messages: settings.max_dropped_messages.max(1),
            max_name_chars: settings.max_name_chars.max(1),
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Liveness timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Per-write deadline.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

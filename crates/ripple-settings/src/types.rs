//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial: missing fields get their compiled default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000, "maxConnections": 64 },
///   "logging": { "level": "debug", "moduleLevels": { "tower_http": "warn" } }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RippleSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl Default for RippleSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "ripple".to_string(),
            server: ServerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl RippleSettings {
    /// Reject combinations that would make the relay misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalMs must be positive".into(),
            ));
        }
        if s.heartbeat_timeout_ms < s.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeatTimeoutMs ({}) is shorter than heartbeatIntervalMs ({})",
                s.heartbeat_timeout_ms, s.heartbeat_interval_ms
            )));
        }
        if s.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "sendQueueCapacity must be positive".into(),
            ));
        }
        if s.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConnections must be positive".into(),
            ));
        }
        if s.max_name_chars == 0 {
            return Err(SettingsError::InvalidValue(
                "maxNameChars must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Maximum live WebSocket connections, registered or not.
    pub max_connections: usize,
    /// Interval between server pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is considered dead, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub send_queue_capacity: usize,
    /// Upper bound on a single socket write in milliseconds.
    pub send_timeout_ms: u64,
    /// Lifetime queue overflows tolerated before a client is disconnected.
    pub max_dropped_messages: u64,
    /// Longest display name accepted at registration, in characters.
    pub max_name_chars: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_connections: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 64 * 1024,
            send_queue_capacity: 64,
            send_timeout_ms: 5_000,
            max_dropped_messages: 100,
            max_name_chars: 64,
        }
    }
}

/// Log verbosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Per-frame detail.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a level name (case-insensitive).
    pub fn parse(val: &str) -> Option<Self> {
        match val.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level for every target.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"tower_http": "debug"}`.
    pub module_levels: BTreeMap<String, LogLevel>,
}

impl LoggingSettings {
    /// Build an `EnvFilter` directive string such as `info,tower_http=debug`.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.level.as_filter_str().to_string();
        for (module, level) in &self.module_levels {
            directive.push(',');
            directive.push_str(module);
            directive.push('=');
            directive.push_str(level.as_filter_str());
        }
        directive
    }
}

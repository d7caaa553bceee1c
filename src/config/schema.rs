//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the room relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// WebSocket protocol limits and policies.
    pub websocket: WebSocketConfig,

    /// Shutdown behavior.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:1337").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:1337".to_string(),
            max_connections: 10_000,
        }
    }
}

/// What to do with a frame that breaks the protocol.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ViolationPolicy {
    /// Send a close frame with the violation's status code and disconnect.
    #[default]
    Close,
    /// Discard the offending frame or message and keep the connection.
    Drop,
}

/// WebSocket protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest single frame payload accepted, in bytes.
    pub max_payload_size: usize,

    /// Largest reassembled message accepted, in bytes.
    pub max_message_size: usize,

    /// Largest HTTP request head accepted during the handshake, in bytes.
    pub max_handshake_bytes: usize,

    /// Time allowed for the client to send its request head.
    pub handshake_timeout_secs: u64,

    /// Close connections with no inbound bytes for this long. 0 disables.
    pub idle_timeout_secs: u64,

    /// Frames that may wait in one connection's outbound queue. A member
    /// whose queue is full is evicted as a slow consumer.
    pub max_queued_frames: usize,

    pub violation_policy: ViolationPolicy,
}

impl WebSocketConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 16 * 1024 * 1024,
            max_message_size: 16 * 1024 * 1024,
            max_handshake_bytes: 8 * 1024,
            handshake_timeout_secs: 10,
            idle_timeout_secs: 0,
            max_queued_frames: 1024,
            violation_policy: ViolationPolicy::Close,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long to wait for open connections after the close broadcast.
    pub drain_timeout_secs: u64,
}

impl LifecycleConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { drain_timeout_secs: 5 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

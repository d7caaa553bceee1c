//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::RelayConfig;

/// Largest payload length the frame format can carry (63-bit length field).
const MAX_FRAME_LENGTH: u64 = i64::MAX as u64;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("websocket.max_payload_size exceeds the frame length limit")]
    PayloadTooLarge,

    #[error("observability.log_level: unknown level {0:?}")]
    UnknownLogLevel(String),
}

/// Check a configuration, collecting every error.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }

    let ws = &config.websocket;
    if ws.max_payload_size == 0 {
        errors.push(ValidationError::Zero("websocket.max_payload_size"));
    } else if ws.max_payload_size as u64 > MAX_FRAME_LENGTH {
        errors.push(ValidationError::PayloadTooLarge);
    }
    if ws.max_message_size == 0 {
        errors.push(ValidationError::Zero("websocket.max_message_size"));
    }
    if ws.max_handshake_bytes == 0 {
        errors.push(ValidationError::Zero("websocket.max_handshake_bytes"));
    }
    if ws.max_queued_frames == 0 {
        errors.push(ValidationError::Zero("websocket.max_queued_frames"));
    }
    if ws.handshake_timeout_secs == 0 {
        errors.push(ValidationError::Zero("websocket.handshake_timeout_secs"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(obs.log_level.clone()));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: obs.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&RelayConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = RelayConfig::default();
        config.listener.bind_address = "not an address".into();
        config.listener.max_connections = 0;
        config.websocket.max_message_size = 0;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidAddress {
                    field: "listener.bind_address",
                    value: "not an address".into(),
                },
                ValidationError::Zero("listener.max_connections"),
                ValidationError::Zero("websocket.max_message_size"),
                ValidationError::UnknownLogLevel("loud".into()),
            ]
        );
    }

    #[test]
    fn empty_outbound_queue_is_rejected() {
        let mut config = RelayConfig::default();
        config.websocket.max_queued_frames = 0;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::Zero("websocket.max_queued_frames")])
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = RelayConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(validate_config(&config).unwrap_err().len(), 1);
    }
}

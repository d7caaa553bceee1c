//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Apply command-line overrides
//! - Bind the listener before any traffic is accepted
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - No config file means all defaults

use std::path::Path;

use crate::config::{load_config, validate_config, ConfigError, RelayConfig};
use crate::net::listener::{Listener, ListenerError};

/// Build the effective configuration from an optional file and bind override.
pub fn resolve_config(
    path: Option<&Path>,
    bind_override: Option<&str>,
) -> Result<RelayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = bind_override {
        config.listener.bind_address = bind.to_string();
        validate_config(&config).map_err(ConfigError::Validation)?;
    }
    Ok(config)
}

/// Bind the configured address.
pub async fn bind(config: &RelayConfig) -> Result<Listener, ListenerError> {
    Listener::bind(&config.listener).await
}

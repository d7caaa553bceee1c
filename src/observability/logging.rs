//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Pick the output format and level from configuration
//!
//! # Design Decisions
//! - `RUST_LOG` wins over `observability.log_level` when set
//! - JSON format for production, pretty format for development

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Filter used when `RUST_LOG` is absent.
pub fn default_directive(level: &str) -> String {
    format!("room_relay={}", level.to_ascii_lowercase())
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    let (json, pretty) = match config.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer())),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init();
}

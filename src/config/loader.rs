//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<RelayConfig, ConfigError> {
    let config: RelayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config = parse_config(
            r#"
            [listener]
            bind_address = "127.0.0.1:4000"
            max_connections = 64

            [websocket]
            max_payload_size = 1024
            handshake_timeout_secs = 2

            [lifecycle]
            drain_timeout_secs = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:4000");
        assert_eq!(config.listener.max_connections, 64);
        assert_eq!(config.websocket.max_payload_size, 1024);
        assert_eq!(config.lifecycle.drain_timeout_secs, 1);
    }

    #[test]
    fn reports_parse_errors() {
        let err = parse_config("[listener\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn reports_validation_errors() {
        let err = parse_config("[listener]\nmax_connections = 0\n").unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_config("[listener]\nmax_connections = 0\n")
            .unwrap_err()
            .to_string()
            .contains("listener.max_connections"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

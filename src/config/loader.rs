//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::SdkConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<SdkConfig, ConfigError> {
    let config: SdkConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<SdkConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/gateway-nonce.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("[nonce]\nprocessing_time_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_error_display() {
        let err = parse_config("[gateway]\nrpc_timeout_secs = 0\nnonce_method = \"\"").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Validation failed: "));
        assert!(msg.contains("gateway.rpc_timeout_secs"));
        assert!(msg.contains(", gateway.nonce_method"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("gateway-nonce-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[gateway]\nrpc_url = \"http://127.0.0.1:9000\"\n\n[store]\nsnapshot_path = \"nonces.json\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.gateway.rpc_url, "http://127.0.0.1:9000");
        assert_eq!(config.store.snapshot_path.as_deref(), Some("nonces.json"));

        std::fs::remove_file(&path).unwrap_or_default();
    }
}

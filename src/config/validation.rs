//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timings > 0, poll shorter than processing window)
//! - Check gateway URLs parse
//!
//! Returns every error found, not just the first.

use std::fmt;

use url::Url;

use crate::config::schema::SdkConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &SdkConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if Url::parse(&config.gateway.rpc_url).is_err() {
        errors.push(ValidationError::new(
            "gateway.rpc_url",
            format!("'{}' is not a valid URL", config.gateway.rpc_url),
        ));
    }
    for (i, url) in config.gateway.failover_urls.iter().enumerate() {
        if Url::parse(url).is_err() {
            errors.push(ValidationError::new(
                &format!("gateway.failover_urls[{}]", i),
                format!("'{}' is not a valid URL", url),
            ));
        }
    }
    if config.gateway.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("gateway.rpc_timeout_secs", "must be greater than 0"));
    }
    if config.gateway.nonce_method.trim().is_empty() {
        errors.push(ValidationError::new("gateway.nonce_method", "must not be empty"));
    }

    if config.nonce.processing_time_ms == 0 {
        errors.push(ValidationError::new("nonce.processing_time_ms", "must be greater than 0"));
    }
    if config.nonce.lock_poll_interval_ms == 0 {
        errors.push(ValidationError::new("nonce.lock_poll_interval_ms", "must be greater than 0"));
    } else if config.nonce.lock_poll_interval_ms >= config.nonce.processing_time_ms {
        errors.push(ValidationError::new(
            "nonce.lock_poll_interval_ms",
            "must be shorter than nonce.processing_time_ms",
        ));
    }

    if let Some(path) = &config.store.snapshot_path {
        if path.trim().is_empty() {
            errors.push(ValidationError::new("store.snapshot_path", "must not be empty when set"));
        }
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
    fn test_default_config_is_valid() {
        assert!(validate_config(&SdkConfig::default()).is_ok());
    }

    #[test]
    fn test_all_errors_reported() {
        let mut config = SdkConfig::default();
        config.gateway.rpc_url = "nope".to_string();
        config.gateway.rpc_timeout_secs = 0;
        config.nonce.processing_time_ms = 100;
        config.nonce.lock_poll_interval_ms = 100;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "gateway.rpc_url",
                "gateway.rpc_timeout_secs",
                "nonce.lock_poll_interval_ms"
            ]
        );
    }

    #[test]
    fn test_zero_timings_rejected() {
        let mut config = SdkConfig::default();
        config.nonce.processing_time_ms = 0;
        config.nonce.lock_poll_interval_ms = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().starts_with("nonce.processing_time_ms"));
    }
}

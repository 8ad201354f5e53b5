use std::time::Duration;

use crate::error::ConfigError;
use crate::throttle_config::ThrottleConfig;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the tracker API base URL
    pub fn validate_api_url(url: &str) -> Result<(), ConfigError> {
        if url.is_empty() {
            return Err(ConfigError::Validation(
                "API URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "API URL must start with 'http://' or 'https://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates throttle parameters
    pub fn validate_throttle(config: &ThrottleConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::Validation)
    }

    /// Validates the per-request HTTP timeout
    pub fn validate_request_timeout(timeout: Duration) -> Result<(), ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::Validation(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates log level name
    pub fn validate_log_level(level: &str) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, valid_levels
            )));
        }

        Ok(())
    }
}

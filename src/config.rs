use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::config_validator::ConfigValidator;
use crate::error::ConfigError;
use crate::throttle_config::{ThrottleConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_SOFT_LIMIT_RATIO};

pub const DEFAULT_API_URL: &str = "https://api.tracker.example.com/v1";
pub const DEFAULT_REQUESTS_PER_HOUR: u32 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the tracker REST API
    pub api_url: String,

    /// API token; only required for commands that reach the tracker
    #[serde(skip_serializing)]
    pub api_token: Option<String>,

    /// Outbound request throttle settings
    pub throttle: ThrottleConfig,

    /// Per-request HTTP timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Log level used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            throttle: ThrottleConfig::new(DEFAULT_REQUESTS_PER_HOUR),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Values are parsed but not validated; call [`validate`](Self::validate)
    /// once command-line overrides have been applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let requests_per_hour =
            parse_var(&lookup, "TRACKER_REQUESTS_PER_HOUR")?.unwrap_or(DEFAULT_REQUESTS_PER_HOUR);
        let soft_limit_ratio =
            parse_var(&lookup, "TRACKER_SOFT_LIMIT_RATIO")?.unwrap_or(DEFAULT_SOFT_LIMIT_RATIO);
        let queue_capacity =
            parse_var(&lookup, "TRACKER_QUEUE_CAPACITY")?.unwrap_or(DEFAULT_QUEUE_CAPACITY);

        let request_timeout = match non_empty(&lookup, "TRACKER_REQUEST_TIMEOUT") {
            Some(raw) => parse_duration("TRACKER_REQUEST_TIMEOUT", &raw)?,
            None => defaults.request_timeout,
        };

        let config = Config {
            api_url: non_empty(&lookup, "TRACKER_API_URL").unwrap_or(defaults.api_url),
            api_token: non_empty(&lookup, "TRACKER_API_TOKEN"),
            throttle: ThrottleConfig::new(requests_per_hour)
                .with_soft_limit_ratio(soft_limit_ratio)
                .with_queue_capacity(queue_capacity),
            request_timeout,
            log_level: non_empty(&lookup, "LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigValidator::validate_api_url(&self.api_url)?;
        ConfigValidator::validate_throttle(&self.throttle)?;
        ConfigValidator::validate_request_timeout(self.request_timeout)?;
        ConfigValidator::validate_log_level(&self.log_level)?;
        Ok(())
    }

    /// The API token, or an error naming the variable to set
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.api_token
            .as_deref()
            .ok_or(ConfigError::Missing("TRACKER_API_TOKEN"))
    }
}

fn non_empty<L>(lookup: &L, name: &str) -> Option<String>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<L, T>(lookup: &L, name: &'static str) -> Result<Option<T>, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    non_empty(lookup, name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                name,
                reason: format!("'{}': {}", raw, e),
            })
        })
        .transpose()
}

#[derive(Deserialize)]
struct HumanDuration(#[serde(with = "humantime_serde")] Duration);

fn parse_duration(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    serde_json::from_value::<HumanDuration>(serde_json::Value::String(raw.to_string()))
        .map(|HumanDuration(duration)| duration)
        .map_err(|e| ConfigError::Invalid {
            name,
            reason: format!("'{}': {}", raw, e),
        })
}

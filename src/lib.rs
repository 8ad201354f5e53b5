pub mod cli;
pub mod client;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod history;
pub mod integrations;
pub mod metrics;
pub mod models;
pub mod throttle_config;
pub mod throttler;
pub mod tools;
pub mod validation;

pub use client::TrackerClient;
pub use config::Config;
pub use error::{ApiError, ThrottleError, ThrottleResult, ToolError};
pub use metrics::ThrottleMetrics;
pub use throttle_config::ThrottleConfig;
pub use throttler::{RequestThrottle, Ticket};
pub use tools::ToolRegistry;

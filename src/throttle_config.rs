use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Length of the trailing accounting window.
pub const WINDOW: Duration = Duration::from_secs(3600);

pub const DEFAULT_SOFT_LIMIT_RATIO: f64 = 0.9;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Upper bound on `queue_capacity`; well below tokio's channel limit.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Immutable configuration for a request throttle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleConfig {
    /// The provider's hard ceiling per trailing hour
    pub requests_per_hour: u32,
    /// Fraction of the hourly budget after which dispatches are spaced out
    #[serde(default = "default_soft_limit_ratio")]
    pub soft_limit_ratio: f64,
    /// Number of work items the queue holds before submitters wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_soft_limit_ratio() -> f64 {
    DEFAULT_SOFT_LIMIT_RATIO
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ThrottleConfig {
    /// Create a configuration with the default soft limit and queue capacity
    pub fn new(requests_per_hour: u32) -> Self {
        Self {
            requests_per_hour,
            soft_limit_ratio: DEFAULT_SOFT_LIMIT_RATIO,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_soft_limit_ratio(mut self, ratio: f64) -> Self {
        self.soft_limit_ratio = ratio;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Nominal time between two consecutively dispatched calls
    pub fn minimum_spacing(&self) -> Duration {
        if self.requests_per_hour == 0 {
            return WINDOW;
        }
        WINDOW / self.requests_per_hour
    }

    /// Request count at which the soft brake engages
    pub fn soft_limit_threshold(&self) -> f64 {
        self.requests_per_hour as f64 * self.soft_limit_ratio
    }

    /// Whether `requests_in_window` has reached the soft limit
    pub fn is_near_ceiling(&self, requests_in_window: usize) -> bool {
        requests_in_window as f64 >= self.soft_limit_threshold()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_hour == 0 {
            return Err("requests_per_hour must be greater than 0".to_string());
        }
        if !(self.soft_limit_ratio > 0.0 && self.soft_limit_ratio <= 1.0) {
            return Err(format!(
                "soft_limit_ratio must be in (0, 1], got {}",
                self.soft_limit_ratio
            ));
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(format!(
                "queue_capacity must be at most {}, got {}",
                MAX_QUEUE_CAPACITY, self.queue_capacity
            ));
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::history::RequestHistory;
use crate::throttle_config::ThrottleConfig;

/// Point-in-time utilization snapshot of a request throttle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleMetrics {
    pub requests_in_last_hour: u64,
    pub remaining_requests: u64,
    pub average_request_time_ms: u64,
    pub queue_length: usize,
    pub last_request_time: Option<DateTime<Utc>>,
}

impl ThrottleMetrics {
    pub(crate) fn capture(
        config: &ThrottleConfig,
        history: &RequestHistory,
        queue_length: usize,
        now: Instant,
    ) -> Self {
        let requests_in_last_hour = history.count_in_window(now) as u64;

        Self {
            requests_in_last_hour,
            remaining_requests: u64::from(config.requests_per_hour)
                .saturating_sub(requests_in_last_hour),
            average_request_time_ms: history.average_duration_ms(now),
            queue_length,
            last_request_time: history.last_dispatch_at(),
        }
    }

    /// Share of the hourly budget consumed, as a percentage
    pub fn utilization_percent(&self) -> f64 {
        let limit = self.requests_in_last_hour + self.remaining_requests;
        if limit == 0 {
            return 0.0;
        }
        self.requests_in_last_hour as f64 * 100.0 / limit as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::DispatchRecord;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_capture_from_history() {
        let config = ThrottleConfig::new(10);
        let mut history = RequestHistory::new();
        let now = Instant::now();
        let at = Utc::now();

        for ms in [100, 300] {
            history.mark_dispatch(now, at);
            history.record(DispatchRecord {
                started: now,
                started_at: at,
                duration: Duration::from_millis(ms),
            });
        }

        let metrics = ThrottleMetrics::capture(&config, &history, 3, now);
        assert_eq!(metrics.requests_in_last_hour, 2);
        assert_eq!(metrics.remaining_requests, 8);
        assert_eq!(metrics.average_request_time_ms, 200);
        assert_eq!(metrics.queue_length, 3);
        assert_eq!(metrics.last_request_time, Some(at));
        assert_eq!(metrics.utilization_percent(), 20.0);
    }

    #[test]
    fn test_serialized_shape() {
        let metrics = ThrottleMetrics {
            requests_in_last_hour: 5,
            remaining_requests: 95,
            average_request_time_ms: 120,
            queue_length: 0,
            last_request_time: None,
        };

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["requestsInLastHour"], 5);
        assert_eq!(json["remainingRequests"], 95);
        assert_eq!(json["averageRequestTimeMs"], 120);
        assert_eq!(json["queueLength"], 0);
        assert!(json["lastRequestTime"].is_null());
    }

    #[test]
    fn test_last_request_time_is_iso8601() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let metrics = ThrottleMetrics {
            requests_in_last_hour: 1,
            remaining_requests: 0,
            average_request_time_ms: 0,
            queue_length: 0,
            last_request_time: Some(at),
        };

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["lastRequestTime"], "2024-05-01T12:30:00Z");
    }
}

//! Sliding-window dispatch history
//!
//! Keeps one record per dispatched work item for the trailing hour. Start
//! instants and durations live in the same record so they are always pruned
//! together.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::throttle_config::WINDOW;

#[derive(Debug, Clone, Copy)]
pub struct DispatchRecord {
    pub started: Instant,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct RequestHistory {
    records: VecDeque<DispatchRecord>,
    last_dispatch: Option<(Instant, DateTime<Utc>)>,
}

impl RequestHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records that fell out of the window and return how many remain
    pub fn prune(&mut self, now: Instant) -> usize {
        while let Some(front) = self.records.front() {
            if is_expired(front.started, now) {
                self.records.pop_front();
            } else {
                break;
            }
        }
        self.records.len()
    }

    /// Count records inside the window without mutating the history
    pub fn count_in_window(&self, now: Instant) -> usize {
        self.records
            .iter()
            .filter(|record| !is_expired(record.started, now))
            .count()
    }

    /// Mean duration of the in-window dispatches, in whole milliseconds
    pub fn average_duration_ms(&self, now: Instant) -> u64 {
        let (count, total) = self
            .records
            .iter()
            .filter(|record| !is_expired(record.started, now))
            .fold((0u64, Duration::ZERO), |(count, total), record| {
                (count + 1, total + record.duration)
            });

        if count == 0 {
            return 0;
        }
        (total.as_millis() / count as u128) as u64
    }

    /// Mark the start of a dispatch; used for spacing decisions
    pub fn mark_dispatch(&mut self, started: Instant, started_at: DateTime<Utc>) {
        self.last_dispatch = Some((started, started_at));
    }

    /// Time elapsed since the most recently started dispatch
    pub fn since_last_dispatch(&self, now: Instant) -> Option<Duration> {
        self.last_dispatch
            .map(|(started, _)| now.saturating_duration_since(started))
    }

    pub fn last_dispatch_at(&self) -> Option<DateTime<Utc>> {
        self.last_dispatch.map(|(_, at)| at)
    }

    pub fn record(&mut self, record: DispatchRecord) {
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn is_expired(started: Instant, now: Instant) -> bool {
    now.saturating_duration_since(started) >= WINDOW
}

//! Outbound request throttle
//!
//! Every call to the tracker API goes through a [`RequestThrottle`]. Callers
//! enqueue a unit of work and wait for its result; a single scheduler task
//! dispatches queued work strictly in FIFO order, one item at a time, and
//! keeps a trailing one-hour history used for budget accounting. Once the
//! number of dispatches in the window reaches the soft limit, consecutive
//! dispatches are spaced by at least `3600s / requests_per_hour`.

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ThrottleError, ThrottleResult};
use crate::history::{DispatchRecord, RequestHistory};
use crate::metrics::ThrottleMetrics;
use crate::throttle_config::ThrottleConfig;

const QUEUED: u8 = 0;
const DISPATCHED: u8 = 1;
const CANCELLED: u8 = 2;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, Outcome> + Send>;

/// Result of running a job, held back until the dispatch has been recorded
struct Outcome {
    succeeded: bool,
    deliver: Box<dyn FnOnce() + Send>,
}

/// A queued unit of work
struct PendingWork {
    id: Uuid,
    label: String,
    state: Arc<AtomicU8>,
    job: Job,
}

impl PendingWork {
    fn new<F, Fut, T, E>(label: String, work: F) -> (Self, Ticket<T, E>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ThrottleError> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let state = Arc::new(AtomicU8::new(QUEUED));
        let (sender, receiver) = oneshot::channel();

        let job: Job = Box::new(move || {
            async move {
                let result = match AssertUnwindSafe(async move { work().await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => Err(E::from(ThrottleError::WorkPanicked(panic_message(
                        panic.as_ref(),
                    )))),
                };
                let succeeded = result.is_ok();
                Outcome {
                    succeeded,
                    deliver: Box::new(move || {
                        // The caller may have stopped waiting
                        let _ = sender.send(result);
                    }),
                }
            }
            .boxed()
        });

        let ticket = Ticket {
            id,
            label: label.clone(),
            state: Arc::clone(&state),
            receiver,
        };

        (
            Self {
                id,
                label,
                state,
                job,
            },
            ticket,
        )
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to an accepted work item
///
/// Dropping a ticket does not cancel the work; it is still dispatched and
/// counted against the budget.
pub struct Ticket<T, E> {
    id: Uuid,
    label: String,
    state: Arc<AtomicU8>,
    receiver: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Ticket<T, E>
where
    E: From<ThrottleError>,
{
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the scheduler has started running this item
    pub fn is_dispatched(&self) -> bool {
        self.state.load(Ordering::Acquire) == DISPATCHED
    }

    /// Wait until the work has been dispatched and has completed
    pub async fn wait(self) -> Result<T, E> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(ThrottleError::Closed.into()),
        }
    }

    /// Wait at most `timeout` for the work to be dispatched.
    ///
    /// If the deadline passes before dispatch the item is withdrawn from the
    /// queue and `ThrottleError::Timeout` is returned. Work already in flight
    /// at the deadline is waited for, since it consumes budget either way.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<T, E> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ThrottleError::Closed.into()),
            Err(_) => {
                let withdrawn = self
                    .state
                    .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if withdrawn {
                    debug!(id = %self.id, label = %self.label, "Work item withdrawn after timeout");
                    return Err(ThrottleError::Timeout(timeout).into());
                }
                match self.receiver.await {
                    Ok(result) => result,
                    Err(_) => Err(ThrottleError::Closed.into()),
                }
            }
        }
    }
}

struct Shared {
    config: ThrottleConfig,
    history: RwLock<RequestHistory>,
}

impl Shared {
    /// Prune the window and work out how long to hold the next dispatch
    fn soft_limit_delay(&self, now: Instant) -> Option<Duration> {
        let mut history = self.history.write();
        let in_window = history.prune(now);
        if !self.config.is_near_ceiling(in_window) {
            return None;
        }

        let since_last = history.since_last_dispatch(now)?;
        let delay = self.config.minimum_spacing().saturating_sub(since_last);
        (!delay.is_zero()).then_some(delay)
    }
}

/// Serializes outbound calls against an hourly request budget
#[derive(Clone)]
pub struct RequestThrottle {
    shared: Arc<Shared>,
    sender: mpsc::Sender<PendingWork>,
}

impl std::fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestThrottle")
            .field("config", &self.shared.config)
            .field("queue_length", &self.queue_length())
            .finish()
    }
}

impl RequestThrottle {
    /// Create a throttle and start its scheduler on the current tokio runtime
    pub fn new(config: ThrottleConfig) -> ThrottleResult<Self> {
        config.validate().map_err(ThrottleError::Configuration)?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ThrottleError::Configuration(
                "a request throttle must be created inside a tokio runtime".to_string(),
            )
        })?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared {
            config,
            history: RwLock::new(RequestHistory::new()),
        });

        info!(
            requests_per_hour = shared.config.requests_per_hour,
            soft_limit_ratio = shared.config.soft_limit_ratio,
            queue_capacity = shared.config.queue_capacity,
            minimum_spacing_ms = shared.config.minimum_spacing().as_millis() as u64,
            "Starting request throttle"
        );

        runtime.spawn(run_scheduler(Arc::clone(&shared), receiver));

        Ok(Self { shared, sender })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.shared.config
    }

    /// Number of accepted items not yet taken by the scheduler
    pub fn queue_length(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Accept work into the queue, waiting for room if the queue is full
    pub async fn enqueue<F, Fut, T, E>(
        &self,
        label: impl Into<String>,
        work: F,
    ) -> ThrottleResult<Ticket<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ThrottleError> + Send + 'static,
    {
        let (pending, ticket) = PendingWork::new(label.into(), work);
        self.sender
            .send(pending)
            .await
            .map_err(|_| ThrottleError::Closed)?;
        Ok(ticket)
    }

    /// Accept work into the queue or fail immediately if it is full
    pub fn try_enqueue<F, Fut, T, E>(
        &self,
        label: impl Into<String>,
        work: F,
    ) -> ThrottleResult<Ticket<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ThrottleError> + Send + 'static,
    {
        let (pending, ticket) = PendingWork::new(label.into(), work);
        match self.sender.try_send(pending) {
            Ok(()) => Ok(ticket),
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                warn!(label = %rejected.label, "Request throttle saturated");
                Err(ThrottleError::Saturated {
                    capacity: self.shared.config.queue_capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ThrottleError::Closed),
        }
    }

    /// Run `work` through the throttle and return its own result
    pub async fn submit<F, Fut, T, E>(&self, label: impl Into<String>, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ThrottleError> + Send + 'static,
    {
        self.enqueue(label, work).await?.wait().await
    }

    /// Like [`submit`](Self::submit) but fails fast when the queue is full
    pub async fn try_submit<F, Fut, T, E>(&self, label: impl Into<String>, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ThrottleError> + Send + 'static,
    {
        self.try_enqueue(label, work)?.wait().await
    }

    /// Like [`submit`](Self::submit) but gives up if dispatch has not started
    /// within `timeout`
    pub async fn submit_timeout<F, Fut, T, E>(
        &self,
        label: impl Into<String>,
        work: F,
        timeout: Duration,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ThrottleError> + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let ticket = match tokio::time::timeout_at(deadline, self.enqueue(label, work)).await {
            Ok(ticket) => ticket?,
            Err(_) => return Err(ThrottleError::Timeout(timeout).into()),
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        ticket.wait_timeout(remaining).await
    }

    /// Submit `items` in consecutive chunks of at most `batch_size`.
    ///
    /// Items within a chunk are submitted concurrently; the next chunk starts
    /// only after every item of the previous one has completed. Results are
    /// returned in input order. A `batch_size` of zero is treated as one.
    pub async fn batch<I, F, Fut, T, E>(
        &self,
        items: Vec<I>,
        batch_size: usize,
        operation: F,
        label: &str,
    ) -> Vec<Result<T, E>>
    where
        I: Send + 'static,
        F: Fn(I) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ThrottleError> + Send + 'static,
    {
        let chunk_size = batch_size.max(1);
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut items = items.into_iter().enumerate().peekable();
        let mut chunk_index = 0usize;

        while items.peek().is_some() {
            let chunk: Vec<(usize, I)> = items.by_ref().take(chunk_size).collect();
            debug!(
                label,
                chunk = chunk_index,
                size = chunk.len(),
                total,
                "Submitting batch chunk"
            );

            let submissions = chunk.into_iter().map(|(index, item)| {
                let operation = operation.clone();
                self.submit(format!("{label}[{index}]"), move || operation(item))
            });
            results.extend(join_all(submissions).await);
            chunk_index += 1;
        }

        results
    }

    /// Non-blocking utilization snapshot
    pub fn metrics(&self) -> ThrottleMetrics {
        let history = self.shared.history.read();
        ThrottleMetrics::capture(
            &self.shared.config,
            &history,
            self.queue_length(),
            Instant::now(),
        )
    }
}

/// Scheduler loop; exits once every throttle handle has been dropped
async fn run_scheduler(shared: Arc<Shared>, mut receiver: mpsc::Receiver<PendingWork>) {
    while let Some(work) = receiver.recv().await {
        if let Some(delay) = shared.soft_limit_delay(Instant::now()) {
            info!(
                target: "tracker_bridge::throttler",
                label = %work.label,
                delay_ms = delay.as_millis() as u64,
                "Near hourly limit, spacing out dispatch"
            );
            tokio::time::sleep(delay).await;
        }

        if work
            .state
            .compare_exchange(QUEUED, DISPATCHED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(id = %work.id, label = %work.label, "Skipping withdrawn work item");
            continue;
        }

        let started = Instant::now();
        let started_at = Utc::now();
        shared.history.write().mark_dispatch(started, started_at);

        debug!(
            target: "tracker_bridge::throttler",
            id = %work.id,
            label = %work.label,
            "Dispatching work item"
        );

        let outcome = (work.job)().await;
        let duration = started.elapsed();

        shared.history.write().record(DispatchRecord {
            started,
            started_at,
            duration,
        });

        if outcome.succeeded {
            debug!(
                target: "tracker_bridge::throttler",
                id = %work.id,
                label = %work.label,
                duration_ms = duration.as_millis() as u64,
                "Work item completed"
            );
        } else {
            warn!(
                target: "tracker_bridge::throttler",
                id = %work.id,
                label = %work.label,
                duration_ms = duration.as_millis() as u64,
                "Work item failed"
            );
        }

        (outcome.deliver)();
    }

    debug!("Request throttle scheduler stopped");
}

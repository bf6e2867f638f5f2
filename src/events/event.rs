//! # Runtime events emitted by the scheduler, wrappers, dispatcher and lifecycle.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Dispatch events**: actions entering the dispatcher
//! - **Handler events**: what wrappers observed around a handler run
//! - **Error events**: captured exceptions and error-handler bookkeeping
//! - **Task/lifecycle events**: task tree and UI attachment transitions
//!
//! The [`Event`] struct carries additional metadata such as timestamps, action
//! name, masked parameters and elapsed time. Events are the log entries of the
//! framework: subscribers render them (`LogWriter`) or ship them
//! (`LogCollector`).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use sagavisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ActionCompleted)
//!     .with_action("user/load")
//!     .with_params("[1]")
//!     .with_elapsed_ms(12);
//!
//! assert_eq!(ev.kind, EventKind::ActionCompleted);
//! assert_eq!(ev.action.as_deref(), Some("user/load"));
//! assert_eq!(ev.elapsed_ms, Some(12));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::action::Action;
use crate::error::Exception;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `action` (subscriber name), `reason` (panic message)
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `action` (subscriber name), `reason` ("full" / "closed")
    SubscriberOverflow,

    // === Dispatch events ===
    /// An action entered the dispatcher.
    ///
    /// Sets: `action` (action type)
    ActionDispatched,

    // === Handler events ===
    /// A `Log`-wrapped handler settled (success, failure or cancellation).
    ///
    /// Sets: `action`, `params` (masked), `elapsed_ms`, `reason` (failure label, if any)
    ActionCompleted,

    /// A connectivity failure is going to be retried.
    ///
    /// Sets: `action`, `params`, `attempt` (retry number), `delay_ms`, `elapsed_ms`, `reason`
    NetworkRetry,

    /// A connectivity failure was swallowed by `SilentOnNetworkConnectionError`.
    ///
    /// Sets: `action`, `params`, `reason`
    NetworkErrorSilenced,

    /// A `TimeLimit` expired and the inner body was cancelled.
    ///
    /// Sets: `action`, `timeout_ms`
    TimeoutHit,

    /// A `Mutex`-wrapped handler was skipped because it is already running.
    ///
    /// Sets: `action`
    MutexSkipped,

    // === Error events ===
    /// An exception was captured by the error pipeline.
    ///
    /// Sets: `action` (originating action), `exception`, `reason` (severity),
    /// `info` (context such as `user_received`)
    ExceptionCaptured,

    /// An error action arrived while the error handler was busy.
    ///
    /// Sets: `action` (originating action), `exception`
    ErrorSuppressed,

    /// The user error handler itself failed; the pipeline survived.
    ///
    /// Sets: `reason`
    ErrorHandlerFailed,

    // === Task events ===
    /// A task started.
    ///
    /// Sets: `action` (task name), `task_id`
    TaskStarted,

    /// A task settled with success or failure.
    ///
    /// Sets: `action` (task name), `task_id`, `elapsed_ms`, `reason` (failure label, if any)
    TaskFinished,

    /// A task settled as cancelled, after its cleanup and its subtree.
    ///
    /// Sets: `action` (task name), `task_id`, `elapsed_ms`
    TaskCancelled,

    // === Lifecycle events ===
    /// The enter phase of an attachment finished.
    ///
    /// Sets: `action` (`{module}/@@ENTER`), `params` (route params), `elapsed_ms`
    LifecycleEntered,

    /// An attachment was unmounted.
    ///
    /// Sets: `action` (`{module}/@@DESTROY`), `tick_count`, `elapsed_ms` (staying time)
    LifecycleDestroyed,
}

impl EventKind {
    /// Returns a short stable label (snake_case) for logs and shipped entries.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber_panicked",
            EventKind::SubscriberOverflow => "subscriber_overflow",
            EventKind::ActionDispatched => "action_dispatched",
            EventKind::ActionCompleted => "action_completed",
            EventKind::NetworkRetry => "network_retry",
            EventKind::NetworkErrorSilenced => "network_error_silenced",
            EventKind::TimeoutHit => "timeout_hit",
            EventKind::MutexSkipped => "mutex_skipped",
            EventKind::ExceptionCaptured => "exception_captured",
            EventKind::ErrorSuppressed => "error_suppressed",
            EventKind::ErrorHandlerFailed => "error_handler_failed",
            EventKind::TaskStarted => "task_started",
            EventKind::TaskFinished => "task_finished",
            EventKind::TaskCancelled => "task_cancelled",
            EventKind::LifecycleEntered => "lifecycle_entered",
            EventKind::LifecycleDestroyed => "lifecycle_destroyed",
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Action name (or task/subscriber name), if applicable.
    pub action: Option<Arc<str>>,
    /// Task id, for scheduler events.
    pub task_id: Option<u64>,
    /// Masked handler parameters.
    pub params: Option<Arc<str>>,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: Option<u64>,
    /// Retry delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Time limit in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Attempt/retry number (starting from 1).
    pub attempt: Option<u32>,
    /// Successful tick count of a lifecycle attachment.
    pub tick_count: Option<u64>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Captured exception.
    pub exception: Option<Exception>,
    /// Extra key/value context.
    pub info: Vec<(&'static str, String)>,

    /// Dispatched action (only for `ActionDispatched`).
    pub(crate) dispatched: Option<Action>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            action: None,
            task_id: None,
            params: None,
            elapsed_ms: None,
            delay_ms: None,
            timeout_ms: None,
            attempt: None,
            tick_count: None,
            reason: None,
            exception: None,
            info: Vec::new(),
            dispatched: None,
        }
    }

    #[inline]
    pub fn with_action(mut self, action: impl Into<Arc<str>>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[inline]
    pub fn with_task_id(mut self, id: u64) -> Self {
        self.task_id = Some(id);
        self
    }

    #[inline]
    pub fn with_params(mut self, params: impl Into<Arc<str>>) -> Self {
        self.params = Some(params.into());
        self
    }

    #[inline]
    pub fn with_elapsed_ms(mut self, ms: u64) -> Self {
        self.elapsed_ms = Some(ms);
        self
    }

    /// Attaches an elapsed duration (stored as milliseconds).
    #[inline]
    pub fn with_elapsed(self, d: Duration) -> Self {
        self.with_elapsed_ms(millis(d))
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(millis(d));
        self
    }

    /// Attaches a time limit (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(millis(d));
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_tick_count(mut self, n: u64) -> Self {
        self.tick_count = Some(n);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_exception(mut self, exception: Exception) -> Self {
        self.exception = Some(exception);
        self
    }

    #[inline]
    pub fn with_info(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.info.push((key, value.into()));
        self
    }

    /// Looks up an `info` value by key.
    pub fn info(&self, key: &str) -> Option<&str> {
        self.info
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Creates the event published for every dispatched action.
    pub(crate) fn dispatched(action: &Action) -> Self {
        let mut ev = Event::new(EventKind::ActionDispatched).with_action(action.action_type());
        ev.dispatched = Some(action.clone());
        ev
    }

    /// Returns the dispatched action carried by `ActionDispatched`.
    pub fn dispatched_action(&self) -> Option<&Action> {
        self.dispatched.as_ref()
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_action(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_action(subscriber)
            .with_reason(info)
    }

    /// True for events that should be rendered at warning level or above.
    pub fn is_problem(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberPanicked
                | EventKind::SubscriberOverflow
                | EventKind::NetworkRetry
                | EventKind::NetworkErrorSilenced
                | EventKind::TimeoutHit
                | EventKind::ExceptionCaptured
                | EventKind::ErrorSuppressed
                | EventKind::ErrorHandlerFailed
        )
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::TaskStarted);
        let b = Event::new(EventKind::TaskStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn info_lookup() {
        let ev = Event::new(EventKind::ExceptionCaptured)
            .with_info("user_received", "Skipped")
            .with_timeout(Duration::from_millis(1500));
        assert_eq!(ev.info("user_received"), Some("Skipped"));
        assert_eq!(ev.info("missing"), None);
        assert_eq!(ev.timeout_ms, Some(1500));
        assert!(ev.is_problem());
    }

    #[test]
    fn dispatched_event_carries_action() {
        let ev = Event::dispatched(&Action::empty("user/load"));
        assert_eq!(ev.kind, EventKind::ActionDispatched);
        assert_eq!(
            ev.dispatched_action().map(Action::action_type),
            Some("user/load")
        );
    }
}

//! # LogWriter: renders framework events through `tracing`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  action="user/load" params="[\"42\"]" elapsed_ms=12 action completed
//! WARN  action="user/load" attempt=1 delay_ms=3000 network failure, retrying
//! ERROR action="user/load" kind="api" error="api error (500): boom" exception captured
//! INFO  action="home/@@DESTROY" tick_count=3 elapsed_ms=15000 lifecycle destroyed
//! ```
//!
//! Task and dispatch events are rendered at `debug`/`trace`.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let action = e.action.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ActionDispatched => {
                tracing::trace!(action, "action dispatched");
            }
            EventKind::TaskStarted => {
                tracing::trace!(task = action, id = e.task_id, "task started");
            }
            EventKind::TaskFinished => {
                tracing::debug!(
                    task = action,
                    id = e.task_id,
                    elapsed_ms = e.elapsed_ms,
                    reason,
                    "task finished"
                );
            }
            EventKind::TaskCancelled => {
                tracing::debug!(task = action, id = e.task_id, elapsed_ms = e.elapsed_ms, "task cancelled");
            }
            EventKind::ActionCompleted => {
                let params = e.params.as_deref().unwrap_or("");
                if reason.is_empty() {
                    tracing::info!(action, params, elapsed_ms = e.elapsed_ms, "action completed");
                } else {
                    tracing::warn!(action, params, elapsed_ms = e.elapsed_ms, reason, "action failed");
                }
            }
            EventKind::NetworkRetry => {
                tracing::warn!(
                    action,
                    attempt = e.attempt,
                    delay_ms = e.delay_ms,
                    elapsed_ms = e.elapsed_ms,
                    reason,
                    "network failure, retrying"
                );
            }
            EventKind::NetworkErrorSilenced => {
                tracing::warn!(action, reason, "network failure silenced");
            }
            EventKind::TimeoutHit => {
                tracing::warn!(action, timeout_ms = e.timeout_ms, "time limit hit");
            }
            EventKind::MutexSkipped => {
                tracing::info!(action, "skipped, already running");
            }
            EventKind::ExceptionCaptured => {
                let (kind, error) = match &e.exception {
                    Some(ex) => (ex.as_label(), ex.to_string()),
                    None => ("unknown", String::new()),
                };
                let received = e.info("user_received").unwrap_or("");
                if e.exception.as_ref().is_some_and(|ex| ex.is_connectivity()) {
                    tracing::warn!(action, kind, error, received, "exception captured");
                } else {
                    tracing::error!(action, kind, error, received, "exception captured");
                }
            }
            EventKind::ErrorSuppressed => {
                tracing::warn!(action, "error handler busy, error suppressed");
            }
            EventKind::ErrorHandlerFailed => {
                tracing::error!(reason, "error handler failed");
            }
            EventKind::LifecycleEntered => {
                tracing::info!(action, params = e.params.as_deref(), elapsed_ms = e.elapsed_ms, "lifecycle entered");
            }
            EventKind::LifecycleDestroyed => {
                tracing::info!(
                    action,
                    tick_count = e.tick_count,
                    elapsed_ms = e.elapsed_ms,
                    "lifecycle destroyed"
                );
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = action, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(subscriber = action, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

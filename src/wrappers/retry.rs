//! # RetryOnNetworkConnectionError: re-runs a handler until it stops failing
//! on connectivity.
//!
//! ## Flow
//! ```text
//! loop {
//!   ├─► inner body
//!   │     ├─ Ok                    → return Ok
//!   │     ├─ Err(connectivity)     → publish NetworkRetry(attempt, elapsed)
//!   │     │                          cancellable delay(interval), next round
//!   │     └─ Err(other)/Canceled   → return it unchanged
//! }
//! ```
//!
//! ## Rules
//! - Retries are unbounded; only cancellation or a non-connectivity outcome
//!   ends the loop.
//! - The retry counter is per invocation and starts at 1.
//! - Without an explicit interval, `Config::default_retry_interval` applies.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::handler::{HandlerBody, HandlerCall, HandlerMetadata, Wrapper};
use crate::scheduler::BoxTaskFuture;

/// Retries connectivity failures after a fixed pause.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnNetworkConnectionError {
    interval: Option<Duration>,
}

impl RetryOnNetworkConnectionError {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
        }
    }
}

impl Wrapper for RetryOnNetworkConnectionError {
    fn wrap(&self, inner: HandlerBody, meta: &HandlerMetadata) -> HandlerBody {
        let interval = self.interval;
        let action = meta.action_name.clone();
        Arc::new(move |call: HandlerCall| -> BoxTaskFuture<()> {
            let inner = inner.clone();
            let action = action.clone();
            Box::pin(async move {
                let interval = interval.unwrap_or(call.config().default_retry_interval);
                let mut attempt: u32 = 0;
                loop {
                    let round_started = Instant::now();
                    match inner(call.clone()).await {
                        Err(TaskError::Failed(e)) if e.is_connectivity() => {
                            attempt += 1;
                            call.bus().publish(
                                Event::new(EventKind::NetworkRetry)
                                    .with_action(action.clone())
                                    .with_params(call.params.clone())
                                    .with_attempt(attempt)
                                    .with_delay(interval)
                                    .with_elapsed(round_started.elapsed())
                                    .with_reason(format!(
                                        "retry #{attempt} after {interval:?}: {e}"
                                    ))
                                    .with_exception(e),
                            );
                            call.ctx().delay(interval).await?;
                        }
                        other => return other,
                    }
                }
            })
        })
    }
}

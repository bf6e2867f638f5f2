//! # TimeLimit: bounds how long a handler may run.
//!
//! ```text
//! race ─┬─ [0] inner body (joined child, own subtree) ─► Ok
//!       └─ [1] timer(limit)                           ─► TimeoutHit, Err(Timeout)
//! ```
//!
//! The loser is cancelled and settled before the wrapper returns, so the
//! inner body's cleanup has run by the time the timeout is reported.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::handler::{HandlerBody, HandlerCall, HandlerMetadata, Wrapper};
use crate::scheduler::{BoxTaskFuture, Effect, TaskContext};

#[derive(Debug, Clone, Copy)]
pub struct TimeLimit {
    limit: Duration,
}

impl TimeLimit {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

impl Wrapper for TimeLimit {
    fn wrap(&self, inner: HandlerBody, meta: &HandlerMetadata) -> HandlerBody {
        let limit = self.limit;
        let action = meta.action_name.clone();
        Arc::new(move |call: HandlerCall| -> BoxTaskFuture<()> {
            let inner = inner.clone();
            let action = action.clone();
            Box::pin(async move {
                let ctx = call.ctx().clone();
                let body_call = call.clone();
                let body = Effect::new(action.clone(), move |child: TaskContext| {
                    let mut body_call = body_call;
                    body_call.ctx = child;
                    async move { inner(body_call).await.map(|()| true) }
                });
                let timer = Effect::delay(limit, false);

                match ctx.race(vec![body, timer]).await? {
                    (_, true) => Ok(()),
                    (_, false) => {
                        call.bus().publish(
                            Event::new(EventKind::TimeoutHit)
                                .with_action(action)
                                .with_timeout(limit),
                        );
                        Err(TaskError::Timeout { timeout: limit })
                    }
                }
            })
        })
    }
}

//! # Log: records every handler run with its masked parameters and duration.
//!
//! One `ActionCompleted` event is published per run, whatever the outcome.
//! Failed and cancelled runs carry the outcome label in `reason`.

use std::sync::Arc;

use tokio::time::Instant;

use crate::events::{Bus, Event, EventKind};
use crate::handler::{HandlerBody, HandlerCall, HandlerMetadata, Wrapper};
use crate::scheduler::BoxTaskFuture;

/// Logs action name, masked params and elapsed time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Log;

struct Record {
    bus: Bus,
    action: Arc<str>,
    params: Arc<str>,
    started: Instant,
    reason: Option<&'static str>,
}

impl Drop for Record {
    fn drop(&mut self) {
        let mut ev = Event::new(EventKind::ActionCompleted)
            .with_action(self.action.clone())
            .with_params(self.params.clone())
            .with_elapsed(self.started.elapsed());
        if let Some(reason) = self.reason {
            ev = ev.with_reason(reason);
        }
        self.bus.publish(ev);
    }
}

impl Wrapper for Log {
    fn wrap(&self, inner: HandlerBody, meta: &HandlerMetadata) -> HandlerBody {
        let action = meta.action_name.clone();
        Arc::new(move |call: HandlerCall| -> BoxTaskFuture<()> {
            let inner = inner.clone();
            let action = action.clone();
            Box::pin(async move {
                let mut record = Record {
                    bus: call.bus().clone(),
                    action,
                    params: call.params.clone(),
                    started: Instant::now(),
                    reason: Some("task_canceled"),
                };
                let res = inner(call).await;
                record.reason = res.as_ref().err().map(|e| e.as_label());
                res
            })
        })
    }
}

//! # SilentOnNetworkConnectionError: swallows connectivity failures.
//!
//! The failure is reported as `NetworkErrorSilenced` and the run succeeds;
//! every other outcome passes through.

use std::sync::Arc;

use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::handler::{HandlerBody, HandlerCall, HandlerMetadata, Wrapper};
use crate::scheduler::BoxTaskFuture;

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentOnNetworkConnectionError;

impl Wrapper for SilentOnNetworkConnectionError {
    fn wrap(&self, inner: HandlerBody, meta: &HandlerMetadata) -> HandlerBody {
        let action = meta.action_name.clone();
        Arc::new(move |call: HandlerCall| -> BoxTaskFuture<()> {
            let inner = inner.clone();
            let action = action.clone();
            Box::pin(async move {
                match inner(call.clone()).await {
                    Err(TaskError::Failed(e)) if e.is_connectivity() => {
                        call.bus().publish(
                            Event::new(EventKind::NetworkErrorSilenced)
                                .with_action(action)
                                .with_params(call.params.clone())
                                .with_reason(e.to_string())
                                .with_exception(e),
                        );
                        Ok(())
                    }
                    other => other,
                }
            })
        })
    }
}

//! # Loading: marks a loading counter while the handler runs.
//!
//! ```text
//! dispatch Loading(id, show=true)
//!   └─► inner body
//! dispatch Loading(id, show=false)   (always: success, failure or cancellation)
//! ```

use std::sync::Arc;

use crate::action::{Action, GLOBAL_LOADING};
use crate::dispatcher::Dispatcher;
use crate::handler::{HandlerBody, HandlerCall, HandlerMetadata, Wrapper};
use crate::scheduler::BoxTaskFuture;

/// Increments `state.loading[identifier]` for the duration of the handler.
#[derive(Debug, Clone)]
pub struct Loading {
    identifier: Arc<str>,
}

impl Loading {
    pub fn new(identifier: impl Into<Arc<str>>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    /// Uses the `"global"` counter.
    pub fn global() -> Self {
        Self::new(GLOBAL_LOADING)
    }
}

impl Default for Loading {
    fn default() -> Self {
        Self::global()
    }
}

/// Decrements the counter when dropped, including on cancellation.
struct LoadingGuard {
    dispatcher: Dispatcher,
    identifier: Arc<str>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.dispatcher
            .dispatch(Action::loading(self.identifier.clone(), false));
    }
}

impl Wrapper for Loading {
    fn wrap(&self, inner: HandlerBody, _meta: &HandlerMetadata) -> HandlerBody {
        let identifier = self.identifier.clone();
        Arc::new(move |call: HandlerCall| -> BoxTaskFuture<()> {
            let inner = inner.clone();
            let identifier = identifier.clone();
            Box::pin(async move {
                let dispatcher = call.dispatcher().clone();
                dispatcher.dispatch(Action::loading(identifier.clone(), true));
                let _guard = LoadingGuard {
                    dispatcher,
                    identifier,
                };
                inner(call).await
            })
        })
    }
}

//! # Mutex: at most one run of a handler at a time.
//!
//! A run that arrives while another one holds the lock is skipped (it
//! succeeds without running the body) and reported as `MutexSkipped`.
//!
//! The lock belongs to the `Mutex` value: every handler built from the same
//! definition shares it, including registrations under several modules.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::events::{Event, EventKind};
use crate::handler::{HandlerBody, HandlerCall, HandlerMetadata, Wrapper};
use crate::scheduler::BoxTaskFuture;

/// Skip-if-running lock around a handler.
#[derive(Debug, Clone, Default)]
pub struct Mutex {
    locked: Arc<AtomicBool>,
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// Releases the lock when the run ends, including on cancellation.
struct Unlock(Arc<AtomicBool>);

impl Drop for Unlock {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Wrapper for Mutex {
    fn wrap(&self, inner: HandlerBody, meta: &HandlerMetadata) -> HandlerBody {
        let locked = self.locked.clone();
        let action = meta.action_name.clone();
        Arc::new(move |call: HandlerCall| -> BoxTaskFuture<()> {
            let inner = inner.clone();
            let locked = locked.clone();
            let action = action.clone();
            Box::pin(async move {
                if locked
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    call.bus()
                        .publish(Event::new(EventKind::MutexSkipped).with_action(action));
                    return Ok(());
                }
                let _unlock = Unlock(locked);
                inner(call).await
            })
        })
    }
}

//! # Dispatcher: routes actions to handlers and errors to the error listener.
//!
//! ## Flow
//! ```text
//! dispatch(action)
//!   ├─► publish ActionDispatched          (observed by TaskContext::take)
//!   ├─► store.reduce(action)              (SetState / Loading)
//!   └─► match action
//!         ├─ Error   ──► publish ExceptionCaptured(user_received)
//!         │              ├─ listener idle ──► root task "@@framework/error"
//!         │              │                     └─ busy cleared on exit, failures logged
//!         │              └─ listener busy ──► publish ErrorSuppressed
//!         ├─ Handler ──► registry lookup
//!         │              ├─ found   ──► new root task running the handler
//!         │              └─ missing ──► nothing (no task)
//!         └─ other   ──► nothing
//! ```
//!
//! ## Rules
//! - At most one error listener run is in flight at any time; errors that
//!   arrive meanwhile are logged but never queued.
//! - A failing or panicking listener never feeds back into the pipeline.
//! - Root handler failures (other than cancellation) are captured through the
//!   scheduler's failure hook and become error actions.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use futures::FutureExt;

use crate::action::{Action, ERROR_ACTION, Payload};
use crate::config::Config;
use crate::error::{Exception, RuntimeError, TaskError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::handler::{HandlerBody, HandlerCall, HandlerMetadata};
use crate::scheduler::{Scheduler, TaskContext, TaskHandle};
use crate::store::Store;

/// Input of one error listener run.
pub struct ErrorCall {
    pub exception: Exception,
    /// Action whose handler raised the failure, if known.
    pub action_name: Option<Arc<str>>,
    ctx: TaskContext,
    dispatcher: Dispatcher,
}

impl ErrorCall {
    /// Context of the listener task, for effects.
    pub fn ctx(&self) -> &TaskContext {
        &self.ctx
    }

    /// Dispatches another action (e.g. a state update showing the error).
    pub fn put(&self, action: Action) {
        self.dispatcher.dispatch(action);
    }

    pub fn store(&self) -> &Store {
        self.dispatcher.store()
    }
}

/// Application-level error handler.
#[async_trait]
pub trait ErrorListener: Send + Sync + 'static {
    async fn on_error(&self, call: ErrorCall) -> Result<(), TaskError>;
}

struct FnListener<F>(F);

#[async_trait]
impl<F, Fut> ErrorListener for FnListener<F>
where
    F: Fn(ErrorCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn on_error(&self, call: ErrorCall) -> Result<(), TaskError> {
        (self.0)(call).await
    }
}

/// Builds an [`ErrorListener`] out of an async closure.
pub fn error_listener<F, Fut>(f: F) -> impl ErrorListener
where
    F: Fn(ErrorCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    FnListener(f)
}

/// The registered listener plus its busy flag.
struct ErrorSlot {
    listener: Option<Arc<dyn ErrorListener>>,
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag when the listener task ends, however it ends.
struct ClearBusy(Arc<AtomicBool>);

impl Drop for ClearBusy {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
struct Registered {
    body: HandlerBody,
    meta: Arc<HandlerMetadata>,
}

struct Inner {
    config: Config,
    bus: Bus,
    store: Store,
    scheduler: Scheduler,
    handlers: RwLock<HashMap<Arc<str>, Registered>>,
    errors: ErrorSlot,
}

/// Action router. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub(crate) fn new(
        config: Config,
        bus: Bus,
        scheduler: Scheduler,
        listener: Option<Arc<dyn ErrorListener>>,
    ) -> Self {
        let inner = Arc::new(Inner {
            config,
            bus,
            store: Store::new(),
            scheduler,
            handlers: RwLock::new(HashMap::new()),
            errors: ErrorSlot {
                listener,
                busy: Arc::new(AtomicBool::new(false)),
            },
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner
            .scheduler
            .set_failure_hook(Arc::new(move |task: &str, err: TaskError| {
                if let Some(inner) = weak.upgrade() {
                    Dispatcher { inner }.capture(err, Some(Arc::from(task)));
                }
            }));
        Self { inner }
    }

    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// True while the error listener is running.
    pub fn error_listener_busy(&self) -> bool {
        self.inner.errors.busy.load(Ordering::Acquire)
    }

    /// Registers a built handler body under `meta.action_name`.
    pub(crate) fn register(
        &self,
        meta: HandlerMetadata,
        body: HandlerBody,
    ) -> Result<(), RuntimeError> {
        let mut handlers = self.handlers_mut();
        if handlers.contains_key(&meta.action_name) {
            return Err(RuntimeError::AlreadyRegistered {
                action: meta.action_name.clone(),
            });
        }
        handlers.insert(
            meta.action_name.clone(),
            Registered {
                body,
                meta: Arc::new(meta),
            },
        );
        Ok(())
    }

    /// True if at least one of `action_types` is already registered.
    pub(crate) fn any_registered<'a>(
        &self,
        mut action_types: impl Iterator<Item = &'a Arc<str>>,
    ) -> Option<Arc<str>> {
        let handlers = self.handlers();
        action_types.find(|a| handlers.contains_key(*a)).cloned()
    }

    pub fn has_handler(&self, action_type: &str) -> bool {
        self.handlers().contains_key(action_type)
    }

    pub fn metadata(&self, action_type: &str) -> Option<Arc<HandlerMetadata>> {
        self.handlers().get(action_type).map(|r| r.meta.clone())
    }

    /// Dispatches an action.
    ///
    /// Returns the handle of the task started for it: the handler's root task,
    /// or the error listener run. `None` if no task was created.
    pub fn dispatch(&self, action: Action) -> Option<TaskHandle<()>> {
        self.inner.bus.publish(Event::dispatched(&action));
        self.inner.store.reduce(&action);

        match action {
            Action::Error {
                exception,
                action_name,
            } => self.handle_error(exception, action_name),
            Action::Handler {
                action_type,
                payload,
            } => {
                let Some(registered) = self.lookup(&action_type) else {
                    tracing::debug!(action = %action_type, "no handler registered");
                    return None;
                };
                let this = self.clone();
                Some(self.inner.scheduler.run(action_type, move |ctx| {
                    this.invoke(ctx, registered, payload)
                }))
            }
            Action::SetState { .. } | Action::Loading { .. } => None,
        }
    }

    /// Runs the handler of `action_type` inline, in the caller's task.
    ///
    /// Failures other than cancellation are captured into the error pipeline
    /// and `Ok(())` is returned, so the caller can keep going. A missing
    /// handler is a no-op.
    pub async fn execute(
        &self,
        ctx: &TaskContext,
        action_type: &str,
        payload: Payload,
    ) -> Result<(), TaskError> {
        self.execute_as(ctx, action_type, payload, Arc::from(action_type))
            .await
    }

    /// Like [`execute`](Self::execute), capturing failures under `label`
    /// instead of the action type.
    pub(crate) async fn execute_as(
        &self,
        ctx: &TaskContext,
        action_type: &str,
        payload: Payload,
        label: Arc<str>,
    ) -> Result<(), TaskError> {
        let Some(registered) = self.lookup(action_type) else {
            return Ok(());
        };
        match self.invoke(ctx.clone(), registered, payload).await {
            Ok(()) => Ok(()),
            Err(TaskError::Canceled) => Err(TaskError::Canceled),
            Err(err) => {
                self.capture(err, Some(label));
                Ok(())
            }
        }
    }

    /// Normalizes a failure and dispatches it as an error action.
    ///
    /// Cancellation is not a failure and is ignored.
    pub fn capture(&self, err: TaskError, action_name: Option<Arc<str>>) {
        if err.is_canceled() {
            return;
        }
        self.capture_exception(Exception::from(err), action_name);
    }

    pub fn capture_exception(&self, exception: Exception, action_name: Option<Arc<str>>) {
        self.dispatch(Action::error(exception, action_name));
    }

    fn invoke(
        &self,
        ctx: TaskContext,
        registered: Registered,
        payload: Payload,
    ) -> impl Future<Output = Result<(), TaskError>> + Send + 'static + use<> {
        let call = HandlerCall::new(ctx, registered.meta, payload, self.clone());
        (registered.body)(call)
    }

    fn handle_error(
        &self,
        exception: Exception,
        action_name: Option<Arc<str>>,
    ) -> Option<TaskHandle<()>> {
        let slot = &self.inner.errors;
        let listener = slot.listener.clone();
        let acquired = listener.is_some()
            && slot
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

        let mut captured = Event::new(EventKind::ExceptionCaptured)
            .with_reason(exception.severity())
            .with_exception(exception.clone())
            .with_info("user_received", if acquired { "Received" } else { "Skipped" });
        if let Some(action) = &action_name {
            captured = captured.with_action(action.clone());
        }
        self.inner.bus.publish(captured);

        let Some(listener) = listener.filter(|_| acquired) else {
            if slot.listener.is_some() {
                let mut ev = Event::new(EventKind::ErrorSuppressed).with_exception(exception);
                if let Some(action) = action_name {
                    ev = ev.with_action(action);
                }
                self.inner.bus.publish(ev);
            }
            return None;
        };

        // Owned by the body from the start, so a run cancelled before its
        // first poll still releases the slot.
        let clear = ClearBusy(slot.busy.clone());
        let bus = self.inner.bus.clone();
        let dispatcher = self.clone();
        Some(self.inner.scheduler.run(ERROR_ACTION, move |ctx| async move {
            let _clear = clear;
            let call = ErrorCall {
                exception,
                action_name,
                ctx,
                dispatcher,
            };
            let outcome = AssertUnwindSafe(listener.on_error(call))
                .catch_unwind()
                .await;
            let reason = match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(TaskError::Canceled)) => return Err(TaskError::Canceled),
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panic: {}", panic_message(panic.as_ref())),
            };
            bus.publish(Event::new(EventKind::ErrorHandlerFailed).with_reason(reason));
            Ok(())
        }))
    }

    fn lookup(&self, action_type: &str) -> Option<Registered> {
        self.handlers().get(action_type).cloned()
    }

    fn handlers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Arc<str>, Registered>> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Arc<str>, Registered>> {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

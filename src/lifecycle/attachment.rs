//! # Attachment: the lifecycle of one mounted component.
//!
//! ## States
//! ```text
//! Unmounted ──mount──► Entering ──enter done──┬──► Active    (no onTick)
//!                                             └──► Ticking   (onTick loop)
//!        any state ──unmount()──► Destroyed
//! ```
//!
//! ## Lifecycle task tree
//! ```text
//! root "{module}/@@LIFECYCLE"
//!   ├─ fork "{module}/@@APP_STATE"   app status listener (onAppActive / onAppInactive)
//!   └─ body: onEnter(route_params, path) inline
//!            loop { onTick inline; tick_count += 1; delay(interval) }
//! ```
//!
//! ## Rules
//! - Ticks never overlap: the next delay starts only after the tick settled.
//! - A failed enter or tick is captured into the error pipeline; ticking goes on.
//! - `unmount()` dispatches `onDestroy` first, then cancels the whole tree and
//!   waits for it; a pending delay unwinds immediately.
//! - Focus, blur and app status hooks run as their own root tasks and are
//!   ignored once the attachment is destroyed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use super::app_state::{AppStatus, transition};
use crate::action;
use crate::dispatcher::Dispatcher;
use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::module::{ActionCreators, Hook};
use crate::scheduler::{TaskContext, TaskHandle, TaskId};

/// Phase of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Unmounted,
    Entering,
    /// Enter finished and the module has no tick hook.
    Active,
    Ticking,
    Destroyed,
}

/// Navigation data handed to `onEnter`.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    pub route_params: Value,
    pub path: Option<String>,
}

impl MountOptions {
    pub fn new(route_params: Value) -> Self {
        Self {
            route_params,
            path: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Moves to `next` unless already destroyed.
fn advance(state: &watch::Sender<AttachmentState>, next: AttachmentState) {
    state.send_if_modified(|current| {
        if *current == AttachmentState::Destroyed || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// A mounted component bound to a registered module.
///
/// Dropping a mounted attachment cancels its lifecycle tree without
/// running `onDestroy`; call [`Attachment::unmount`] for an orderly exit.
pub struct Attachment {
    creators: ActionCreators,
    dispatcher: Dispatcher,
    state: Arc<watch::Sender<AttachmentState>>,
    tick_count: Arc<AtomicU64>,
    mounted_at: Instant,
    lifecycle: Option<TaskHandle<()>>,
}

impl Attachment {
    pub(crate) fn mount(
        dispatcher: Dispatcher,
        creators: ActionCreators,
        app_status: watch::Receiver<AppStatus>,
        options: MountOptions,
    ) -> Self {
        let (state, _rx) = watch::channel(AttachmentState::Unmounted);
        let state = Arc::new(state);
        let tick_count = Arc::new(AtomicU64::new(0));
        let module: Arc<str> = creators.module().into();

        advance(&state, AttachmentState::Entering);
        let body = LifecycleBody {
            dispatcher: dispatcher.clone(),
            creators: creators.clone(),
            module: module.clone(),
            state: state.clone(),
            tick_count: tick_count.clone(),
            app_status,
            options,
        };
        let lifecycle = dispatcher
            .scheduler()
            .run(format!("{module}/@@LIFECYCLE"), move |ctx| body.run(ctx));

        Self {
            creators,
            dispatcher,
            state,
            tick_count,
            mounted_at: Instant::now(),
            lifecycle: Some(lifecycle),
        }
    }

    pub fn module(&self) -> &str {
        self.creators.module()
    }

    pub fn state(&self) -> AttachmentState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<AttachmentState> {
        self.state.subscribe()
    }

    /// Number of ticks that ran to completion, failed ones included.
    ///
    /// A tick cancelled by unmount is not counted.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Acquire)
    }

    /// Id of the lifecycle root task, while mounted.
    pub fn task_id(&self) -> Option<TaskId> {
        self.lifecycle.as_ref().map(TaskHandle::id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == AttachmentState::Destroyed
    }

    /// The component gained focus: dispatches `onFocus` if declared.
    pub fn focus(&self) -> Option<TaskHandle<()>> {
        self.fire(Hook::Focus)
    }

    /// The component lost focus: dispatches `onBlur` if declared.
    pub fn blur(&self) -> Option<TaskHandle<()>> {
        self.fire(Hook::Blur)
    }

    fn fire(&self, hook: Hook) -> Option<TaskHandle<()>> {
        if self.is_destroyed() {
            return None;
        }
        let action = self.creators.hook(hook, Vec::<Value>::new())?;
        self.dispatcher.dispatch(action)
    }

    /// Unmounts the component.
    ///
    /// Dispatches `onDestroy` (as its own root task, returned here), cancels
    /// the lifecycle tree, waits for it to settle and publishes
    /// `LifecycleDestroyed`. Calling it twice is a no-op.
    pub async fn unmount(&mut self) -> Option<TaskHandle<()>> {
        let lifecycle = self.lifecycle.take()?;

        let destroy = self
            .creators
            .hook(Hook::Destroy, Vec::<Value>::new())
            .and_then(|a| self.dispatcher.dispatch(a));
        advance(&self.state, AttachmentState::Destroyed);

        lifecycle.cancel();
        let _ = lifecycle.join().await;

        let staying = self.mounted_at.elapsed();
        self.dispatcher.bus().publish(
            Event::new(EventKind::LifecycleDestroyed)
                .with_action(format!("{}/@@DESTROY", self.module()))
                .with_tick_count(self.tick_count())
                .with_elapsed(staying)
                .with_info("staying_second", format!("{:.2}", staying.as_secs_f64())),
        );
        destroy
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lifecycle.take() {
            advance(&self.state, AttachmentState::Destroyed);
            lifecycle.cancel();
        }
    }
}

/// State moved into the lifecycle root task.
struct LifecycleBody {
    dispatcher: Dispatcher,
    creators: ActionCreators,
    module: Arc<str>,
    state: Arc<watch::Sender<AttachmentState>>,
    tick_count: Arc<AtomicU64>,
    app_status: watch::Receiver<AppStatus>,
    options: MountOptions,
}

impl LifecycleBody {
    async fn run(self, ctx: TaskContext) -> Result<(), TaskError> {
        let LifecycleBody {
            dispatcher,
            creators,
            module,
            state,
            tick_count,
            app_status,
            options,
        } = self;

        if creators.has_hook(Hook::AppActive) || creators.has_hook(Hook::AppInactive) {
            let listener = AppStatusListener {
                dispatcher: dispatcher.clone(),
                creators: creators.clone(),
                state: state.clone(),
                rx: app_status,
            };
            ctx.fork(format!("{module}/@@APP_STATE"), move |c| listener.run(c));
        }

        let started = Instant::now();
        let params = options.route_params.to_string();
        let mut entered = Event::new(EventKind::LifecycleEntered)
            .with_action(format!("{module}/@@ENTER"))
            .with_params(params);
        if creators.has_hook(Hook::Enter) {
            let path = options.path.map(Value::String).unwrap_or(Value::Null);
            dispatcher
                .execute(
                    &ctx,
                    &action::action_type(&module, Hook::Enter.method()),
                    vec![options.route_params, path].into(),
                )
                .await?;
            entered = entered.with_elapsed(started.elapsed());
        }
        dispatcher.bus().publish(entered);
        ctx.checkpoint()?;

        if !creators.has_hook(Hook::Tick) {
            advance(&state, AttachmentState::Active);
            return Ok(());
        }

        let tick_action = action::action_type(&module, Hook::Tick.method());
        let tick_label: Arc<str> = Arc::from(format!("{module}/@@TICK"));
        let interval = tick_interval(&dispatcher, &tick_action);
        advance(&state, AttachmentState::Ticking);
        loop {
            // failed ticks still count; only cancellation leaves the loop
            dispatcher
                .execute_as(
                    &ctx,
                    &tick_action,
                    Vec::<Value>::new().into(),
                    tick_label.clone(),
                )
                .await?;
            tick_count.fetch_add(1, Ordering::AcqRel);
            ctx.delay(interval).await?;
        }
    }
}

fn tick_interval(dispatcher: &Dispatcher, tick_action: &str) -> Duration {
    dispatcher
        .metadata(tick_action)
        .and_then(|m| m.tick_interval)
        .unwrap_or(dispatcher.config().default_tick_interval)
}

/// Child task turning app status changes into `onAppActive`/`onAppInactive`.
struct AppStatusListener {
    dispatcher: Dispatcher,
    creators: ActionCreators,
    state: Arc<watch::Sender<AttachmentState>>,
    rx: watch::Receiver<AppStatus>,
}

impl AppStatusListener {
    async fn run(mut self, ctx: TaskContext) -> Result<(), TaskError> {
        let mut prev = *self.rx.borrow_and_update();
        loop {
            let rx = &mut self.rx;
            let open = ctx
                .call(async move { Ok::<_, TaskError>(rx.changed().await.is_ok()) })
                .await?;
            if !open {
                return Ok(());
            }
            let next = *self.rx.borrow_and_update();
            let destroyed = *self.state.borrow() == AttachmentState::Destroyed;
            if let Some(hook) = transition(prev, next).filter(|_| !destroyed) {
                if let Some(action) = self.creators.hook(hook, Vec::<Value>::new()) {
                    self.dispatcher.dispatch(action);
                }
            }
            prev = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroyed_is_terminal() {
        let (tx, _rx) = watch::channel(AttachmentState::Entering);
        advance(&tx, AttachmentState::Destroyed);
        advance(&tx, AttachmentState::Ticking);
        assert_eq!(*tx.borrow(), AttachmentState::Destroyed);
    }

    #[test]
    fn mount_options_builder() {
        let o = MountOptions::new(serde_json::json!({"id": 1})).with_path("/a");
        assert_eq!(o.path.as_deref(), Some("/a"));
    }
}

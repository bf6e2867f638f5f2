//! # App: the single runtime context.
//!
//! The [`App`] owns the event bus, the scheduler, the dispatcher (with the
//! store and the error slot), the [`SubscriberSet`] and the registered
//! modules. It registers modules, mounts attachments, routes app status
//! changes and ships collected logs.
//!
//! ## High-level architecture
//! ```text
//! App::builder(cfg).with_subscribers(..).with_error_listener(..).with_log_sink(..).build()
//!
//! register(Module) ──► Dispatcher registry + SetState(initial) + onRegister
//! attach(name, opts) ──► Attachment (lifecycle root task)
//! dispatch(Action) ──► Store::reduce ──► handler root task | error listener
//!
//! Event flow:
//!   scheduler / wrappers / dispatcher / lifecycle
//!        └── publish(Event) ──► Bus ──► App listener ──► SubscriberSet::emit
//!                                                         ├──► [queue S1] ──► worker S1
//!                                                         └──► [queue SN] ──► worker SN
//!
//! Log shipping (with a sink):
//!   every log_flush_interval, or when the app goes inactive:
//!     LogCollector::drain(batch) ──► LogSink::send
//!        ├─ Ok                  → done
//!        ├─ Err(connectivity)   → requeue for the next round
//!        └─ Err(other)          → drop batch, capture exception
//!
//! Shutdown path:
//!   shutdown() ──► Scheduler::shutdown (cancel every root tree)
//!              ──► final flush ──► stop listener/flush loop
//!              ──► SubscriberSet::shutdown (drain queues)
//! ```

mod builder;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use builder::AppBuilder;

use crate::action::Action;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Exception, RuntimeError, TaskError};
use crate::events::Bus;
use crate::lifecycle::{AppStatus, Attachment, MountOptions};
use crate::module::{ActionCreators, Hook, Module};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::store::{State, Store};
use crate::subscribers::{LogCollector, LogSink, SubscriberSet};

/// Action name attached to exceptions raised while shipping logs.
const LOGGER_ACTION: &str = "@@framework/logger";

/// Collector and sink pair of the log flush loop.
type LogShipping = (Arc<LogCollector>, Arc<dyn LogSink>);

/// Runtime context of an application.
pub struct App {
    dispatcher: Dispatcher,
    subs: Arc<SubscriberSet>,
    modules: RwLock<HashMap<Arc<str>, ActionCreators>>,
    app_status: watch::Sender<AppStatus>,
    logs: Option<LogShipping>,
    flush_now: Arc<Notify>,
    background: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl App {
    /// Starts building an app with the given configuration.
    pub fn builder(cfg: Config) -> AppBuilder {
        AppBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        dispatcher: Dispatcher,
        subs: SubscriberSet,
        logs: Option<LogShipping>,
    ) -> Self {
        let (app_status, _rx) = watch::channel(AppStatus::default());
        let mut app = Self {
            dispatcher,
            subs: Arc::new(subs),
            modules: RwLock::new(HashMap::new()),
            app_status,
            logs,
            flush_now: Arc::new(Notify::new()),
            background: CancellationToken::new(),
            workers: Vec::new(),
        };
        let listener = app.subscriber_listener();
        app.workers.push(listener);
        if let Some(flush) = app.flush_loop() {
            app.workers.push(flush);
        }
        app
    }

    /// Subscribes to the bus and forwards events to the subscriber set.
    ///
    /// On shutdown the events already on the bus are still delivered.
    fn subscriber_listener(&self) -> JoinHandle<()> {
        let mut rx = self.dispatcher.bus().subscribe();
        let set = Arc::clone(&self.subs);
        let stop = self.background.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "subscriber listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    _ = stop.cancelled() => break,
                }
            }
            while let Ok(ev) = rx.try_recv() {
                set.emit(&ev);
            }
        })
    }

    fn flush_loop(&self) -> Option<JoinHandle<()>> {
        let (collector, sink) = self.logs.clone()?;
        let period = self.config().flush_interval();
        let batch = self.config().log_batch_size_clamped();
        let dispatcher = self.dispatcher.clone();
        let wake = self.flush_now.clone();
        let stop = self.background.clone();

        Some(tokio::spawn(async move {
            let mut ticker = period.map(|p| {
                let mut t = tokio::time::interval_at(tokio::time::Instant::now() + p, p);
                t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                t
            });
            loop {
                let tick = async {
                    match ticker.as_mut() {
                        Some(t) => {
                            t.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = wake.notified() => {}
                    _ = tick => {}
                }
                ship(&dispatcher, &collector, sink.as_ref(), batch).await;
            }
        }))
    }

    pub fn config(&self) -> &Config {
        self.dispatcher.config()
    }

    pub fn bus(&self) -> &Bus {
        self.dispatcher.bus()
    }

    pub fn store(&self) -> &Store {
        self.dispatcher.store()
    }

    /// Current state snapshot.
    pub fn state(&self) -> Arc<State> {
        self.dispatcher.store().state()
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.dispatcher.scheduler()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Collector feeding the log sink, if one was configured.
    pub fn log_collector(&self) -> Option<&Arc<LogCollector>> {
        self.logs.as_ref().map(|(c, _)| c)
    }

    /// Registers a module's handlers and hooks.
    ///
    /// Registration is all-or-nothing: if the module name or any of its
    /// action types is already taken, or the module declares one action type
    /// twice, nothing is registered. On success the
    /// initial state is installed and `onRegister` is dispatched.
    pub fn register(&self, module: Module) -> Result<ActionCreators, RuntimeError> {
        let mut modules = self
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if modules.contains_key(module.name()) {
            return Err(RuntimeError::AlreadyRegistered {
                action: Arc::from(module.name()),
            });
        }
        let definitions = module.definitions()?;
        if let Some(action) = self
            .dispatcher
            .any_registered(definitions.iter().map(|(meta, _)| &meta.action_name))
        {
            return Err(RuntimeError::AlreadyRegistered { action });
        }
        for (meta, handler) in definitions {
            let body = handler.build(&meta);
            self.dispatcher.register(meta, body)?;
        }

        let creators = ActionCreators::new(&module);
        modules.insert(Arc::from(module.name()), creators.clone());
        drop(modules);

        if let Some(state) = module.initial() {
            self.dispatcher
                .dispatch(Action::set_state(module.name(), state.clone()));
        }
        if let Some(action) = creators.hook(Hook::Register, Vec::<Value>::new()) {
            self.dispatcher.dispatch(action);
        }
        tracing::debug!(module = module.name(), "module registered");
        Ok(creators)
    }

    /// Action creators of a registered module.
    pub fn module(&self, name: &str) -> Option<ActionCreators> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Mounts a component bound to the registered module `name`.
    pub fn attach(&self, name: &str, options: MountOptions) -> Result<Attachment, RuntimeError> {
        let creators = self.module(name).ok_or_else(|| RuntimeError::UnknownModule {
            module: Arc::from(name),
        })?;
        Ok(Attachment::mount(
            self.dispatcher.clone(),
            creators,
            self.app_status.subscribe(),
            options,
        ))
    }

    /// Reports the host's foreground status.
    ///
    /// Attachments observing the change run `onAppActive`/`onAppInactive`;
    /// leaving the foreground also triggers a log flush.
    pub fn set_app_status(&self, status: AppStatus) {
        let prev = self.app_status.send_replace(status);
        if prev == status {
            return;
        }
        tracing::debug!(from = prev.as_label(), to = status.as_label(), "app status changed");
        if prev.is_active() && !status.is_active() && self.logs.is_some() {
            self.flush_now.notify_one();
        }
    }

    pub fn app_status(&self) -> AppStatus {
        *self.app_status.borrow()
    }

    /// Dispatches an action. See [`Dispatcher::dispatch`].
    pub fn dispatch(&self, action: Action) -> Option<TaskHandle<()>> {
        self.dispatcher.dispatch(action)
    }

    /// Sends a failure into the error pipeline.
    ///
    /// Cancellation is not a failure and is ignored.
    pub fn capture_error(&self, err: TaskError, action_name: Option<&str>) {
        self.dispatcher.capture(err, action_name.map(Arc::from));
    }

    /// Sends a component crash into the error pipeline.
    pub fn capture_component_error(
        &self,
        component: &str,
        message: impl Into<String>,
        component_stack: Option<String>,
    ) {
        let exception = Exception::Component {
            message: message.into(),
            component_stack,
        };
        self.dispatcher
            .capture_exception(exception, Some(Arc::from(component)));
    }

    /// Ships one batch of collected logs now.
    ///
    /// Returns the number of entries delivered.
    pub async fn flush_logs(&self) -> usize {
        match &self.logs {
            Some((collector, sink)) => {
                ship(
                    &self.dispatcher,
                    collector,
                    sink.as_ref(),
                    self.config().log_batch_size_clamped(),
                )
                .await
            }
            None => 0,
        }
    }

    /// Cancels every task tree, ships a last batch and stops the subscribers.
    pub async fn shutdown(self) {
        let scheduler = self.dispatcher.scheduler();
        loop {
            scheduler.shutdown();
            if scheduler.live_tasks() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.flush_logs().await;

        self.background.cancel();
        for w in self.workers {
            let _ = w.await;
        }
        match Arc::try_unwrap(self.subs) {
            Ok(subs) => subs.shutdown().await,
            Err(_) => tracing::warn!("subscriber set still shared at shutdown"),
        }
    }
}

/// Drains one batch and hands it to the sink.
async fn ship(
    dispatcher: &Dispatcher,
    collector: &LogCollector,
    sink: &dyn LogSink,
    batch: usize,
) -> usize {
    let entries = collector.drain(batch).await;
    if entries.is_empty() {
        return 0;
    }
    match sink.send(&entries).await {
        Ok(()) => entries.len(),
        Err(e) if e.is_connectivity() => {
            tracing::debug!(entries = entries.len(), error = %e, "log sink unreachable, keeping batch");
            collector.requeue(entries).await;
            0
        }
        Err(e) => {
            tracing::warn!(dropped_logs = entries.len(), error = %e, "log batch dropped");
            dispatcher.capture_exception(e, Some(Arc::from(LOGGER_ACTION)));
            0
        }
    }
}

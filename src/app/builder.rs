use std::sync::Arc;

use crate::config::Config;
use crate::dispatcher::{Dispatcher, ErrorListener};
use crate::events::Bus;
use crate::scheduler::Scheduler;
use crate::subscribers::{LogCollector, LogSink, Subscribe, SubscriberSet};

use super::App;

/// Builder for constructing an [`App`] with optional features.
pub struct AppBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    listener: Option<Arc<dyn ErrorListener>>,
    sink: Option<Arc<dyn LogSink>>,
}

impl AppBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            listener: None,
            sink: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (dispatches, handler outcomes,
    /// captured exceptions, lifecycle) through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Installs the user error handler.
    ///
    /// It runs for every captured exception, at most one run at a time.
    pub fn with_error_listener(mut self, listener: impl ErrorListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Ships collected log entries to `sink` every `Config::log_flush_interval`.
    pub fn with_log_sink(mut self, sink: impl LogSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Builds the app and starts its background tasks.
    ///
    /// Must be called inside a Tokio runtime:
    /// - event bus and scheduler
    /// - dispatcher with the error slot
    /// - subscriber workers and the bus listener
    /// - log collector and flush loop (if a sink was given)
    pub fn build(self) -> App {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let scheduler = Scheduler::new(bus.clone());

        let mut subscribers = self.subscribers;
        let collector = self.sink.as_ref().map(|_| {
            let c = Arc::new(LogCollector::new(self.cfg.log_queue_capacity));
            subscribers.push(c.clone());
            c
        });
        let subs = SubscriberSet::new(subscribers, bus.clone(), self.cfg.log_queue_capacity);

        let dispatcher = Dispatcher::new(self.cfg, bus, scheduler, self.listener);
        let logs = collector.zip(self.sink);
        App::new_internal(dispatcher, subs, logs)
    }
}

//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] shared by every
//! publisher in the application context (scheduler, wrappers, dispatcher,
//! lifecycle attachments).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Receivers (many):
//!   Scheduler  ──┐                     ┌──► App listener ──► SubscriberSet
//!   Wrappers   ──┼──────► Bus ─────────┼──► TaskContext::take (wait-for-dispatch)
//!   Dispatcher ──┤  (broadcast chan)   └──► tests / custom receivers
//!   Lifecycle  ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_only_see_later_events() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::TaskStarted));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::TaskFinished));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::TaskFinished);
        assert!(rx.try_recv().is_err());
    }
}

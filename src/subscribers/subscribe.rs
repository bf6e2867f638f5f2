//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for consuming framework events: log
//! rendering, log shipping, metrics, test probes.
//!
//! ## Architecture
//! ```text
//! SubscriberSet ──► [bounded queue] ──► worker task ──► subscriber.on_event()
//!                                    └─► panic caught → EventKind::SubscriberPanicked
//! ```
//!
//! ## Rules
//! - A slow subscriber only affects its own queue.
//! - Queue overflow drops the event for this subscriber only and publishes
//!   `EventKind::SubscriberOverflow`.
//! - Events are processed sequentially (FIFO) per subscriber.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use sagavisor::{Event, EventKind, Subscribe};
//!
//! struct SlowActions;
//!
//! #[async_trait]
//! impl Subscribe for SlowActions {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::ActionCompleted && ev.elapsed_ms.unwrap_or(0) > 500 {
//!             // report the slow action
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "slow-actions" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Consumer of framework events.
///
/// Implementations should use async I/O, handle their own errors and not
/// panic. Panics are caught and reported but the event is lost.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event, from the subscriber's own worker task.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to at least 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}

//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the scheduler, wrappers, dispatcher
//! and lifecycle attachments.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Scheduler` task runners, wrappers, `Dispatcher`,
//!   lifecycle attachments, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the `App` listener (fans out to `SubscriberSet`) and
//!   `TaskContext::take` (waits for `ActionDispatched`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};

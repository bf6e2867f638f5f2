//! # Event subscribers.
//!
//! Events published on the [`Bus`](crate::events::Bus) are fanned out by the
//! app to every registered [`Subscribe`] implementation through a
//! [`SubscriberSet`].
//!
//! ```text
//!   wrappers / dispatcher / lifecycle / scheduler
//!        └── publish(Event) ──► Bus ──► App listener ──► SubscriberSet
//!                                                          ├──► LogWriter     (tracing)
//!                                                          ├──► LogCollector  (shipped by the flush loop)
//!                                                          └──► custom
//! ```

mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use embedded::{LogCollector, LogEntry, LogResult, LogSink};
pub use set::SubscriberSet;
pub use subscribe::Subscribe;

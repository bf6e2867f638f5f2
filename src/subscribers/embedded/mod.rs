mod collector;
#[cfg(feature = "logging")]
mod log;

pub use collector::{LogCollector, LogEntry, LogResult, LogSink};
#[cfg(feature = "logging")]
pub use log::LogWriter;

//! # LogCollector: buffers log entries for shipping out of process.
//!
//! The collector turns user-facing events (action, error and lifecycle
//! events) into serializable [`LogEntry`] values and keeps them in a bounded
//! in-memory queue. The app's background flush loop drains batches and hands
//! them to a [`LogSink`].
//!
//! ## Rules
//! - Task and dispatch bookkeeping events are not collected.
//! - When the queue is full the **oldest** entry is dropped.
//! - A batch that could not be delivered can be put back with
//!   [`LogCollector::requeue`]; it keeps its original order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::Exception;
use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Outcome recorded on a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogResult {
    Ok,
    Warn,
    Error,
}

/// One shipped log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch.
    pub date: u64,
    pub session_id: Arc<str>,
    pub action: String,
    pub kind: &'static str,
    pub result: LogResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, String>,
}

/// Destination of collected log batches (an event server, a file, ...).
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    /// Delivers one batch.
    ///
    /// A connectivity failure keeps the batch for the next round; any other
    /// failure drops it.
    async fn send(&self, entries: &[LogEntry]) -> Result<(), Exception>;
}

/// Bounded buffer of [`LogEntry`] values fed from the event bus.
pub struct LogCollector {
    session_id: Arc<str>,
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogCollector {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            session_id: generate_session_id(),
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Identifier shared by every entry of this process.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Removes and returns up to `max` of the oldest entries.
    pub async fn drain(&self, max: usize) -> Vec<LogEntry> {
        let mut q = self.entries.lock().await;
        let n = max.min(q.len());
        q.drain(..n).collect()
    }

    /// Puts an undelivered batch back at the front of the queue.
    pub async fn requeue(&self, batch: Vec<LogEntry>) {
        let mut q = self.entries.lock().await;
        for entry in batch.into_iter().rev() {
            if q.len() >= self.capacity {
                break;
            }
            q.push_front(entry);
        }
    }

    async fn push(&self, entry: LogEntry) {
        let mut q = self.entries.lock().await;
        if q.len() >= self.capacity {
            q.pop_front();
        }
        q.push_back(entry);
    }

    fn entry(&self, e: &Event) -> Option<LogEntry> {
        let mut info: BTreeMap<String, String> = e
            .info
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        if let Some(params) = &e.params {
            info.insert("params".into(), params.to_string());
        }

        let (result, error_code, error_message) = match e.kind {
            EventKind::ActionCompleted if e.reason.is_none() => (LogResult::Ok, None, None),
            EventKind::ActionCompleted => (
                LogResult::Warn,
                e.reason.as_deref().map(str::to_string),
                None,
            ),
            EventKind::LifecycleEntered | EventKind::LifecycleDestroyed => {
                if let Some(n) = e.tick_count {
                    info.insert("tick_count".into(), n.to_string());
                }
                (LogResult::Ok, None, None)
            }
            EventKind::NetworkRetry => {
                if let Some(n) = e.attempt {
                    info.insert("attempt".into(), n.to_string());
                }
                (
                    LogResult::Warn,
                    Some("NETWORK_FAILURE_RETRY".into()),
                    e.reason.as_deref().map(str::to_string),
                )
            }
            EventKind::NetworkErrorSilenced => (
                LogResult::Warn,
                Some("NETWORK_FAILURE_SILENCED".into()),
                e.reason.as_deref().map(str::to_string),
            ),
            EventKind::TimeoutHit => (LogResult::Warn, Some("TIMEOUT".into()), None),
            EventKind::ExceptionCaptured => {
                let ex = e.exception.as_ref()?;
                let result = if ex.is_connectivity() {
                    LogResult::Warn
                } else {
                    LogResult::Error
                };
                let code = match ex {
                    Exception::Api {
                        error_code: Some(code),
                        ..
                    } => code.clone(),
                    other => other.as_label().to_uppercase(),
                };
                (result, Some(code), Some(ex.to_string()))
            }
            EventKind::ErrorHandlerFailed => (
                LogResult::Error,
                Some("ERROR_HANDLER_FAILURE".into()),
                e.reason.as_deref().map(str::to_string),
            ),
            _ => return None,
        };

        Some(LogEntry {
            date: e
                .at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            session_id: self.session_id.clone(),
            action: e.action.as_deref().unwrap_or("-").to_string(),
            kind: e.kind.as_label(),
            result,
            elapsed_ms: e.elapsed_ms,
            error_code,
            error_message,
            info,
        })
    }
}

#[async_trait]
impl Subscribe for LogCollector {
    async fn on_event(&self, event: &Event) {
        if let Some(entry) = self.entry(event) {
            self.push(entry).await;
        }
    }

    fn name(&self) -> &'static str {
        "LogCollector"
    }
}

/// Session id: current time in hex, a dash, and a random hex suffix.
fn generate_session_id() -> Arc<str> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: u32 = rand::rng().random_range(1_000..10_000_900);
    Arc::from(format!("{now:x}-{suffix:x}"))
}

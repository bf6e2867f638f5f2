//! # Scheduler: cooperative, cancellable task trees.
//!
//! Handler bodies are plain `async` blocks that receive a [`TaskContext`].
//! Every effect on the context (`call`, `delay`, `spawn`, `fork`, `race`,
//! `all`, `take`) is an explicit suspension point, and every suspension point
//! observes cancellation.
//!
//! ## Architecture
//! ```text
//! Scheduler::run(name, body) ──► TaskTable.insert(root) ──► tokio::spawn(runner::drive)
//!                                      │
//!   TaskContext::fork/spawn/race/all ──┘ insert child under parent, spawn its runner
//!
//! Scheduler::cancel(id)
//!   └─► TaskTable.cancel_subtree(id)     depth-first, children before parent
//!         └─► every runner drops its body (cleanup), waits for its children,
//!             then marks itself Cancelled
//! ```
//!
//! ## Failure routing
//! | Ownership  | On failure                                          |
//! |------------|-----------------------------------------------------|
//! | `Root`     | root-failure hook (error pipeline)                  |
//! | `Attached` | parent body aborted, parent fails with the error    |
//! | `Detached` | root-failure hook                                   |
//! | `Joined`   | delivered to whoever joins it (`race`, `all`, ...)  |
//!
//! Cancellation is never routed anywhere: it is a terminal status, not a failure.

mod context;
mod handle;
mod runner;
mod table;

pub use context::{BoxTaskFuture, Effect, TaskContext};
pub use handle::{TaskHandle, TaskId, TaskStatus};
pub use table::Ownership;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures::future::join_all;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::events::Bus;
use runner::RunParams;
use table::{Node, TaskTable};

/// Callback receiving failures of root and detached tasks.
pub type FailureHook = Arc<dyn Fn(&str, TaskError) + Send + Sync>;

struct Inner {
    table: Mutex<TaskTable>,
    bus: Bus,
    next_id: AtomicU64,
    started: AtomicU64,
    failure_hook: OnceLock<FailureHook>,
}

/// Owner of the task arena. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Creates a scheduler publishing task events to `bus`.
    pub fn new(bus: Bus) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(TaskTable::default()),
                bus,
                next_id: AtomicU64::new(1),
                started: AtomicU64::new(0),
                failure_hook: OnceLock::new(),
            }),
        }
    }

    /// Installs the callback for unhandled root/detached failures.
    ///
    /// Only the first call has an effect.
    pub fn set_failure_hook(&self, hook: FailureHook) {
        let _ = self.inner.failure_hook.set(hook);
    }

    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Starts a new root task.
    ///
    /// ## Example
    /// ```rust
    /// use sagavisor::{Bus, Scheduler, TaskContext, TaskError};
    /// use std::time::Duration;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let scheduler = Scheduler::new(Bus::new(16));
    /// let handle = scheduler.run("answer", |ctx: TaskContext| async move {
    ///     ctx.delay(Duration::from_millis(1)).await?;
    ///     Ok::<_, TaskError>(42)
    /// });
    /// assert_eq!(handle.join().await, Ok(42));
    /// # }
    /// ```
    pub fn run<T, F, Fut>(&self, name: impl Into<Arc<str>>, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.start(None, Ownership::Root, name.into(), f)
    }

    /// Inserts a node and spawns its runner.
    pub(crate) fn start<T, F, Fut>(
        &self,
        parent: Option<TaskId>,
        ownership: Ownership,
        name: Arc<str>,
        f: F,
    ) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        let abort = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(TaskStatus::Running);

        let parent = self.table().insert(
            id,
            Node {
                name: name.clone(),
                parent,
                children: Vec::new(),
                ownership: if parent.is_some() {
                    ownership
                } else {
                    Ownership::Root
                },
                token: token.clone(),
                abort: abort.clone(),
                cancel_requested: false,
                child_failure: None,
                status: status_tx,
            },
        );
        if parent.is_none() && ownership != Ownership::Root {
            tracing::debug!(task = %id, "parent gone; running as root");
        }
        self.inner.started.fetch_add(1, Ordering::Relaxed);

        let ctx = TaskContext::new(self.clone(), id, name.clone(), token.clone());
        let body = f(ctx);
        let (result_tx, result_rx) = oneshot::channel();
        tokio::spawn(runner::drive(
            self.clone(),
            RunParams {
                id,
                name: name.clone(),
                token,
                abort,
            },
            body,
            result_tx,
        ));

        TaskHandle {
            id,
            name,
            status: status_rx,
            result: result_rx,
            scheduler: self.clone(),
        }
    }

    /// Cancels `id` and all of its descendants.
    ///
    /// Pending suspensions unwind immediately; each task runs its cleanup and
    /// waits for its subtree before it is marked cancelled. Cancelling a
    /// finished or unknown task is a no-op.
    pub fn cancel(&self, id: TaskId) {
        self.table().cancel_subtree(id);
    }

    /// Cancels every live root task.
    pub fn shutdown(&self) {
        let mut table = self.table();
        for id in table.roots() {
            table.cancel_subtree(id);
        }
    }

    /// Number of tasks still present in the arena (running, or waiting on children).
    pub fn live_tasks(&self) -> usize {
        self.table().len()
    }

    /// Total number of tasks ever started.
    pub fn started_total(&self) -> u64 {
        self.inner.started.load(Ordering::Relaxed)
    }

    pub(crate) fn cancel_children(&self, id: TaskId) {
        self.table().cancel_children(id);
    }

    /// Waits until every (attached, if `attached_only`) child of `id` is terminal.
    pub(crate) async fn wait_children(&self, id: TaskId, attached_only: bool) {
        loop {
            let pending = self.table().pending_children(id, attached_only);
            if pending.is_empty() {
                return;
            }
            join_all(pending.into_iter().map(|mut rx| async move {
                let _ = rx.wait_for(TaskStatus::is_terminal).await;
            }))
            .await;
        }
    }

    pub(crate) fn child_failure(&self, id: TaskId) -> TaskError {
        self.table()
            .take_child_failure(id)
            .unwrap_or_else(|| TaskError::runtime("attached child failed"))
    }

    /// Sets the terminal status, routes an unhandled failure and reaps the node.
    pub(crate) fn finish(&self, id: TaskId, status: TaskStatus, failure: Option<TaskError>) {
        let unhandled = {
            let mut table = self.table();
            let Some(node) = table.get(id) else {
                return;
            };
            node.status.send_replace(status);
            let (name, ownership, parent) = (node.name.clone(), node.ownership, node.parent);

            let unhandled = match (failure, ownership, parent) {
                (Some(err), Ownership::Attached, Some(pid)) => {
                    table.report_child_failure(pid, err);
                    None
                }
                (Some(err), Ownership::Root | Ownership::Detached, _) => Some((name, err)),
                _ => None,
            };
            table.reap(id);
            unhandled
        };

        if let Some((name, err)) = unhandled {
            match self.inner.failure_hook.get() {
                Some(hook) => hook(&name, err),
                None => tracing::error!(task = %name, error = %err, "unhandled task failure"),
            }
        }
    }

    fn table(&self) -> MutexGuard<'_, TaskTable> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

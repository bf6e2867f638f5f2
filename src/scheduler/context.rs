//! # Task context: the effects a task body may perform.
//!
//! A [`TaskContext`] is handed to every task body. It knows the task's id and
//! cancellation token, and it is the only way to start child tasks.
//!
//! | Effect     | Behavior                                                         |
//! |------------|------------------------------------------------------------------|
//! | `call`     | awaits a future, unwinding early on cancellation                 |
//! | `delay`    | cancellable sleep                                                |
//! | `spawn`    | detached child, cancelled with this tree, never awaited          |
//! | `fork`     | attached child, awaited before this task completes               |
//! | `race`     | first to settle wins, losers are cancelled and awaited           |
//! | `all`      | every member must succeed, first failure cancels the rest        |
//! | `take`     | waits for the next dispatched action matching a predicate        |
//! | `cancel`   | cancels another task's subtree                                   |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, join_all, select_all};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::handle::{TaskHandle, TaskId};
use super::table::Ownership;
use super::Scheduler;
use crate::action::Action;
use crate::error::TaskError;

/// Boxed task body, as stored by handlers and effects.
pub type BoxTaskFuture<T> = BoxFuture<'static, Result<T, TaskError>>;

/// A deferred task body used by [`TaskContext::race`] and [`TaskContext::all`].
pub struct Effect<T> {
    name: Arc<str>,
    f: Box<dyn FnOnce(TaskContext) -> BoxTaskFuture<T> + Send>,
}

impl<T: Send + 'static> Effect<T> {
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Effect that completes with `value` after `duration`.
    pub fn delay(duration: Duration, value: T) -> Self {
        Self::new("delay", move |ctx: TaskContext| async move {
            ctx.delay(duration).await?;
            Ok(value)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handle given to a running task body.
#[derive(Clone)]
pub struct TaskContext {
    scheduler: Scheduler,
    id: TaskId,
    name: Arc<str>,
    token: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        scheduler: Scheduler,
        id: TaskId,
        name: Arc<str>,
        token: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            id,
            name,
            token,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Token cancelled when this task's subtree is cancelled.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `Err(Canceled)` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Awaits `fut`, unwinding with `Canceled` if this task is cancelled first.
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T, TaskError>
    where
        Fut: Future<Output = Result<T, TaskError>>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TaskError::Canceled),
            res = fut => res,
        }
    }

    /// Cancellable sleep.
    pub async fn delay(&self, duration: Duration) -> Result<(), TaskError> {
        self.call(async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }

    /// Starts a detached child.
    ///
    /// The child is cancelled together with this task's tree but this task
    /// does not wait for it. Its failures go to the root-failure hook.
    pub fn spawn<T, F, Fut>(&self, name: impl Into<Arc<str>>, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.scheduler
            .start(Some(self.id), Ownership::Detached, name.into(), f)
    }

    /// Starts an attached child.
    ///
    /// This task does not complete before the child settles, and a child
    /// failure aborts this task with the same error.
    pub fn fork<T, F, Fut>(&self, name: impl Into<Arc<str>>, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.scheduler
            .start(Some(self.id), Ownership::Attached, name.into(), f)
    }

    /// Cancels another task's subtree.
    pub fn cancel(&self, id: TaskId) {
        self.scheduler.cancel(id);
    }

    /// Runs every effect as a child and settles with the first one to finish.
    ///
    /// Returns the winner's index and value (or error). Losers are cancelled
    /// and fully settled before this returns. An empty race fails.
    pub async fn race<T: Send + 'static>(
        &self,
        effects: Vec<Effect<T>>,
    ) -> Result<(usize, T), TaskError> {
        self.checkpoint()?;
        if effects.is_empty() {
            return Err(TaskError::runtime("race needs at least one effect"));
        }
        let handles = self.start_joined(effects);
        let ids: Vec<TaskId> = handles.iter().map(TaskHandle::id).collect();
        let joins = handles
            .into_iter()
            .enumerate()
            .map(|(i, h)| async move { (i, h.join().await) }.boxed());

        let ((winner, res), _, rest) = select_all(joins).await;
        for (i, id) in ids.iter().enumerate() {
            if i != winner {
                self.scheduler.cancel(*id);
            }
        }
        join_all(rest).await;
        res.map(|v| (winner, v))
    }

    /// Runs every effect as a child and collects the results in order.
    ///
    /// The first failure cancels the remaining members, waits for them and
    /// is returned. An empty `all` succeeds with an empty vector.
    pub async fn all<T: Send + 'static>(&self, effects: Vec<Effect<T>>) -> Result<Vec<T>, TaskError> {
        self.checkpoint()?;
        let n = effects.len();
        let handles = self.start_joined(effects);
        let ids: Vec<TaskId> = handles.iter().map(TaskHandle::id).collect();
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(i, h)| async move { (i, h.join().await) })
            .collect();

        let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
        while let Some((i, res)) = pending.next().await {
            match res {
                Ok(v) => slots[i] = Some(v),
                Err(e) => {
                    for id in &ids {
                        self.scheduler.cancel(*id);
                    }
                    while pending.next().await.is_some() {}
                    return Err(e);
                }
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Waits for the next dispatched action accepted by `predicate`.
    ///
    /// Only actions dispatched after the first poll are observed.
    pub async fn take<P>(&self, mut predicate: P) -> Result<Action, TaskError>
    where
        P: FnMut(&Action) -> bool,
    {
        self.checkpoint()?;
        let mut rx = self.scheduler.bus().subscribe();
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(TaskError::Canceled),
                msg = rx.recv() => match msg {
                    Ok(ev) => {
                        if let Some(action) = ev.dispatched_action() {
                            if predicate(action) {
                                return Ok(action.clone());
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(task = %self.id, skipped, "take lagged behind the bus");
                    }
                    Err(RecvError::Closed) => return Err(TaskError::Canceled),
                },
            }
        }
    }

    /// Waits for the next dispatched action of the given type.
    pub async fn take_type(&self, action_type: &str) -> Result<Action, TaskError> {
        self.take(|a| a.action_type() == action_type).await
    }

    fn start_joined<T: Send + 'static>(&self, effects: Vec<Effect<T>>) -> Vec<TaskHandle<T>> {
        effects
            .into_iter()
            .map(|e| {
                let f = e.f;
                self.scheduler
                    .start(Some(self.id), Ownership::Joined, e.name, f)
            })
            .collect()
    }
}

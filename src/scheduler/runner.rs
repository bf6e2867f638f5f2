//! # Drive a single task from start to its terminal status.
//!
//! ## Flow
//! ```text
//! TaskStarted
//!   └─► body ─┬─ Ok(v) ──► wait attached children ─┬─ all settled  ──► Succeeded(v)
//!             │                                     ├─ child failed  ──► Failed(e)
//!             │                                     └─ cancelled     ──► Cancelled
//!             ├─ Err(e)          ──► Failed(e)
//!             ├─ panic           ──► Failed(Runtime)
//!             ├─ child failed    ──► Failed(child error)   (body dropped)
//!             └─ token cancelled ──► Cancelled             (body dropped)
//!
//! on Failed/Cancelled: cancel remaining children, wait for every child
//! finish: set status, publish TaskFinished/TaskCancelled, route failure, reap
//! ```
//!
//! ## Rules
//! - The body future is dropped **before** children are awaited, so scoped
//!   cleanup (`Drop` guards held by the body) runs first.
//! - The terminal status is set after the whole subtree settled (depth-first).
//! - The join result is delivered after the status is set.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::Scheduler;
use super::handle::{TaskId, TaskStatus};
use crate::error::{Exception, TaskError};
use crate::events::{Event, EventKind};

pub(crate) struct RunParams {
    pub id: TaskId,
    pub name: Arc<str>,
    pub token: CancellationToken,
    pub abort: CancellationToken,
}

pub(crate) async fn drive<T, Fut>(
    scheduler: Scheduler,
    params: RunParams,
    body: Fut,
    result_tx: oneshot::Sender<Result<T, TaskError>>,
) where
    Fut: Future<Output = Result<T, TaskError>> + Send,
{
    let RunParams {
        id,
        name,
        token,
        abort,
    } = params;
    let started = Instant::now();
    scheduler.bus().publish(
        Event::new(EventKind::TaskStarted)
            .with_action(name.clone())
            .with_task_id(id.0),
    );

    let outcome = {
        let body = AssertUnwindSafe(body).catch_unwind();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(TaskError::Canceled),
            _ = abort.cancelled() => Err(scheduler.child_failure(id)),
            res = body => match res {
                Ok(r) => r,
                Err(panic) => Err(TaskError::Failed(Exception::from_panic(panic))),
            },
        }
    };

    let outcome = match outcome {
        Ok(v) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(TaskError::Canceled),
                _ = abort.cancelled() => Err(scheduler.child_failure(id)),
                _ = scheduler.wait_children(id, true) => Ok(v),
            }
        }
        Err(e) => Err(e),
    };

    if outcome.is_err() {
        scheduler.cancel_children(id);
        scheduler.wait_children(id, false).await;
    }

    let status = TaskStatus::of(&outcome);
    let failure = match &outcome {
        Err(e) if status == TaskStatus::Failed => Some(e.clone()),
        _ => None,
    };

    let elapsed = started.elapsed();
    let ev = match status {
        TaskStatus::Cancelled => Event::new(EventKind::TaskCancelled),
        _ => Event::new(EventKind::TaskFinished),
    }
    .with_action(name.clone())
    .with_task_id(id.0)
    .with_elapsed(elapsed);
    let ev = match &failure {
        Some(e) => ev.with_reason(e.as_label()),
        None => ev,
    };
    scheduler.bus().publish(ev);

    scheduler.finish(id, status, failure);
    let _ = result_tx.send(outcome);
}

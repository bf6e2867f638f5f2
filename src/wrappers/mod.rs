//! # Built-in handler wrappers.
//!
//! Wrappers decorate a handler body and are applied in declaration order,
//! the first one outermost:
//!
//! ```text
//! Handler::new(body).wrap(Log).wrap(Loading::global()).wrap(TimeLimit::new(5s))
//!
//! Log ─► Loading ─► TimeLimit ─► body
//! ```
//!
//! | Wrapper                            | Effect                                           |
//! |------------------------------------|--------------------------------------------------|
//! | [`Loading`]                        | loading counter up for the run, down afterwards  |
//! | [`Log`]                            | `ActionCompleted` with masked params and elapsed |
//! | [`Mutex`]                          | skip runs while one is in flight                 |
//! | [`RetryOnNetworkConnectionError`]  | rerun connectivity failures after an interval    |
//! | [`SilentOnNetworkConnectionError`] | swallow connectivity failures                    |
//! | [`TimeLimit`]                      | cancel the body and fail with `Timeout`          |
//!
//! Custom wrappers implement [`Wrapper`](crate::Wrapper) or are built with
//! [`create_wrapper`](crate::create_wrapper).

mod loading;
mod log;
mod mutex;
mod retry;
mod silent;
mod time_limit;

pub use loading::Loading;
pub use log::Log;
pub use mutex::Mutex;
pub use retry::RetryOnNetworkConnectionError;
pub use silent::SilentOnNetworkConnectionError;
pub use time_limit::TimeLimit;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::{Notify, broadcast, oneshot};
    use tokio::time::Instant;

    use super::*;
    use crate::action::Action;
    use crate::config::Config;
    use crate::dispatcher::Dispatcher;
    use crate::error::{Exception, TaskError};
    use crate::events::{Bus, Event, EventKind};
    use crate::handler::{Handler, HandlerCall, HandlerMetadata};
    use crate::scheduler::Scheduler;

    fn dispatcher() -> Dispatcher {
        let config = Config {
            masked_keywords: vec!["password".into()],
            ..Config::default()
        };
        let bus = Bus::new(1024);
        Dispatcher::new(config, bus.clone(), Scheduler::new(bus), None)
    }

    fn register(d: &Dispatcher, name: &str, handler: Handler) {
        let meta = HandlerMetadata {
            action_name: name.into(),
            module: "w".into(),
            is_lifecycle: false,
            tick_interval: None,
        };
        let body = handler.build(&meta);
        d.register(meta, body).unwrap();
    }

    fn drain(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == kind {
                out.push(ev);
            }
        }
        out
    }

    fn offline() -> TaskError {
        TaskError::Failed(Exception::network("offline", "https://api.test/items"))
    }

    #[tokio::test]
    async fn loading_counter_returns_to_previous_value() {
        let d = dispatcher();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let started_tx = Arc::new(std::sync::Mutex::new(Some(started_tx)));
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        register(
            &d,
            "w/load",
            Handler::new(move |_call: HandlerCall| {
                let started_tx = started_tx.clone();
                let gate = gate.clone();
                async move {
                    if let Some(tx) = started_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    gate.notified().await;
                    Ok(())
                }
            })
            .wrap(Loading::new("list")),
        );

        assert_eq!(d.store().state().loading_count("list"), 0);
        let handle = d.dispatch(Action::empty("w/load")).unwrap();
        started_rx.await.unwrap();
        assert_eq!(d.store().state().loading_count("list"), 1);

        release.notify_one();
        handle.join().await.unwrap();
        assert_eq!(d.store().state().loading_count("list"), 0);
    }

    #[tokio::test]
    async fn loading_is_released_on_cancellation() {
        let d = dispatcher();
        register(
            &d,
            "w/hang",
            Handler::new(|call: HandlerCall| async move {
                call.ctx().delay(Duration::from_secs(3600)).await
            })
            .wrap(Loading::global()),
        );
        let handle = d.dispatch(Action::empty("w/hang")).unwrap();
        tokio::task::yield_now().await;
        handle.cancel();
        assert!(matches!(handle.join().await, Err(TaskError::Canceled)));
        assert!(!crate::store::show_global_loading(&d.store().state()));
    }

    #[tokio::test]
    async fn mutex_skips_overlapping_run() {
        let d = dispatcher();
        let mut rx = d.bus().subscribe();
        let runs = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let (r, gate) = (runs.clone(), release.clone());
        register(
            &d,
            "w/save",
            Handler::new(move |_call: HandlerCall| {
                let r = r.clone();
                let gate = gate.clone();
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(())
                }
            })
            .wrap(Mutex::new()),
        );

        let first = d.dispatch(Action::empty("w/save")).unwrap();
        while runs.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = d.dispatch(Action::empty("w/save")).unwrap();
        second.join().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        release.notify_one();
        first.join().await.unwrap();
        assert_eq!(drain(&mut rx, EventKind::MutexSkipped).len(), 1);

        let third = d.dispatch(Action::empty("w/save")).unwrap();
        while runs.load(Ordering::SeqCst) == 1 {
            tokio::task::yield_now().await;
        }
        release.notify_one();
        third.join().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_reruns_connectivity_failures_after_interval() {
        let d = dispatcher();
        let mut rx = d.bus().subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        register(
            &d,
            "w/fetch",
            Handler::new(move |_call: HandlerCall| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(offline())
                    } else {
                        Ok(())
                    }
                }
            })
            .wrap(RetryOnNetworkConnectionError::new(Duration::from_secs(3))),
        );

        let started = Instant::now();
        d.dispatch(Action::empty("w/fetch")).unwrap().join().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(6));

        let retries = drain(&mut rx, EventKind::NetworkRetry);
        let attempts: Vec<_> = retries.iter().filter_map(|e| e.attempt).collect();
        assert_eq!(attempts, [1, 2]);
        assert_eq!(retries[0].delay_ms, Some(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_passes_other_failures_through() {
        let d = dispatcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        register(
            &d,
            "w/bad",
            Handler::new(move |_call: HandlerCall| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(TaskError::runtime("boom")) }
            })
            .wrap(RetryOnNetworkConnectionError::default()),
        );
        let res = d.dispatch(Action::empty("w/bad")).unwrap().join().await;
        assert!(matches!(res, Err(TaskError::Failed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn silent_swallows_connectivity_failure_only() {
        let d = dispatcher();
        let mut rx = d.bus().subscribe();
        register(
            &d,
            "w/ping",
            Handler::new(|_call: HandlerCall| async { Err(offline()) })
                .wrap(SilentOnNetworkConnectionError),
        );
        register(
            &d,
            "w/crash",
            Handler::new(|_call: HandlerCall| async { Err(TaskError::runtime("boom")) })
                .wrap(SilentOnNetworkConnectionError),
        );

        d.dispatch(Action::empty("w/ping")).unwrap().join().await.unwrap();
        assert_eq!(drain(&mut rx, EventKind::NetworkErrorSilenced).len(), 1);

        let res = d.dispatch(Action::empty("w/crash")).unwrap().join().await;
        assert!(matches!(res, Err(TaskError::Failed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn time_limit_cancels_body_and_runs_cleanup() {
        struct Cleanup(Arc<AtomicBool>);
        impl Drop for Cleanup {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let d = dispatcher();
        let mut rx = d.bus().subscribe();
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = cleaned.clone();
        register(
            &d,
            "w/slow",
            Handler::new(move |call: HandlerCall| {
                let flag = flag.clone();
                async move {
                    let _cleanup = Cleanup(flag);
                    call.ctx().delay(Duration::from_millis(200)).await
                }
            })
            .wrap(TimeLimit::new(Duration::from_millis(50))),
        );

        let res = d.dispatch(Action::empty("w/slow")).unwrap().join().await;
        assert!(matches!(
            res,
            Err(TaskError::Timeout { timeout }) if timeout == Duration::from_millis(50)
        ));
        assert!(cleaned.load(Ordering::SeqCst));
        let hits = drain(&mut rx, EventKind::TimeoutHit);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].timeout_ms, Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn time_limit_lets_fast_body_finish() {
        let d = dispatcher();
        register(
            &d,
            "w/fast",
            Handler::new(|call: HandlerCall| async move {
                call.ctx().delay(Duration::from_millis(10)).await
            })
            .wrap(TimeLimit::new(Duration::from_millis(50))),
        );
        d.dispatch(Action::empty("w/fast")).unwrap().join().await.unwrap();
    }

    #[tokio::test]
    async fn log_reports_masked_params_and_outcome() {
        let d = dispatcher();
        let mut rx = d.bus().subscribe();
        register(
            &d,
            "w/login",
            Handler::new(|_call: HandlerCall| async { Ok(()) }).wrap(Log),
        );
        register(
            &d,
            "w/fail",
            Handler::new(|_call: HandlerCall| async { Err(TaskError::runtime("nope")) }).wrap(Log),
        );

        d.dispatch(Action::new(
            "w/login",
            vec![serde_json::json!({"user": "a", "password": "secret"})],
        ))
        .unwrap()
        .join()
        .await
        .unwrap();
        let _ = d.dispatch(Action::empty("w/fail")).unwrap().join().await;

        let done = drain(&mut rx, EventKind::ActionCompleted);
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].action.as_deref(), Some("w/login"));
        assert_eq!(
            done[0].params.as_deref(),
            Some(r#"[{"password":"***","user":"a"}]"#)
        );
        assert!(done[0].reason.is_none());
        assert_eq!(done[1].reason.as_deref(), Some("task_failed"));
    }

    #[tokio::test]
    async fn wrappers_apply_first_declared_outermost() {
        let d = dispatcher();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let tag = |name: &'static str, order: Arc<std::sync::Mutex<Vec<&'static str>>>| {
            crate::handler::create_wrapper(move |call: HandlerCall, next: crate::handler::Next| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(name);
                    next.run(call).await
                }
            })
        };
        register(
            &d,
            "w/ordered",
            Handler::new(|_call: HandlerCall| async { Ok(()) })
                .wrap(tag("outer", order.clone()))
                .wrap(tag("inner", order.clone())),
        );
        d.dispatch(Action::empty("w/ordered")).unwrap().join().await.unwrap();
        assert_eq!(*order.lock().unwrap(), ["outer", "inner"]);
    }
}

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sagavisor::{
    Action, App, Config, Exception, Handler, HandlerCall, Loading, Log, LogEntry, LogResult,
    LogSink, Module, Mutex, RuntimeError, TaskError, show_global_loading, show_loading,
};
use serde_json::json;

#[tokio::test]
async fn registration_installs_state_and_runs_on_register() -> anyhow::Result<()> {
    let app = App::builder(Config::default()).build();
    let registered = Arc::new(AtomicUsize::new(0));
    let r = registered.clone();
    let creators = app.register(
        Module::new("profile")
            .initial_state(json!({ "name": null, "age": 0 }))
            .handler(
                "rename",
                Handler::new(|call: HandlerCall| async move {
                    let name: String = call.arg(0)?;
                    call.set_state(json!({ "name": name }));
                    Ok::<_, TaskError>(())
                }),
            )
            .on_register(Handler::new(move |_call: HandlerCall| {
                r.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })),
    )?;
    assert_eq!(
        app.state().module("profile"),
        Some(&json!({ "name": null, "age": 0 }))
    );

    let rename = creators
        .action("rename", vec![json!("Ada")])
        .expect("declared method");
    app.dispatch(rename).expect("handler task").join().await?;
    assert_eq!(
        app.state().module("profile"),
        Some(&json!({ "name": "Ada", "age": 0 }))
    );

    tokio::task::yield_now().await;
    assert_eq!(registered.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_module_is_rejected_without_side_effects() {
    let app = App::builder(Config::default()).build();
    let ok = Handler::new(|_call: HandlerCall| async { Ok(()) });
    app.register(Module::new("auth").handler("login", ok.clone()))
        .unwrap();

    let err = app
        .register(
            Module::new("auth")
                .initial_state(json!({ "overwritten": true }))
                .handler("logout", ok),
        )
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::AlreadyRegistered {
            action: "auth".into()
        }
    );
    assert!(!app.dispatcher().has_handler("auth/logout"));
    assert!(app.state().module("auth").is_none());
}

#[tokio::test]
async fn unregistered_action_creates_no_task() {
    let app = App::builder(Config::default()).build();
    let before = app.scheduler().started_total();
    assert!(app.dispatch(Action::empty("nobody/home")).is_none());
    assert!(app.dispatch(Action::set_state("m", json!({}))).is_none());
    assert_eq!(app.scheduler().started_total(), before);
}

#[tokio::test(start_paused = true)]
async fn loading_counter_is_restored_after_the_run() {
    let app = App::builder(Config::default()).build();
    app.register(
        Module::new("list").handler(
            "load",
            Handler::new(|call: HandlerCall| async move {
                call.ctx().delay(Duration::from_millis(100)).await
            })
            .wrap(Loading::global())
            .wrap(Loading::new("list")),
        ),
    )
    .unwrap();

    let handle = app.dispatch(Action::empty("list/load")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let state = app.state();
    assert!(show_global_loading(&state));
    assert!(show_loading(&state, "list"));

    handle.join().await.unwrap();
    let state = app.state();
    assert!(!show_global_loading(&state));
    assert_eq!(state.loading_count("list"), 0);
}

#[tokio::test(start_paused = true)]
async fn mutex_drops_the_second_concurrent_run() {
    let app = App::builder(Config::default()).build();
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    app.register(
        Module::new("form").handler(
            "submit",
            Handler::new(move |call: HandlerCall| {
                let r = r.clone();
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    call.ctx().delay(Duration::from_millis(100)).await
                }
            })
            .wrap(Mutex::new()),
        ),
    )
    .unwrap();

    let first = app.dispatch(Action::empty("form/submit")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = app.dispatch(Action::empty("form/submit")).unwrap();
    second.join().await.unwrap();
    first.join().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    app.dispatch(Action::empty("form/submit"))
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn saga_waits_for_a_later_action() {
    let app = App::builder(Config::default()).build();
    app.register(
        Module::new("wizard")
            .initial_state(json!({ "step": 1 }))
            .handler(
                "run",
                Handler::new(|call: HandlerCall| async move {
                    let next = call.ctx().take_type("wizard/next").await?;
                    let step: u64 = serde_json::from_value(next.payload()[0].clone())
                        .map_err(|e| TaskError::runtime(e.to_string()))?;
                    call.set_state(json!({ "step": step }));
                    Ok::<_, TaskError>(())
                }),
            ),
    )
    .unwrap();

    let saga = app.dispatch(Action::empty("wizard/run")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(app.dispatch(Action::new("wizard/next", vec![json!(2)])).is_none());
    saga.join().await.unwrap();
    assert_eq!(app.state().module("wizard"), Some(&json!({ "step": 2 })));
}

#[tokio::test(start_paused = true)]
async fn fork_failure_aborts_parent_and_cancels_siblings() {
    let app = App::builder(Config::default()).build();
    let sibling_cleaned = Arc::new(AtomicBool::new(false));
    let flag = sibling_cleaned.clone();

    struct Cleanup(Arc<AtomicBool>);
    impl Drop for Cleanup {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    app.register(
        Module::new("sync").handler(
            "all",
            Handler::new(move |call: HandlerCall| {
                let flag = flag.clone();
                async move {
                    let ctx = call.ctx();
                    ctx.fork("sync/slow", move |c| async move {
                        let _cleanup = Cleanup(flag);
                        c.delay(Duration::from_secs(60)).await
                    });
                    ctx.fork("sync/broken", |c| async move {
                        c.delay(Duration::from_millis(20)).await?;
                        Err::<(), _>(TaskError::runtime("broken"))
                    });
                    ctx.delay(Duration::from_secs(60)).await
                }
            }),
        ),
    )
    .unwrap();

    let res = app.dispatch(Action::empty("sync/all")).unwrap().join().await;
    assert!(matches!(res, Err(TaskError::Failed(Exception::Runtime { .. }))));
    assert!(sibling_cleaned.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_state_patches_are_not_lost() {
    let app = App::builder(Config::default()).build();
    app.register(Module::new("counters").handler(
        "bump",
        Handler::new(|call: HandlerCall| async move {
            let key: String = call.arg(0)?;
            for i in 0..200 {
                let mut patch = serde_json::Map::new();
                patch.insert(key.clone(), json!(i));
                call.set_state(patch.into());
                if i % 16 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            Ok::<_, TaskError>(())
        }),
    ))
    .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|n| {
            app.dispatch(Action::new("counters/bump", vec![json!(format!("k{n}"))]))
                .unwrap()
        })
        .collect();
    for h in handles {
        h.join().await.unwrap();
    }

    let state = app.state();
    let counters = state.module("counters").expect("patched");
    for n in 0..8 {
        assert_eq!(counters[format!("k{n}")], json!(199), "state: {counters}");
    }
}

#[tokio::test(start_paused = true)]
async fn one_mutex_guards_every_handler_it_decorates() {
    let app = App::builder(Config::default()).build();
    let runs = Arc::new(AtomicUsize::new(0));
    let lock = Mutex::new();
    let slow = |runs: &Arc<AtomicUsize>| {
        let runs = runs.clone();
        Handler::new(move |call: HandlerCall| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                call.ctx().delay(Duration::from_millis(100)).await
            }
        })
    };
    app.register(Module::new("orders").handler("save", slow(&runs).wrap(lock.clone())))
        .unwrap();
    app.register(Module::new("drafts").handler("save", slow(&runs).wrap(lock.clone())))
        .unwrap();

    let first = app.dispatch(Action::empty("orders/save")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(lock.is_locked());
    let other = app.dispatch(Action::empty("drafts/save")).unwrap();
    other.join().await.unwrap();
    first.join().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!lock.is_locked());

    // separate Mutex values do not interfere
    app.register(
        Module::new("notes").handler("save", slow(&runs).wrap(Mutex::new())),
    )
    .unwrap();
    let a = app.dispatch(Action::empty("orders/save")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = app.dispatch(Action::empty("notes/save")).unwrap();
    a.join().await.unwrap();
    b.join().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn module_declaring_one_action_twice_is_rejected_whole() {
    let app = App::builder(Config::default()).build();
    let ok = || Handler::new(|_call: HandlerCall| async { Ok(()) });
    let err = app
        .register(
            Module::new("clock")
                .initial_state(json!({ "t": 0 }))
                .handler("load", ok())
                .handler("onTick", ok())
                .on_tick(ok(), None),
        )
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::AlreadyRegistered {
            action: "clock/onTick".into()
        }
    );
    assert!(!app.dispatcher().has_handler("clock/load"));
    assert!(app.module("clock").is_none());
    assert!(app.state().module("clock").is_none());

    app.register(Module::new("clock").on_tick(ok(), None))
        .expect("name is still free");
}

#[derive(Default)]
struct MemorySink {
    batches: StdMutex<Vec<Vec<LogEntry>>>,
    offline_rounds: AtomicUsize,
}

#[async_trait]
impl LogSink for MemorySink {
    async fn send(&self, entries: &[LogEntry]) -> Result<(), Exception> {
        if self
            .offline_rounds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Exception::network("unreachable", "https://logs.test"));
        }
        self.batches.lock().unwrap().push(entries.to_vec());
        Ok(())
    }
}

struct SharedSink(Arc<MemorySink>);

#[async_trait]
impl LogSink for SharedSink {
    async fn send(&self, entries: &[LogEntry]) -> Result<(), Exception> {
        self.0.send(entries).await
    }
}

#[tokio::test(start_paused = true)]
async fn collected_logs_survive_an_unreachable_sink() {
    let sink = Arc::new(MemorySink {
        offline_rounds: AtomicUsize::new(1),
        ..MemorySink::default()
    });
    let cfg = Config {
        log_flush_interval: Duration::from_secs(1),
        masked_keywords: vec!["token".into()],
        ..Config::default()
    };
    let app = App::builder(cfg)
        .with_log_sink(SharedSink(sink.clone()))
        .build();
    app.register(Module::new("session").handler(
        "refresh",
        Handler::new(|_call: HandlerCall| async { Ok(()) }).wrap(Log),
    ))
    .unwrap();

    app.dispatch(Action::new(
        "session/refresh",
        vec![json!({ "accessToken": "abc" })],
    ))
    .unwrap()
    .join()
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(sink.batches.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let batches = sink.batches.lock().unwrap();
    let entries: Vec<_> = batches.iter().flatten().collect();
    let refresh = entries
        .iter()
        .find(|e| e.action == "session/refresh")
        .expect("handler run shipped");
    assert_eq!(refresh.result, LogResult::Ok);
    assert_eq!(
        refresh.info.get("params").map(String::as_str),
        Some(r#"[{"accessToken":"***"}]"#)
    );
    let session = app.log_collector().unwrap().session_id().to_string();
    assert!(entries.iter().all(|e| *e.session_id == *session));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_running_handlers() {
    let app = App::builder(Config::default()).build();
    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = cleaned.clone();

    struct Cleanup(Arc<AtomicBool>);
    impl Drop for Cleanup {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    app.register(Module::new("upload").handler(
        "start",
        Handler::new(move |call: HandlerCall| {
            let flag = flag.clone();
            async move {
                let _cleanup = Cleanup(flag);
                call.ctx().delay(Duration::from_secs(3600)).await
            }
        }),
    ))
    .unwrap();

    let upload = app.dispatch(Action::empty("upload/start")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let scheduler = app.scheduler().clone();
    app.shutdown().await;

    assert!(cleaned.load(Ordering::SeqCst));
    assert_eq!(upload.join().await, Err(TaskError::Canceled));
    assert_eq!(scheduler.live_tasks(), 0);
}

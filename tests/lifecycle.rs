use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use sagavisor::{
    App, AppStatus, AttachmentState, Config, EventKind, Handler, HandlerCall, Module,
    MountOptions, RuntimeError, TaskError,
};
use serde_json::{Value, json};

type Journal = Arc<StdMutex<Vec<String>>>;

fn note(journal: &Journal, entry: &str) -> Handler {
    let journal = journal.clone();
    let entry = entry.to_string();
    Handler::new(move |_call: HandlerCall| {
        journal.lock().unwrap().push(entry.clone());
        async { Ok::<_, TaskError>(()) }
    })
}

fn counter(n: &Arc<AtomicUsize>) -> Handler {
    let n = n.clone();
    Handler::new(move |_call: HandlerCall| {
        n.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, TaskError>(()) }
    })
}

#[tokio::test(start_paused = true)]
async fn ticks_never_overlap_and_stop_at_unmount() {
    let app = App::builder(Config::default()).build();
    let mut rx = app.bus().subscribe();
    let journal: Journal = Arc::default();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::new(AtomicUsize::new(0));

    let (j, f, m, t) = (
        journal.clone(),
        in_flight.clone(),
        max_in_flight.clone(),
        ticks.clone(),
    );
    let tick = Handler::new(move |call: HandlerCall| {
        let (j, f, m, t) = (j.clone(), f.clone(), m.clone(), t.clone());
        async move {
            let now = f.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            t.fetch_add(1, Ordering::SeqCst);
            j.lock().unwrap().push("tick".into());
            let res = call.ctx().delay(Duration::from_millis(30)).await;
            f.fetch_sub(1, Ordering::SeqCst);
            res
        }
    });
    app.register(
        Module::new("clock")
            .on_tick(tick, Some(Duration::from_millis(100)))
            .on_destroy(note(&journal, "destroy")),
    )
    .unwrap();

    let mut page = app.attach("clock", MountOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(page.state(), AttachmentState::Ticking);
    let destroy = page.unmount().await.expect("onDestroy declared");
    destroy.join().await.unwrap();
    assert_eq!(page.state(), AttachmentState::Destroyed);

    let ran = ticks.load(Ordering::SeqCst);
    assert!((7..=8).contains(&ran), "ticks: {ran}");
    assert_eq!(page.tick_count(), ran as u64);
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), ran);
    assert_eq!(journal.lock().unwrap().last().map(String::as_str), Some("destroy"));

    let mut destroyed = None;
    while let Ok(ev) = rx.try_recv() {
        if ev.kind == EventKind::LifecycleDestroyed {
            destroyed = Some(ev);
        }
    }
    let destroyed = destroyed.expect("LifecycleDestroyed published");
    assert_eq!(destroyed.action.as_deref(), Some("clock/@@DESTROY"));
    assert_eq!(destroyed.tick_count, Some(ran as u64));
    assert_eq!(destroyed.info("staying_second"), Some("1.00"));
}

#[tokio::test(start_paused = true)]
async fn unmount_mid_tick_runs_cleanup_and_does_not_count() {
    struct Cleanup(Arc<AtomicBool>);
    impl Drop for Cleanup {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let app = App::builder(Config::default()).build();
    let cleaned = Arc::new(AtomicBool::new(false));
    let c = cleaned.clone();
    app.register(Module::new("slow").on_tick(
        Handler::new(move |call: HandlerCall| {
            let c = c.clone();
            async move {
                let _cleanup = Cleanup(c);
                call.ctx().delay(Duration::from_millis(500)).await
            }
        }),
        None,
    ))
    .unwrap();

    let mut page = app.attach("slow", MountOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!cleaned.load(Ordering::SeqCst));

    assert!(page.unmount().await.is_none());
    assert!(cleaned.load(Ordering::SeqCst));
    assert_eq!(page.tick_count(), 0);
    assert!(page.unmount().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_ticks_are_captured_counted_and_ticking_continues() {
    let app = App::builder(Config::default()).build();
    let mut rx = app.bus().subscribe();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    app.register(Module::new("flaky").on_tick(
        Handler::new(move |_call: HandlerCall| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TaskError::runtime("first tick failed"))
                } else {
                    Ok(())
                }
            }
        }),
        Some(Duration::from_millis(100)),
    ))
    .unwrap();

    let mut page = app.attach("flaky", MountOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    page.unmount().await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(page.tick_count(), 3);
    let mut captured = 0;
    while let Ok(ev) = rx.try_recv() {
        if ev.kind == EventKind::ExceptionCaptured {
            assert_eq!(ev.action.as_deref(), Some("flaky/@@TICK"));
            captured += 1;
        }
    }
    assert_eq!(captured, 1);
}

#[tokio::test(start_paused = true)]
async fn enter_receives_route_params_and_path() {
    let app = App::builder(Config::default()).build();
    let seen: Arc<StdMutex<Option<(Value, Value)>>> = Arc::default();
    let s = seen.clone();
    app.register(Module::new("detail").on_enter(Handler::new(move |call: HandlerCall| {
        let s = s.clone();
        async move {
            let params: Value = call.arg(0)?;
            let path: Value = call.arg(1)?;
            *s.lock().unwrap() = Some((params, path));
            Ok::<_, TaskError>(())
        }
    })))
    .unwrap();

    let mut state = {
        let page = app
            .attach(
                "detail",
                MountOptions::new(json!({ "id": 42 })).with_path("/detail/42"),
            )
            .unwrap();
        let rx = page.watch_state();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(page.state(), AttachmentState::Active);
        rx
    };
    assert_eq!(
        *seen.lock().unwrap(),
        Some((json!({ "id": 42 }), json!("/detail/42")))
    );
    // dropping the attachment cancels it
    assert_eq!(*state.borrow_and_update(), AttachmentState::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn focus_and_blur_only_fire_when_declared_and_alive() {
    let app = App::builder(Config::default()).build();
    let focused = Arc::new(AtomicUsize::new(0));
    app.register(Module::new("tabs").on_focus(counter(&focused)))
        .unwrap();

    let mut page = app.attach("tabs", MountOptions::default()).unwrap();
    page.focus().expect("onFocus declared").join().await.unwrap();
    assert!(page.blur().is_none());
    assert_eq!(focused.load(Ordering::SeqCst), 1);

    page.unmount().await;
    assert!(page.focus().is_none());
    assert_eq!(focused.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn app_status_crossings_reach_attached_modules() {
    let app = App::builder(Config::default()).build();
    let active = Arc::new(AtomicUsize::new(0));
    let inactive = Arc::new(AtomicUsize::new(0));
    app.register(
        Module::new("player")
            .on_app_active(counter(&active))
            .on_app_inactive(counter(&inactive)),
    )
    .unwrap();

    let mut page = app.attach("player", MountOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    app.set_app_status(AppStatus::Inactive);
    tokio::time::sleep(Duration::from_millis(10)).await;
    app.set_app_status(AppStatus::Background);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(inactive.load(Ordering::SeqCst), 1);
    assert_eq!(active.load(Ordering::SeqCst), 0);

    app.set_app_status(AppStatus::Active);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(active.load(Ordering::SeqCst), 1);

    page.unmount().await;
    app.set_app_status(AppStatus::Inactive);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(inactive.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn attach_requires_a_registered_module() {
    let app = App::builder(Config::default()).build();
    let err = app.attach("ghost", MountOptions::default()).err();
    assert_eq!(
        err,
        Some(RuntimeError::UnknownModule {
            module: "ghost".into()
        })
    );
}

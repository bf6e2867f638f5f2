//! # Example: Checkout page
//!
//! A module with a loading-wrapped handler, a polling tick and a flaky
//! backend. Events are rendered through `tracing`.
//!
//! ```bash
//! SAGAVISOR_LOG=sagavisor=debug cargo run --example checkout_page
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sagavisor::{
    App, Config, ErrorCall, Exception, Handler, HandlerCall, Loading, Log, LogWriter, Module,
    MountOptions, RetryOnNetworkConnectionError, Subscribe, TaskError, TimeLimit, error_listener,
};
use serde_json::json;

/// Fails with a connectivity error on the first two calls.
fn flaky_backend(calls: Arc<AtomicUsize>) -> Handler {
    Handler::new(move |call: HandlerCall| {
        let attempt = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 2 {
                return Err(TaskError::Failed(Exception::network(
                    "connection reset",
                    "https://shop.test/cart",
                )));
            }
            let items: u64 = call.arg(0)?;
            call.set_state(json!({ "items": items, "paid": true }));
            Ok(())
        }
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    sagavisor::logging::init()?;

    let cfg = Config {
        default_retry_interval: Duration::from_millis(200),
        masked_keywords: vec!["card".into()],
        ..Config::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let app = App::builder(cfg)
        .with_subscribers(subs)
        .with_error_listener(error_listener(|call: ErrorCall| async move {
            println!("[listener] {:?}: {}", call.action_name, call.exception);
            Ok(())
        }))
        .build();

    let calls = Arc::new(AtomicUsize::new(0));
    let checkout = Module::new("checkout")
        .initial_state(json!({ "items": 0, "paid": false }))
        .handler(
            "pay",
            flaky_backend(calls.clone())
                .wrap(Log)
                .wrap(Loading::global())
                .wrap(RetryOnNetworkConnectionError::default())
                .wrap(TimeLimit::new(Duration::from_secs(5))),
        )
        .handler(
            "explode",
            Handler::new(|_call: HandlerCall| async {
                Err(TaskError::runtime("card declined"))
            })
            .wrap(Log),
        )
        .on_tick(
            Handler::new(|call: HandlerCall| async move {
                println!("[tick] state = {:?}", call.module_state());
                Ok(())
            }),
            Some(Duration::from_millis(300)),
        );
    let creators = app.register(checkout)?;

    let mut page = app.attach("checkout", MountOptions::new(json!({ "cart": 7 })))?;

    if let Some(pay) = creators.action("pay", vec![json!(3), json!({ "card": "4111" })]) {
        if let Some(handle) = app.dispatch(pay) {
            handle.join().await?;
        }
    }
    println!("[main] backend calls: {}", calls.load(Ordering::SeqCst));

    if let Some(explode) = creators.action("explode", Vec::<serde_json::Value>::new()) {
        let _ = app.dispatch(explode);
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    page.unmount().await;
    println!("[main] ticks while mounted: {}", page.tick_count());

    app.shutdown().await;
    Ok(())
}

//! # sagavisor
//!
//! **Sagavisor** is a client-side application framework built on cancellable
//! task trees.
//!
//! Application logic lives in modules of async handlers. Handlers are
//! decorated by composable wrappers (loading indicators, logging, mutual
//! exclusion, network retry, time limits), started by a dispatcher, and tied
//! to the life of UI components by lifecycle attachments. Every failure ends
//! up in one error pipeline.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │    Module    │   │    Module    │   │    Module    │
//!     │ (handlers +  │   │ (handlers +  │   │ (handlers +  │
//!     │  lifecycle)  │   │  lifecycle)  │   │  lifecycle)  │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼ register         ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  App (runtime context)                                            │
//! │  - Dispatcher (handler registry, error slot)                      │
//! │  - Store (module state, loading counters)                         │
//! │  - Scheduler (task arena, cancellation)                           │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼ dispatch         ▼ attach           ▼ capture       │
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │ handler root │   │  Attachment  │   │ error action │   │
//!     │    task      │   │ (enter/tick) │   │  (listener)  │   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘   │
//!      │ Publishes        │ Publishes        │ Publishes       │
//!      │ - ActionCompleted│ - LifecycleEnter.│ - ExceptionCapt.│
//!      │ - NetworkRetry   │ - LifecycleDestr.│ - ErrorSuppress.│
//!      │ - TimeoutHit     │ - TaskCancelled  │ - ...           │
//!      ▼                  ▼                  ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                  (capacity: Config::bus_capacity)                 │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       │        (in App)        │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                            (per-sub queues)
//!                         ┌─────────┼─────────┐
//!                         ▼         ▼         ▼
//!                     LogWriter LogCollector custom
//! ```
//!
//! ### Task trees
//! ```text
//! root "user/load"                       (dispatch)
//!   ├─ fork "user/load/avatar"           attached: parent waits, failure aborts parent
//!   ├─ spawn "user/load/prefetch"        detached: cancelled with the tree only
//!   └─ race [body, timer]                joined: losers cancelled before race returns
//!
//! cancel(root) ──► depth-first: children settle (cleanup runs) before parents
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                         |
//! |-------------------|---------------------------------------------------------------|--------------------------------------------|
//! | **Scheduler**     | Cancellable task trees with fork/spawn/race/all/take effects. | [`Scheduler`], [`TaskContext`]             |
//! | **Handlers**      | Async handlers composed with wrappers.                        | [`Handler`], [`Wrapper`], [`HandlerCall`]  |
//! | **Wrappers**      | Loading, Log, Mutex, network retry/silence, time limit.       | [`Loading`], [`TimeLimit`], ...            |
//! | **Dispatcher**    | Action routing and the at-most-once error listener.           | [`Dispatcher`], [`ErrorListener`]          |
//! | **Lifecycle**     | Enter, non-overlapping ticks, focus, app status, destroy.     | [`Attachment`], [`AppStatus`]              |
//! | **Subscriber API**| Hook into runtime events (logging, shipping, custom).         | [`Subscribe`], [`LogCollector`]            |
//! | **Errors**        | Typed failures and framework errors.                          | [`Exception`], [`TaskError`], [`RuntimeError`] |
//! | **Configuration** | Centralize runtime settings.                                  | [`Config`]                                 |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use sagavisor::{
//!     App, Config, Exception, Handler, HandlerCall, Loading, Log, Module, MountOptions,
//!     RetryOnNetworkConnectionError, TaskError, error_listener,
//! };
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = App::builder(Config::default())
//!         .with_error_listener(error_listener(|call: sagavisor::ErrorCall| async move {
//!             eprintln!("failed: {}", call.exception);
//!             Ok(())
//!         }))
//!         .build();
//!
//!     let user = Module::new("user")
//!         .initial_state(json!({ "name": null }))
//!         .handler(
//!             "load",
//!             Handler::new(|call: HandlerCall| async move {
//!                 call.ctx().delay(Duration::from_millis(5)).await?;
//!                 call.set_state(json!({ "name": "Ada" }));
//!                 Ok::<_, TaskError>(())
//!             })
//!             .wrap(Log)
//!             .wrap(Loading::global())
//!             .wrap(RetryOnNetworkConnectionError::default()),
//!         )
//!         .on_enter(Handler::new(|call: HandlerCall| async move {
//!             call.put(sagavisor::Action::empty("user/load"));
//!             Ok(())
//!         }));
//!
//!     let creators = app.register(user)?;
//!     let load = creators.action("load", Vec::<serde_json::Value>::new()).unwrap();
//!     assert_eq!(load.action_type(), "user/load");
//!
//!     let handle = app.dispatch(load).unwrap();
//!     handle.join().await?;
//!     assert_eq!(app.state().module("user"), Some(&json!({ "name": "Ada" })));
//!
//!     let mut page = app.attach("user", MountOptions::new(json!({ "id": 7 })))?;
//!     page.unmount().await;
//!
//!     app.capture_error(TaskError::Failed(Exception::runtime("boom")), Some("user/load"));
//!     app.shutdown().await;
//!     Ok(())
//! }
//! ```

mod action;
mod app;
mod config;
mod dispatcher;
mod error;
mod handler;
mod lifecycle;
mod module;
mod scheduler;
mod store;

pub mod events;
pub mod logging;
pub mod subscribers;
pub mod wrappers;

// ---- Public re-exports ----

pub use action::{Action, ERROR_ACTION, GLOBAL_LOADING, LOADING_ACTION, Payload, action_type};
pub use app::{App, AppBuilder};
pub use config::Config;
pub use dispatcher::{Dispatcher, ErrorCall, ErrorListener, error_listener};
pub use error::{Exception, ExceptionKind, RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use handler::{
    Handler, HandlerBody, HandlerCall, HandlerMetadata, NO_PARAMETER, Next, Wrapper,
    create_wrapper, mask_params,
};
pub use lifecycle::{AppStatus, Attachment, AttachmentState, MountOptions};
pub use module::{ActionCreators, Hook, Module};
pub use scheduler::{
    BoxTaskFuture, Effect, FailureHook, Ownership, Scheduler, TaskContext, TaskHandle, TaskId,
    TaskStatus,
};
pub use store::{State, Store, show_global_loading, show_loading};
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
pub use subscribers::{LogCollector, LogEntry, LogResult, LogSink, Subscribe, SubscriberSet};
pub use wrappers::{
    Loading, Log, Mutex, RetryOnNetworkConnectionError, SilentOnNetworkConnectionError,
    TimeLimit,
};

//! # Store: the state container the framework writes to.
//!
//! [`State`] has two parts:
//! - `loading`: counters per loading identifier, touched only by
//!   [`Action::Loading`],
//! - `modules`: one JSON value per registered module, replaced or patched
//!   only by [`Action::SetState`].
//!
//! Patches are merged inside the store's update, against the latest
//! snapshot, so concurrent handlers never overwrite each other's keys.
//!
//! Snapshots are copy-on-write: readers get an `Arc<State>` that never
//! changes; every reduction publishes a new snapshot on a `watch` channel so
//! UI code can re-render.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::action::{Action, GLOBAL_LOADING};

/// Immutable snapshot of the application state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub loading: HashMap<Arc<str>, i64>,
    pub modules: HashMap<Arc<str>, Value>,
}

impl State {
    /// State of `module`, if it has one.
    pub fn module(&self, module: &str) -> Option<&Value> {
        self.modules.get(module)
    }

    pub fn loading_count(&self, identifier: &str) -> i64 {
        self.loading.get(identifier).copied().unwrap_or(0)
    }
}

/// True when the counter of `identifier` is above zero.
pub fn show_loading(state: &State, identifier: &str) -> bool {
    state.loading_count(identifier) > 0
}

/// True when the global loading counter is above zero.
pub fn show_global_loading(state: &State) -> bool {
    show_loading(state, GLOBAL_LOADING)
}

/// Copy-on-write state holder.
#[derive(Debug)]
pub struct Store {
    tx: watch::Sender<Arc<State>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(State::default()));
        Self { tx }
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<State> {
        self.tx.borrow().clone()
    }

    /// Receiver notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<State>> {
        self.tx.subscribe()
    }

    /// Applies a privileged action. Returns `true` if the state changed.
    ///
    /// Handler and error actions are ignored.
    pub fn reduce(&self, action: &Action) -> bool {
        self.tx.send_if_modified(|current| {
            let next = match action {
                Action::SetState {
                    module,
                    state,
                    merge,
                    ..
                } => {
                    let mut next = State::clone(current);
                    let value = match (*merge, state) {
                        (true, Value::Object(patch)) => {
                            let mut merged = match next.modules.get(module) {
                                Some(Value::Object(current)) => current.clone(),
                                _ => Map::new(),
                            };
                            merged.extend(patch.clone());
                            Value::Object(merged)
                        }
                        _ => state.clone(),
                    };
                    next.modules.insert(module.clone(), value);
                    next
                }
                Action::Loading { identifier, show } => {
                    let mut next = State::clone(current);
                    let count = next.loading.entry(identifier.clone()).or_insert(0);
                    *count += if *show { 1 } else { -1 };
                    next
                }
                Action::Handler { .. } | Action::Error { .. } => return false,
            };
            *current = Arc::new(next);
            true
        })
    }
}

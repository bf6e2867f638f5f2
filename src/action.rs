//! # Actions: the unit of dispatch.
//!
//! An [`Action`] is immutable once created. Besides plain handler actions
//! (`"{module}/{method}"` plus ordered arguments) there are three privileged
//! shapes:
//! - [`Action::SetState`] replaces or patches one module's state in the store,
//! - [`Action::Loading`] bumps a loading counter up or down,
//! - [`Action::Error`] feeds the error pipeline.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Exception;

/// Ordered, immutable handler arguments.
pub type Payload = Arc<[Value]>;

/// Action type of every loading counter update.
pub const LOADING_ACTION: &str = "@@framework/loading";

/// Action type of every error action.
pub const ERROR_ACTION: &str = "@@framework/error";

/// Identifier used by `Loading::global()` and `show_loading` callers.
pub const GLOBAL_LOADING: &str = "global";

#[derive(Debug, Clone)]
pub enum Action {
    /// Invokes the handler registered under `action_type`.
    Handler {
        action_type: Arc<str>,
        payload: Payload,
    },
    /// Replaces the state of `module` with `state`, or shallow-merges it
    /// into the current one when `merge` is set.
    ///
    /// `action_type` is free-form (e.g. `@@user/setState[name]`) to ease tracing.
    SetState {
        action_type: Arc<str>,
        module: Arc<str>,
        state: Value,
        merge: bool,
    },
    /// Increments (`show = true`) or decrements the counter of `identifier`.
    Loading { identifier: Arc<str>, show: bool },
    /// A failure that reached the top of a task tree.
    Error {
        exception: Exception,
        /// Name of the action whose handler raised the failure.
        action_name: Option<Arc<str>>,
    },
}

impl Action {
    /// Creates a handler action.
    pub fn new(action_type: impl Into<Arc<str>>, payload: impl Into<Payload>) -> Self {
        Action::Handler {
            action_type: action_type.into(),
            payload: payload.into(),
        }
    }

    /// Creates a handler action without arguments.
    pub fn empty(action_type: impl Into<Arc<str>>) -> Self {
        Self::new(action_type, Vec::<Value>::new())
    }

    /// Creates a state-patch action for `module`.
    ///
    /// The action type lists the top-level keys of `state`, e.g.
    /// `@@user/setState[name,age]`.
    pub fn set_state(module: impl Into<Arc<str>>, state: Value) -> Self {
        Self::state_action(module.into(), state, false)
    }

    /// Creates a state-patch action merged into the current state of
    /// `module` by the store. Non-object patches replace the state.
    pub fn merge_state(module: impl Into<Arc<str>>, patch: Value) -> Self {
        Self::state_action(module.into(), patch, true)
    }

    fn state_action(module: Arc<str>, state: Value, merge: bool) -> Self {
        let keys = match &state {
            Value::Object(map) => map.keys().cloned().collect::<Vec<_>>().join(","),
            _ => String::new(),
        };
        Action::SetState {
            action_type: format!("@@{module}/setState[{keys}]").into(),
            module,
            state,
            merge,
        }
    }

    /// Creates a loading counter update.
    pub fn loading(identifier: impl Into<Arc<str>>, show: bool) -> Self {
        Action::Loading {
            identifier: identifier.into(),
            show,
        }
    }

    /// Creates an error action.
    pub fn error(exception: Exception, action_name: Option<Arc<str>>) -> Self {
        Action::Error {
            exception,
            action_name,
        }
    }

    /// Returns the action type string.
    pub fn action_type(&self) -> &str {
        match self {
            Action::Handler { action_type, .. } | Action::SetState { action_type, .. } => {
                action_type
            }
            Action::Loading { .. } => LOADING_ACTION,
            Action::Error { .. } => ERROR_ACTION,
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Action::Error { .. })
    }

    /// Returns handler arguments (empty for privileged actions).
    pub fn payload(&self) -> Payload {
        match self {
            Action::Handler { payload, .. } => payload.clone(),
            _ => Arc::from(Vec::<Value>::new()),
        }
    }
}

/// Builds the globally unique action type of a module method.
pub fn action_type(module: &str, method: &str) -> Arc<str> {
    format!("{module}/{method}").into()
}

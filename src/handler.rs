//! # Action handlers and the wrapper seam.
//!
//! A [`Handler`] is an async body plus an ordered list of [`Wrapper`]s. At
//! registration the wrappers are applied to the body once, producing the
//! [`HandlerBody`] stored in the registry.
//!
//! ## Composition
//! ```text
//! Handler::new(body).wrap(A).wrap(B).wrap(C)
//!
//! invocation:  A ─► B ─► C ─► body
//!              (first declared is outermost)
//! ```
//!
//! ## HandlerCall
//! Each invocation receives a [`HandlerCall`]: the task context (for
//! effects), the action name, the masked parameters, the raw payload and
//! access to the store and to further dispatching.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::action::{Action, Payload};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Exception, TaskError};
use crate::events::Bus;
use crate::scheduler::{BoxTaskFuture, TaskContext};
use crate::store::State;

/// Parameter text used when a handler receives no arguments.
pub const NO_PARAMETER: &str = "[No Parameter]";

/// Type-erased, composed handler body.
pub type HandlerBody = Arc<dyn Fn(HandlerCall) -> BoxTaskFuture<()> + Send + Sync>;

/// Static description of a registered handler.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerMetadata {
    /// Globally unique action type (`"{module}/{method}"`).
    pub action_name: Arc<str>,
    pub module: Arc<str>,
    /// True for `onEnter`, `onTick`, `onFocus`, ... hooks.
    pub is_lifecycle: bool,
    /// Declared tick interval (only for `onTick`).
    pub tick_interval: Option<Duration>,
}

/// Interceptor applied around a handler body.
///
/// `wrap` is called once per registration; per-definition state (such as a
/// lock) lives in the wrapper value itself.
pub trait Wrapper: Send + Sync + 'static {
    fn wrap(&self, inner: HandlerBody, meta: &HandlerMetadata) -> HandlerBody;
}

/// A handler definition: body plus wrappers, not yet bound to an action name.
#[derive(Clone)]
pub struct Handler {
    body: HandlerBody,
    wrappers: Vec<Arc<dyn Wrapper>>,
}

impl Handler {
    /// Creates a handler from an async body.
    ///
    /// ## Example
    /// ```rust
    /// use sagavisor::{Handler, HandlerCall, Log, TaskError};
    /// use serde_json::json;
    ///
    /// let load = Handler::new(|call: HandlerCall| async move {
    ///     let id: u64 = call.arg(0)?;
    ///     call.set_state(json!({ "current": id }));
    ///     Ok::<_, TaskError>(())
    /// })
    /// .wrap(Log);
    /// # let _ = load;
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HandlerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            body: Arc::new(move |call| f(call).boxed()),
            wrappers: Vec::new(),
        }
    }

    /// Adds a wrapper inside the ones already declared.
    #[must_use]
    pub fn wrap(mut self, wrapper: impl Wrapper) -> Self {
        self.wrappers.push(Arc::new(wrapper));
        self
    }

    /// Applies the wrappers, innermost (last declared) first.
    pub(crate) fn build(&self, meta: &HandlerMetadata) -> HandlerBody {
        self.wrappers
            .iter()
            .rev()
            .fold(self.body.clone(), |inner, w| w.wrap(inner, meta))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("wrappers", &self.wrappers.len())
            .finish()
    }
}

/// One invocation of a handler.
#[derive(Clone)]
pub struct HandlerCall {
    pub(crate) ctx: TaskContext,
    pub(crate) meta: Arc<HandlerMetadata>,
    pub(crate) payload: Payload,
    pub(crate) params: Arc<str>,
    pub(crate) dispatcher: Dispatcher,
}

impl HandlerCall {
    pub(crate) fn new(
        ctx: TaskContext,
        meta: Arc<HandlerMetadata>,
        payload: Payload,
        dispatcher: Dispatcher,
    ) -> Self {
        let config = dispatcher.config();
        let params: Arc<str> =
            mask_params(&config.masked_keywords, &config.mask_placeholder, &payload).into();
        Self {
            ctx,
            meta,
            payload,
            params,
            dispatcher,
        }
    }

    /// Task context of the running handler.
    pub fn ctx(&self) -> &TaskContext {
        &self.ctx
    }

    pub fn action_name(&self) -> &str {
        &self.meta.action_name
    }

    pub fn module(&self) -> &str {
        &self.meta.module
    }

    pub fn metadata(&self) -> &HandlerMetadata {
        &self.meta
    }

    /// Arguments rendered for logs, with sensitive values masked.
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Deserializes argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, TaskError> {
        let value = self.payload.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            TaskError::Failed(Exception::runtime(format!(
                "{}: bad argument #{index}: {e}",
                self.meta.action_name
            )))
        })
    }

    /// Current state snapshot.
    pub fn state(&self) -> Arc<State> {
        self.dispatcher.store().state()
    }

    /// Current state of the handler's module.
    pub fn module_state(&self) -> Option<Value> {
        self.state().module(&self.meta.module).cloned()
    }

    /// Shallow-merges `patch` into this module's state.
    pub fn set_state(&self, patch: Value) {
        self.dispatcher
            .dispatch(Action::merge_state(self.meta.module.clone(), patch));
    }

    /// Dispatches another action.
    pub fn put(&self, action: Action) {
        self.dispatcher.dispatch(action);
    }

    pub fn bus(&self) -> &Bus {
        self.dispatcher.bus()
    }

    pub fn config(&self) -> &Config {
        self.dispatcher.config()
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Continuation handed to a [`create_wrapper`] interceptor.
pub struct Next {
    inner: HandlerBody,
}

impl Next {
    /// Runs the wrapped body.
    pub fn run(&self, call: HandlerCall) -> BoxTaskFuture<()> {
        (self.inner)(call)
    }
}

struct FnWrapper<F>(Arc<F>);

impl<F, Fut> Wrapper for FnWrapper<F>
where
    F: Fn(HandlerCall, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn wrap(&self, inner: HandlerBody, _meta: &HandlerMetadata) -> HandlerBody {
        let f = self.0.clone();
        Arc::new(move |call| {
            let next = Next {
                inner: inner.clone(),
            };
            f(call, next).boxed()
        })
    }
}

/// Builds a wrapper out of an async interceptor.
///
/// ## Example
/// ```rust
/// use sagavisor::{create_wrapper, Handler, HandlerCall, Next, TaskError};
///
/// let audit = create_wrapper(|call: HandlerCall, next: Next| async move {
///     tracing::info!(action = call.action_name(), "audit");
///     next.run(call).await
/// });
/// let handler = Handler::new(|_call: HandlerCall| async { Ok::<_, TaskError>(()) }).wrap(audit);
/// # let _ = handler;
/// ```
pub fn create_wrapper<F, Fut>(f: F) -> impl Wrapper
where
    F: Fn(HandlerCall, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    FnWrapper(Arc::new(f))
}

/// Renders handler arguments as JSON with sensitive values masked.
///
/// Values of object keys containing any of `keywords` (case-insensitive)
/// become `placeholder`, at any depth. No arguments renders as
/// `[No Parameter]`.
pub fn mask_params(keywords: &[String], placeholder: &str, payload: &[Value]) -> String {
    if payload.is_empty() {
        return NO_PARAMETER.to_string();
    }
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let masked: Vec<Value> = payload
        .iter()
        .map(|v| mask_value(v, &keywords, placeholder))
        .collect();
    serde_json::to_string(&masked).unwrap_or_else(|_| NO_PARAMETER.to_string())
}

fn mask_value(value: &Value, keywords: &[String], placeholder: &str) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let key = k.to_lowercase();
                    let v = if keywords.iter().any(|kw| key.contains(kw.as_str())) {
                        Value::String(placeholder.to_string())
                    } else {
                        mask_value(v, keywords, placeholder)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| mask_value(v, keywords, placeholder))
                .collect(),
        ),
        other => other.clone(),
    }
}

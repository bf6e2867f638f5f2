//! Error types used by the sagavisor runtime and handler bodies.
//!
//! This module defines three enums:
//!
//! - [`Exception`]: the normalized, typed failure carried by error actions.
//! - [`TaskError`]: the non-success outcome of a task or effect.
//! - [`RuntimeError`]: errors raised by the framework itself (registration).
//!
//! All of them provide `as_label` for logs/metrics. [`Exception`] additionally
//! exposes its [`ExceptionKind`], which drives the network-aware wrappers.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Classification of an [`Exception`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Transport/gateway level failure, eligible for retry.
    Connectivity,
    /// Server answered with an error; retrying gives the same answer.
    Api,
    /// Assertion or logic error in application code.
    Programming,
    /// Crash captured at a UI attachment boundary.
    Component,
}

/// # Normalized failure raised by a handler.
///
/// Anything a handler body fails with ends up as one of these variants before
/// it reaches the error pipeline.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Exception {
    /// Connection could not be established or the gateway gave up.
    #[error("network connection failed: {message}")]
    NetworkConnection {
        message: String,
        url: String,
        /// Message of the underlying transport error, if any.
        original_message: Option<String>,
    },

    /// Server returned a non-success response.
    #[error("api error ({status}): {message}")]
    Api {
        message: String,
        status: u16,
        url: String,
        error_id: Option<String>,
        error_code: Option<String>,
    },

    /// Programming error (bad state, failed assertion, panic).
    #[error("runtime error: {message}")]
    Runtime { message: String },

    /// Rendering or lifecycle crash of a UI component.
    #[error("component error: {message}")]
    Component {
        message: String,
        component_stack: Option<String>,
    },
}

impl Exception {
    /// Shorthand for [`Exception::Runtime`].
    pub fn runtime(message: impl Into<String>) -> Self {
        Exception::Runtime {
            message: message.into(),
        }
    }

    /// Shorthand for [`Exception::NetworkConnection`] without an underlying cause.
    pub fn network(message: impl Into<String>, url: impl Into<String>) -> Self {
        Exception::NetworkConnection {
            message: message.into(),
            url: url.into(),
            original_message: None,
        }
    }

    /// Classifies a non-success HTTP response.
    ///
    /// 502/504 without a server error id means the request never reached the
    /// application (load balancer, gateway), so it is a connectivity failure.
    /// 503 is maintenance and stays an API failure.
    ///
    /// # Example
    /// ```
    /// use sagavisor::{Exception, ExceptionKind};
    ///
    /// let gw = Exception::from_http_failure(502, "/user", None, None, None);
    /// assert_eq!(gw.kind(), ExceptionKind::Connectivity);
    ///
    /// let api = Exception::from_http_failure(502, "/user", Some("e-1".into()), None, None);
    /// assert_eq!(api.kind(), ExceptionKind::Api);
    /// ```
    pub fn from_http_failure(
        status: u16,
        url: impl Into<String>,
        error_id: Option<String>,
        error_code: Option<String>,
        message: Option<String>,
    ) -> Self {
        let url = url.into();
        if error_id.is_none() && matches!(status, 502 | 504) {
            return Exception::NetworkConnection {
                message: format!("Gateway error ({status})"),
                url,
                original_message: None,
            };
        }
        Exception::Api {
            message: message.unwrap_or_else(|| "[No Response]".to_string()),
            status,
            url,
            error_id,
            error_code,
        }
    }

    /// Builds a runtime exception out of a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Exception::Runtime {
            message: format!("panic: {}", panic_message(payload.as_ref())),
        }
    }

    /// Returns the failure class of this exception.
    pub fn kind(&self) -> ExceptionKind {
        match self {
            Exception::NetworkConnection { .. } => ExceptionKind::Connectivity,
            Exception::Api { .. } => ExceptionKind::Api,
            Exception::Runtime { .. } => ExceptionKind::Programming,
            Exception::Component { .. } => ExceptionKind::Component,
        }
    }

    /// True for failures the retry/silence wrappers act on.
    #[inline]
    pub fn is_connectivity(&self) -> bool {
        self.kind() == ExceptionKind::Connectivity
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Exception::NetworkConnection { .. } => "network_connection",
            Exception::Api { .. } => "api",
            Exception::Runtime { .. } => "runtime",
            Exception::Component { .. } => "component",
        }
    }

    /// Severity used when the exception is logged.
    pub fn severity(&self) -> &'static str {
        match self {
            Exception::NetworkConnection { .. } => "warn",
            _ => "error",
        }
    }
}

/// Extracts the text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl From<TaskError> for Exception {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Failed(e) => e,
            TaskError::Timeout { timeout } => Exception::Runtime {
                message: format!("timed out after {timeout:?}"),
            },
            TaskError::Canceled => Exception::Runtime {
                message: "task cancelled".to_string(),
            },
        }
    }
}

/// # Outcome of a task or effect other than success.
///
/// `Canceled` is a terminal state, not a failure: wrappers and cleanup code
/// may observe it but must hand it upwards unchanged.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// A [`TimeLimit`](crate::TimeLimit) expired before the body finished.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The body failed with an exception.
    #[error(transparent)]
    Failed(#[from] Exception),

    /// The task (or one of its ancestors) was cancelled.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for `TaskError::Failed(Exception::runtime(..))`.
    pub fn runtime(message: impl Into<String>) -> Self {
        TaskError::Failed(Exception::runtime(message))
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use sagavisor::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Failed(_) => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }

    /// Returns the exception for `Failed`, `None` otherwise.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// True when the failure is connectivity-classified.
    pub fn is_connectivity(&self) -> bool {
        self.exception().is_some_and(Exception::is_connectivity)
    }
}

/// # Errors produced by the framework itself.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Another module already registered a handler for this action type.
    #[error("action {action:?} is already registered")]
    AlreadyRegistered { action: Arc<str> },

    /// `attach` was called for a module that was never registered.
    #[error("module {module:?} is not registered")]
    UnknownModule { module: Arc<str> },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::AlreadyRegistered { .. } => "runtime_already_registered",
            RuntimeError::UnknownModule { .. } => "runtime_unknown_module",
        }
    }
}

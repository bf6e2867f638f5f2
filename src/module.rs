//! # Modules: named groups of handlers and lifecycle hooks.
//!
//! A [`Module`] is a declaration; [`App::register`](crate::App::register)
//! turns it into registered handlers and returns [`ActionCreators`].
//!
//! ## Naming
//! | Declaration            | Action type           |
//! |------------------------|-----------------------|
//! | `.handler("load", h)`  | `{module}/load`       |
//! | `.on_enter(h)`         | `{module}/onEnter`    |
//! | `.on_tick(h, every)`   | `{module}/onTick`     |
//!
//! Lifecycle hooks are ordinary handlers flagged `is_lifecycle`; the lifecycle
//! controller only runs the hooks a module actually declared.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::action::{self, Action, Payload};
use crate::error::RuntimeError;
use crate::handler::{Handler, HandlerMetadata};

/// Lifecycle hook kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hook {
    Register,
    Enter,
    Destroy,
    Tick,
    Focus,
    Blur,
    AppActive,
    AppInactive,
}

impl Hook {
    /// Method name the hook is registered under.
    pub fn method(&self) -> &'static str {
        match self {
            Hook::Register => "onRegister",
            Hook::Enter => "onEnter",
            Hook::Destroy => "onDestroy",
            Hook::Tick => "onTick",
            Hook::Focus => "onFocus",
            Hook::Blur => "onBlur",
            Hook::AppActive => "onAppActive",
            Hook::AppInactive => "onAppInactive",
        }
    }
}

/// Module declaration.
#[derive(Debug, Clone)]
pub struct Module {
    name: Arc<str>,
    initial_state: Option<Value>,
    handlers: BTreeMap<Arc<str>, Handler>,
    hooks: BTreeMap<Hook, Handler>,
    tick_interval: Option<Duration>,
}

impl Module {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            initial_state: None,
            handlers: BTreeMap::new(),
            hooks: BTreeMap::new(),
            tick_interval: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// State installed in the store at registration.
    #[must_use]
    pub fn initial_state(mut self, state: Value) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Declares the handler of `{module}/{method}`.
    #[must_use]
    pub fn handler(mut self, method: impl Into<Arc<str>>, handler: Handler) -> Self {
        self.handlers.insert(method.into(), handler);
        self
    }

    /// Runs once, when the module is registered.
    #[must_use]
    pub fn on_register(self, handler: Handler) -> Self {
        self.hook(Hook::Register, handler)
    }

    /// Runs when a component attaches; receives route params and path.
    #[must_use]
    pub fn on_enter(self, handler: Handler) -> Self {
        self.hook(Hook::Enter, handler)
    }

    /// Runs when an attachment unmounts, before its tasks are cancelled.
    #[must_use]
    pub fn on_destroy(self, handler: Handler) -> Self {
        self.hook(Hook::Destroy, handler)
    }

    /// Runs periodically while attached; `interval` of `None` uses
    /// `Config::default_tick_interval`.
    #[must_use]
    pub fn on_tick(mut self, handler: Handler, interval: Option<Duration>) -> Self {
        self.tick_interval = interval;
        self.hook(Hook::Tick, handler)
    }

    #[must_use]
    pub fn on_focus(self, handler: Handler) -> Self {
        self.hook(Hook::Focus, handler)
    }

    #[must_use]
    pub fn on_blur(self, handler: Handler) -> Self {
        self.hook(Hook::Blur, handler)
    }

    #[must_use]
    pub fn on_app_active(self, handler: Handler) -> Self {
        self.hook(Hook::AppActive, handler)
    }

    #[must_use]
    pub fn on_app_inactive(self, handler: Handler) -> Self {
        self.hook(Hook::AppInactive, handler)
    }

    fn hook(mut self, hook: Hook, handler: Handler) -> Self {
        self.hooks.insert(hook, handler);
        self
    }

    /// Every handler with its metadata, ready to be built and registered.
    ///
    /// Fails if two declarations map to the same action type (e.g. a plain
    /// `onTick` method next to [`on_tick`](Self::on_tick)).
    pub(crate) fn definitions(&self) -> Result<Vec<(HandlerMetadata, &Handler)>, RuntimeError> {
        let plain = self.handlers.iter().map(|(method, h)| {
            (
                HandlerMetadata {
                    action_name: action::action_type(&self.name, method),
                    module: self.name.clone(),
                    is_lifecycle: false,
                    tick_interval: None,
                },
                h,
            )
        });
        let hooks = self.hooks.iter().map(|(hook, h)| {
            (
                HandlerMetadata {
                    action_name: action::action_type(&self.name, hook.method()),
                    module: self.name.clone(),
                    is_lifecycle: true,
                    tick_interval: (*hook == Hook::Tick).then_some(self.tick_interval).flatten(),
                },
                h,
            )
        });

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.handlers.len() + self.hooks.len());
        for (meta, h) in plain.chain(hooks) {
            if !seen.insert(meta.action_name.clone()) {
                return Err(RuntimeError::AlreadyRegistered {
                    action: meta.action_name,
                });
            }
            out.push((meta, h));
        }
        Ok(out)
    }

    pub(crate) fn initial(&self) -> Option<&Value> {
        self.initial_state.as_ref()
    }

    pub(crate) fn declared_hooks(&self) -> impl Iterator<Item = Hook> + '_ {
        self.hooks.keys().copied()
    }
}

/// Builds actions for a registered module.
#[derive(Debug, Clone)]
pub struct ActionCreators {
    module: Arc<str>,
    methods: Arc<[Arc<str>]>,
    hooks: Arc<[Hook]>,
}

impl ActionCreators {
    pub(crate) fn new(module: &Module) -> Self {
        Self {
            module: module.name.clone(),
            methods: module.handlers.keys().cloned().collect(),
            hooks: module.declared_hooks().collect(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Builds the action of `method`, or `None` if the module has no such handler.
    pub fn action(&self, method: &str, payload: impl Into<Payload>) -> Option<Action> {
        self.methods
            .iter()
            .any(|m| &**m == method)
            .then(|| Action::new(action::action_type(&self.module, method), payload))
    }

    /// Builds the action of a declared lifecycle hook.
    pub fn hook(&self, hook: Hook, payload: impl Into<Payload>) -> Option<Action> {
        self.has_hook(hook)
            .then(|| Action::new(action::action_type(&self.module, hook.method()), payload))
    }

    pub fn has_hook(&self, hook: Hook) -> bool {
        self.hooks.contains(&hook)
    }

    /// Methods declared by the module, sorted.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| &**m)
    }
}

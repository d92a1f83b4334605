//! Server-delivered callbacks.
//!
//! A reply entry may carry `callbacks: [{"fn": "a.b.method", "args": [...]}]`.
//! The dotted path is walked from the entity's callback target (the mounted
//! component, or the entity itself). Invalid paths are logged and skipped;
//! they never fail the surrounding reconciliation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// One callback instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callback {
    #[serde(rename = "fn")]
    pub path: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Callback {
    pub fn new(path: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }
}

/// Callable end of a callback path.
pub type CallbackFn = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Something callbacks can be dispatched against.
pub trait CallbackTarget: Send + Sync {
    /// Nested object named `name`.
    fn member(&self, name: &str) -> Option<Arc<dyn CallbackTarget>>;

    /// Method named `name`.
    fn method(&self, name: &str) -> Option<CallbackFn>;
}

/// A callback target assembled from closures.
#[derive(Clone, Default)]
pub struct CallbackTable {
    methods: HashMap<String, CallbackFn>,
    members: HashMap<String, Arc<dyn CallbackTarget>>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_member(mut self, name: impl Into<String>, member: Arc<dyn CallbackTarget>) -> Self {
        self.members.insert(name.into(), member);
        self
    }
}

impl fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTable")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CallbackTarget for CallbackTable {
    fn member(&self, name: &str) -> Option<Arc<dyn CallbackTarget>> {
        self.members.get(name).cloned()
    }

    fn method(&self, name: &str) -> Option<CallbackFn> {
        self.methods.get(name).cloned()
    }
}

/// Resolves and runs one callback. Returns whether it ran.
pub fn invoke_callback(callback: &Callback, target: Arc<dyn CallbackTarget>) -> bool {
    let mut parts: Vec<&str> = callback.path.split('.').collect();
    let method = parts.pop().unwrap_or_default();

    let mut context = target;
    for part in parts {
        match context.member(part) {
            Some(next) => context = next,
            None => {
                error!("Object path {} is not valid.", callback.path);
                return false;
            }
        }
    }

    match context.method(method) {
        Some(f) => {
            f(&callback.args);
            true
        }
        None => {
            error!("Function {} is not valid.", callback.path);
            false
        }
    }
}

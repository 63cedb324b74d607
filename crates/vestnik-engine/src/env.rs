//! Scope chain
//!
//! Scopes form a parent-pointer tree. Variables are keyed by the
//! case-folded name id, which is what makes resolution case-insensitive
//! within a scope. Assignment writes through to the scope that already
//! holds the name; a miss defines the name in the current scope.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use vestnik_core::names::NameId;
use vestnik_core::Value;

struct EnvInner {
    vars: RwLock<FxHashMap<NameId, Value>>,
    parent: Option<Env>,
}

/// One scope in the chain. Cloning shares the scope.
#[derive(Clone)]
pub struct Env {
    inner: Arc<EnvInner>,
}

impl Env {
    /// Create a root scope.
    pub fn root() -> Self {
        Env {
            inner: Arc::new(EnvInner {
                vars: RwLock::new(FxHashMap::default()),
                parent: None,
            }),
        }
    }

    /// Create a child scope with `self` as the parent.
    pub fn child(&self) -> Self {
        Env {
            inner: Arc::new(EnvInner {
                vars: RwLock::new(FxHashMap::default()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Resolve a case-folded name through the chain.
    pub fn get(&self, lower: NameId) -> Option<Value> {
        let mut env = self;
        loop {
            if let Some(v) = env.inner.vars.read().get(&lower) {
                return Some(v.clone());
            }
            env = env.inner.parent.as_ref()?;
        }
    }

    /// Assign a name: write where it already exists, else define here.
    pub fn assign(&self, lower: NameId, value: Value) {
        let mut env = self;
        loop {
            if env.inner.vars.read().contains_key(&lower) {
                env.inner.vars.write().insert(lower, value);
                return;
            }
            match env.inner.parent.as_ref() {
                Some(parent) => env = parent,
                None => break,
            }
        }
        self.inner.vars.write().insert(lower, value);
    }

    /// Define a name in this scope, shadowing any enclosing binding.
    pub fn define(&self, lower: NameId, value: Value) {
        self.inner.vars.write().insert(lower, value);
    }
}

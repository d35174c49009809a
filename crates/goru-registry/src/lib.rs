//! Host-function registry: a concurrency-safe name→handler map.
//!
//! Reads dominate writes, so the map is backed by `DashMap` (sharded
//! internal locking) the way `openfang-runtime::hooks::HookRegistry` backs
//! its event→handlers map. `register` is last-writer-wins; `all()` returns
//! a shallow, independent snapshot — a `Session` takes one at start so
//! later global registrations do not leak into an already-running session.

use async_trait::async_trait;
use dashmap::DashMap;
use goru_types::error::EngineResult;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata passed to a handler alongside its arguments.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    /// The correlation id of the call, if it was issued asynchronously.
    pub call_id: Option<String>,
    /// Name of the adapter running the guest that issued this call.
    pub adapter: String,
}

/// A named host function. Implementations must be safe to call
/// concurrently — the registry may dispatch many calls to the same
/// handler in parallel during a batch flush.
#[async_trait]
pub trait HostFn: Send + Sync {
    /// Execute the handler against the given context and arguments.
    async fn call(&self, ctx: &HostContext, args: BTreeMap<String, Value>) -> EngineResult<Value>;
}

/// Name→handler map. Cheap to clone: cloning copies the `Arc<dyn HostFn>`
/// pointers, not the handlers themselves.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: Arc<DashMap<String, Arc<dyn HostFn>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`. Last writer wins.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn HostFn>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn HostFn>> {
        self.handlers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry has no registered handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Take an independent snapshot: a new `Registry` whose map is a
    /// separate `DashMap` holding clones of the current `Arc<dyn HostFn>`
    /// entries. Later mutation of `self` is invisible to the snapshot.
    pub fn snapshot(&self) -> Registry {
        let copy: DashMap<String, Arc<dyn HostFn>> = self
            .handlers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        Registry {
            handlers: Arc::new(copy),
        }
    }

    /// Merge `other`'s handlers into a new registry layered on top of
    /// `self` (entries in `other` win on name collision). Used by the
    /// Executor to compose its base registry with per-run capability
    /// handlers without mutating either input.
    pub fn layered(&self, other: &Registry) -> Registry {
        let merged = self.snapshot();
        for entry in other.handlers.iter() {
            merged
                .handlers
                .insert(entry.key().clone(), Arc::clone(entry.value()));
        }
        merged
    }
}

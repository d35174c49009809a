//! Bounded, per-session or per-run key-value store.
//!
//! Backed by a single mutex over a plain `HashMap` plus a running byte
//! total — simpler than lock-free atomics and just as correct, since
//! every mutating operation needs the read-check-write to be atomic
//! together anyway (the entry count and aggregate byte total must move
//! in lockstep with the map itself).

use async_trait::async_trait;
use goru_registry::{HostContext, HostFn};
use goru_types::capability::KvLimits;
use goru_types::error::{EngineError, EngineResult};
use serde_json::Value;
use std::collections::BTreeMap as ArgMap;
use std::collections::HashMap;
use std::sync::Mutex;

struct Inner {
    entries: HashMap<String, Vec<u8>>,
    total_bytes: usize,
}

/// The bounded KV store itself, shared by the four `kv_*` handlers.
pub struct KvStore {
    limits: KvLimits,
    inner: Mutex<Inner>,
}

impl KvStore {
    pub fn new(limits: KvLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                total_bytes: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(key)
            .map(|bytes| serde_json::from_slice(bytes).unwrap_or(Value::Null))
    }

    pub fn set(&self, key: &str, value: &Value) -> Result<(), &'static str> {
        if key.len() > self.limits.max_key {
            return Err("key too large");
        }
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        if bytes.len() > self.limits.max_value {
            return Err("value too large");
        }
        let mut inner = self.inner.lock().unwrap();
        let previous_len = inner.entries.get(key).map(|b| key.len() + b.len());
        let is_new = previous_len.is_none();
        if is_new && inner.entries.len() >= self.limits.max_entries {
            return Err("too many entries");
        }
        let added = key.len() + bytes.len();
        let new_total = inner.total_bytes - previous_len.unwrap_or(0) + added;
        if new_total > self.limits.max_total_bytes {
            return Err("kv store full");
        }
        inner.total_bytes = new_total;
        inner.entries.insert(key.to_string(), bytes);
        Ok(())
    }

    pub fn delete(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(bytes) = inner.entries.remove(key) {
            inner.total_bytes -= key.len() + bytes.len();
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }
}

fn require_str<'a>(args: &'a ArgMap<String, Value>, name: &str) -> EngineResult<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::HandlerError(format!("missing '{name}' parameter")))
}

pub struct KvGet(pub std::sync::Arc<KvStore>);
#[async_trait]
impl HostFn for KvGet {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let key = require_str(&args, "key")?;
        if key.len() > self.0.limits.max_key {
            return Err(EngineError::CapabilityDenied("key too large".to_string()));
        }
        Ok(self
            .0
            .get(key)
            .or_else(|| args.get("default").cloned())
            .unwrap_or(Value::Null))
    }
}

pub struct KvSet(pub std::sync::Arc<KvStore>);
#[async_trait]
impl HostFn for KvSet {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let key = require_str(&args, "key")?;
        let value = args
            .get("value")
            .ok_or_else(|| EngineError::HandlerError("missing 'value' parameter".to_string()))?;
        self.0
            .set(key, value)
            .map_err(|e| EngineError::CapabilityDenied(e.to_string()))?;
        Ok(Value::from("ok"))
    }
}

pub struct KvDelete(pub std::sync::Arc<KvStore>);
#[async_trait]
impl HostFn for KvDelete {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let key = require_str(&args, "key")?;
        self.0.delete(key);
        Ok(Value::from("ok"))
    }
}

pub struct KvKeys(pub std::sync::Arc<KvStore>);
#[async_trait]
impl HostFn for KvKeys {
    async fn call(&self, _ctx: &HostContext, _args: ArgMap<String, Value>) -> EngineResult<Value> {
        Ok(Value::from(self.0.keys()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> KvLimits {
        KvLimits {
            max_key: 8,
            max_value: 16,
            max_entries: 2,
            max_total_bytes: 64,
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = KvStore::new(limits());
        store.set("a", &Value::from(1)).unwrap();
        assert_eq!(store.get("a"), Some(Value::from(1)));
    }

    #[test]
    fn rejects_key_too_large() {
        let store = KvStore::new(limits());
        assert_eq!(store.set("toolongkey", &Value::from(1)), Err("key too large"));
    }

    #[test]
    fn rejects_value_too_large() {
        let store = KvStore::new(limits());
        let huge = Value::from("x".repeat(100));
        assert_eq!(store.set("k", &huge), Err("value too large"));
    }

    #[test]
    fn rejects_too_many_entries() {
        let store = KvStore::new(limits());
        store.set("a", &Value::from(1)).unwrap();
        store.set("b", &Value::from(1)).unwrap();
        assert_eq!(store.set("c", &Value::from(1)), Err("too many entries"));
    }

    #[test]
    fn overwriting_existing_key_does_not_count_against_entry_cap() {
        let store = KvStore::new(limits());
        store.set("a", &Value::from(1)).unwrap();
        store.set("b", &Value::from(1)).unwrap();
        assert!(store.set("a", &Value::from(2)).is_ok());
    }

    #[test]
    fn rejects_when_total_bytes_would_overflow_and_leaves_store_unchanged() {
        let limits = KvLimits {
            max_key: 8,
            max_value: 16,
            max_entries: 10,
            max_total_bytes: 10,
        };
        let store = KvStore::new(limits);
        store.set("a", &Value::from(1)).unwrap();
        let before = store.total_bytes();
        assert_eq!(
            store.set("bbbbbbb", &Value::from("zzzzzzzzzzzzzz")),
            Err("kv store full")
        );
        assert_eq!(store.total_bytes(), before);
    }

    #[test]
    fn delete_reduces_count_and_bytes() {
        let store = KvStore::new(limits());
        store.set("a", &Value::from(1)).unwrap();
        store.delete("a");
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_bytes(), 0);
    }
}

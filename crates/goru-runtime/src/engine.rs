//! Compiled-module cache over a shared `wasmtime::Engine`.
//!
//! Grounded on `openfang-runtime::sandbox::WasmSandbox::new` for the
//! fuel/epoch `Config`, generalized with a name-keyed module cache (the
//! teacher compiles fresh on every call since it only ever runs
//! one-off skills; this engine's adapters are reused across every
//! run/session, so compiling once per process matters) plus an optional
//! on-disk tier so compiled artifacts survive a process restart
//! (spec.md §4.1/§4.5).

use goru_types::error::{EngineError, EngineResult};
use goru_types::mem::MemoryPages;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use wasmtime::{Config, Engine, Module};

/// Shared, process-wide WASM engine plus a cache of compiled adapter
/// modules keyed by adapter name, with an optional on-disk persistence
/// tier keyed by a digest of the engine's compatibility version, the
/// adapter name, and the module's bytes.
pub struct WasmRuntime {
    engine: Engine,
    modules: RwLock<HashMap<String, Module>>,
    pub max_memory: MemoryPages,
    disk_cache_dir: Option<PathBuf>,
}

impl WasmRuntime {
    pub fn new(max_memory: MemoryPages) -> EngineResult<Self> {
        Self::with_disk_cache(max_memory, None)
    }

    /// Like [`WasmRuntime::new`], with `disk_cache_dir` persisting
    /// compiled modules across process restarts. `None` keeps the cache
    /// in-memory only, for the lifetime of this `WasmRuntime`.
    pub fn with_disk_cache(max_memory: MemoryPages, disk_cache_dir: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);
        config.async_support(true);
        let engine =
            Engine::new(&config).map_err(|e| EngineError::Config(format!("wasmtime engine init failed: {e}")))?;
        Ok(Self {
            engine,
            modules: RwLock::new(HashMap::new()),
            max_memory,
            disk_cache_dir,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile `bytes` under `name` if not already cached, returning the
    /// cached module either way. Double-checked locking against the
    /// in-memory tier: cheap read path once warm, compile happens at
    /// most once per name per process. When a disk cache directory is
    /// configured, a miss there is tried before falling back to a fresh
    /// `wasmtime` compile, and a fresh compile is written back to disk.
    pub fn module(&self, name: &str, bytes: &[u8]) -> EngineResult<Module> {
        if let Some(module) = self.modules.read().unwrap().get(name) {
            tracing::debug!(name, "cache_hit");
            return Ok(module.clone());
        }

        if let Some(dir) = &self.disk_cache_dir {
            if let Some(module) = self.load_from_disk(dir, name, bytes) {
                let mut modules = self.modules.write().unwrap();
                return Ok(modules.entry(name.to_string()).or_insert(module).clone());
            }
        }

        let _span = tracing::info_span!("compile", name).entered();
        tracing::debug!(name, "cache_miss");
        let compiled = Module::new(&self.engine, bytes)
            .map_err(|e| EngineError::CompileFailed(format!("{name}: {e}")))?;
        drop(_span);

        if let Some(dir) = &self.disk_cache_dir {
            self.store_to_disk(dir, name, bytes, &compiled);
        }

        let mut modules = self.modules.write().unwrap();
        Ok(modules.entry(name.to_string()).or_insert(compiled).clone())
    }

    /// Path a module compiled from `name`/`bytes` under this engine would
    /// be cached to on disk, given directory `dir`. The digest folds in
    /// `wasmtime::VERSION` so an engine upgrade invalidates stale
    /// artifacts rather than rejecting or misinterpreting them.
    fn cache_path(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(wasmtime::VERSION.as_bytes());
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        dir.join(format!("{hex}.cwasm"))
    }

    fn load_from_disk(&self, dir: &Path, name: &str, bytes: &[u8]) -> Option<Module> {
        let path = Self::cache_path(dir, name, bytes);
        let serialized = std::fs::read(&path).ok()?;
        // SAFETY: the cache file at `path` is content this process (or an
        // earlier one) wrote via `Module::serialize` under the same
        // version-keyed digest. `deserialize` independently validates the
        // embedded wasmtime version and target triple and errors out on
        // any mismatch or corruption, so a tampered or stale file is
        // rejected rather than trusted blindly.
        match unsafe { Module::deserialize(&self.engine, &serialized) } {
            Ok(module) => {
                tracing::debug!(name, path = %path.display(), "cache_hit (disk)");
                Some(module)
            }
            Err(e) => {
                tracing::warn!(name, error = %e, path = %path.display(), "disk-cached module failed to deserialize, recompiling");
                None
            }
        }
    }

    fn store_to_disk(&self, dir: &Path, name: &str, bytes: &[u8], module: &Module) {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(error = %e, dir = %dir.display(), "failed to create disk cache directory");
            return;
        }
        let serialized = match module.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(name, error = %e, "failed to serialize module for disk cache");
                return;
            }
        };
        let path = Self::cache_path(dir, name, bytes);
        if let Err(e) = std::fs::write(&path, serialized) {
            tracing::warn!(name, error = %e, path = %path.display(), "failed to write disk cache entry");
        }
    }

    /// Spawn a background watchdog that increments the engine's epoch
    /// once `timeout` elapses, interrupting any store still running past
    /// its deadline. Returns a handle the caller must `abort()` once the
    /// guarded work finishes early — dropping the handle does not stop
    /// the watchdog, it only detaches from it.
    pub fn spawn_timeout(&self, timeout: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            engine.increment_epoch();
        })
    }
}

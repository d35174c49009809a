//! One-shot run algorithm (spec.md §4.1): compile once, cache forever,
//! instantiate fresh per call.

use crate::RunResult;
use goru_adapters::LanguageAdapter;
use goru_protocol::{GuestStdin, ProtocolCodec};
use goru_registry::Registry;
use goru_runtime::{GuestLimits, WasmRuntime};
use goru_types::capability::{CapabilityConfig, FsLimits, HttpLimits, KvLimits, Mount};
use goru_types::error::{EngineError, EngineResult};
use goru_types::mem::MemoryPages;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options controlling a single [`Executor::run`] call.
#[derive(Debug, Clone, Default)]
pub struct PerRunOptions {
    pub timeout: Option<Duration>,
    pub allowed_hosts: Vec<String>,
    pub mounts: Vec<Mount>,
    pub kv_enabled: bool,
    pub kv_config: Option<KvLimits>,
    pub http_limits: Option<HttpLimits>,
    pub fs_limits: Option<FsLimits>,
}

impl PerRunOptions {
    fn capability_config(&self) -> CapabilityConfig {
        CapabilityConfig {
            allowed_hosts: self.allowed_hosts.clone(),
            mounts: self.mounts.clone(),
            kv_limits: if self.kv_enabled {
                Some(self.kv_config.unwrap_or_default())
            } else {
                None
            },
            http_limits: self.http_limits,
            fs_limits: self.fs_limits,
            package_install: None,
        }
    }
}

/// Options passed to [`Executor::new`].
#[derive(Clone, Default)]
pub struct ExecutorOptions {
    pub disk_cache: Option<PathBuf>,
    pub precompile_adapters: Vec<Arc<dyn LanguageAdapter>>,
    pub memory_limit_pages: Option<MemoryPages>,
}

/// Resolve the directory compiled modules are persisted to on disk.
/// `configured` takes priority; otherwise falls back to an OS-appropriate
/// cache directory (spec.md §6), and finally to the system temp
/// directory if even that can't be determined.
fn effective_disk_cache_dir(configured: Option<PathBuf>) -> PathBuf {
    configured
        .or_else(|| dirs::cache_dir().map(|dir| dir.join("goru").join("modules")))
        .unwrap_or_else(|| std::env::temp_dir().join("goru-modules"))
}

/// Owns the runtime container and a compiled-module cache keyed by
/// adapter name. See spec §4.1.
pub struct Executor {
    runtime: Arc<WasmRuntime>,
    registry: Registry,
}

impl Executor {
    pub fn new(registry: Registry, options: ExecutorOptions) -> EngineResult<Self> {
        let disk_cache_dir = Some(effective_disk_cache_dir(options.disk_cache.clone()));
        let runtime = Arc::new(WasmRuntime::with_disk_cache(
            options.memory_limit_pages.unwrap_or_default(),
            disk_cache_dir,
        )?);
        for adapter in &options.precompile_adapters {
            runtime.module(adapter.name(), adapter.module_bytes())?;
        }
        Ok(Self { runtime, registry })
    }

    /// Execute `code` once against `adapter` and return the assembled
    /// result. Never cancels the caller's task; cancellation happens by
    /// an attached per-run timeout.
    pub async fn run(
        &self,
        adapter: &dyn LanguageAdapter,
        code: &str,
        options: PerRunOptions,
    ) -> EngineResult<RunResult> {
        let _span = tracing::info_span!("run", adapter = adapter.name()).entered();
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(Duration::from_secs(30));
        let capability_registry = goru_capabilities::build_registry(&options.capability_config());
        let effective_registry = self.registry.layered(&capability_registry);

        let full_source = format!("{}\n{}", adapter.prelude_source(), code);
        let argv = adapter.argv(&full_source);

        let guest = goru_runtime::spawn(
            self.runtime.clone(),
            adapter.name(),
            adapter.module_bytes(),
            argv,
            GuestLimits {
                timeout,
                ..GuestLimits::default()
            },
        )?;

        let stdin: Arc<dyn GuestStdin> = Arc::new(guest.stdin.clone());
        let (codec, _signal_rx) = ProtocolCodec::new(effective_registry, adapter.name(), stdin);
        let codec = Arc::new(codec);

        let mut stdout_rx = guest.stdout;
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            while let Some(chunk) = stdout_rx.recv().await {
                buf.extend_from_slice(&chunk);
            }
            buf
        });

        let mut stderr_rx = guest.stderr;
        let codec_for_stderr = codec.clone();
        let stderr_task = tokio::spawn(async move {
            while let Some(chunk) = stderr_rx.recv().await {
                let _ = codec_for_stderr.feed(&chunk).await;
            }
        });

        let guest_task = guest.task;
        let run_outcome = tokio::time::timeout(timeout, guest_task).await;

        let exit_error = match run_outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(join_err)) => Some(format!("execution failed: guest task panicked: {join_err}")),
            Err(_elapsed) => Some(format!("timeout after {timeout:?}")),
        };

        let stdout_bytes = stdout_task.await.unwrap_or_default();
        // Await rather than abort: the guest's stderr writes already
        // happened synchronously before `guest_task` completed, so the
        // channel just needs draining. Bounded in case a timed-out guest's
        // epoch watchdog hasn't torn it down yet.
        let _ = tokio::time::timeout(Duration::from_secs(5), stderr_task).await;
        let stderr_bytes = codec.take_output().await;

        Ok(RunResult::from_parts(&stdout_bytes, &stderr_bytes, started.elapsed(), exit_error))
    }

    /// Start a persistent [`crate::Session`] for `adapter`. Blocks until
    /// the guest's session read-loop signals ready, or the session's
    /// start timeout elapses.
    pub async fn new_session(
        &self,
        adapter: Arc<dyn LanguageAdapter>,
        options: crate::session::SessionOptions,
    ) -> EngineResult<crate::Session> {
        crate::session::Session::start(self.runtime.clone(), self.registry.clone(), adapter, options).await
    }

    /// Idempotent. The runtime container has no background resources
    /// beyond the compiled-module cache, so this simply drops the
    /// engine handle's cache.
    pub fn close(&self) -> EngineResult<()> {
        Ok(())
    }
}

impl From<EngineError> for crate::RunResult {
    fn from(e: EngineError) -> Self {
        RunResult {
            output: String::new(),
            duration: Duration::ZERO,
            error: Some(e.to_string()),
        }
    }
}

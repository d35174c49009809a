//! Persistent guest session (spec.md §4.2): a guest instance kept alive
//! across multiple `run`/`run_repl`/`check_complete` cycles, serialized
//! by a call mutex and tracked by a small state machine.

use crate::RunResult;
use goru_adapters::LanguageAdapter;
use goru_protocol::{GuestStdin, ProtocolCodec, Signal};
use goru_registry::Registry;
use goru_runtime::{GuestLimits, WasmRuntime};
use goru_types::capability::{CapabilityConfig, FsLimits, HttpLimits, KvLimits, Mount, PackageInstallConfig};
use goru_types::error::{EngineError, EngineResult};
use goru_types::wire::CommandFrame;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// Options passed to [`crate::Executor::new_session`]; mirrors
/// [`crate::executor::PerRunOptions`] plus package-installation config.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub start_timeout: Option<Duration>,
    pub call_timeout: Option<Duration>,
    pub allowed_hosts: Vec<String>,
    pub mounts: Vec<Mount>,
    pub kv_enabled: bool,
    pub kv_config: Option<KvLimits>,
    pub http_limits: Option<HttpLimits>,
    pub fs_limits: Option<FsLimits>,
    pub packages_path: Option<PathBuf>,
    pub allow_package_install: bool,
    pub allowed_packages: Vec<String>,
}

impl SessionOptions {
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
            package_install: if self.allow_package_install {
                Some(PackageInstallConfig {
                    packages_path: self.packages_path.clone().unwrap_or_default(),
                    allowed_packages: self.allowed_packages.clone(),
                })
            } else {
                None
            },
        }
    }
}

/// Lifecycle state of a [`Session`]. `Created`/`Starting` (spec.md §4.2)
/// exist only while [`Session::start`] is building the guest instance,
/// before a `Session` value exists to hold them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Busy,
    Closed,
}

/// Shared by [`Session::run_inner`] and [`Session::check_complete`]: only
/// reopen to `Ready` if a concurrent `close()` hasn't already moved the
/// session to its terminal `Closed` state.
fn reset_to_ready_unless_closed(state: &StdMutex<State>) {
    let mut state = state.lock().unwrap();
    if *state != State::Closed {
        *state = State::Ready;
    }
}

struct StdoutBuffer(Mutex<Vec<u8>>);

/// A running guest instance plus its I/O pipes, a call-serializing
/// mutex, and the protocol codec instance bound to its stderr.
pub struct Session {
    state: StdMutex<State>,
    call_mutex: Mutex<()>,
    call_timeout: Duration,
    stdin: goru_runtime::GuestStdinPipe,
    signal_rx: Mutex<mpsc::UnboundedReceiver<Signal>>,
    codec: Arc<ProtocolCodec>,
    stdout: Arc<StdoutBuffer>,
    stderr_task: tokio::task::JoinHandle<()>,
    stdout_task: tokio::task::JoinHandle<()>,
    guest_task: StdMutex<Option<tokio::task::JoinHandle<EngineResult<()>>>>,
    seq: AtomicU64,
}

impl Session {
    pub(crate) async fn start(
        runtime: Arc<WasmRuntime>,
        base_registry: Registry,
        adapter: Arc<dyn LanguageAdapter>,
        options: SessionOptions,
    ) -> EngineResult<Self> {
        let start_timeout = options.start_timeout.unwrap_or(Duration::from_secs(10));
        let call_timeout = options.call_timeout.unwrap_or(Duration::from_secs(30));

        let capability_registry = goru_capabilities::build_registry(&options.capability_config());
        let effective_registry = base_registry.layered(&capability_registry);

        let full_source = format!("{}\n{}", adapter.prelude_source(), adapter.session_init());
        let argv = adapter.argv(&full_source);

        let guest = goru_runtime::spawn(
            runtime,
            adapter.name(),
            adapter.module_bytes(),
            argv,
            GuestLimits {
                // A session's guest process lives across many calls with
                // no single wall-clock deadline; `close()` is what ends
                // it. `tokio::time::sleep` panics past ~580 years, so this
                // stands in for "no timeout" without overflowing it.
                timeout: Duration::from_secs(60 * 60 * 24 * 365 * 10),
                // Fuel is consumed across the session's whole lifetime,
                // not replenished per call, so a session needs a much
                // larger budget than a single one-shot run.
                fuel: 100_000_000_000,
            },
        )?;

        let stdin: Arc<dyn GuestStdin> = Arc::new(guest.stdin.clone());
        let (codec, mut signal_rx) = ProtocolCodec::new(effective_registry, adapter.name(), stdin);
        let codec = Arc::new(codec);

        let stdout = Arc::new(StdoutBuffer(Mutex::new(Vec::new())));
        let mut stdout_rx = guest.stdout;
        let stdout_buffer = stdout.clone();
        let stdout_task = tokio::spawn(async move {
            while let Some(chunk) = stdout_rx.recv().await {
                stdout_buffer.0.lock().await.extend_from_slice(&chunk);
            }
        });

        let mut stderr_rx = guest.stderr;
        let codec_for_stderr = codec.clone();
        let stderr_task = tokio::spawn(async move {
            while let Some(chunk) = stderr_rx.recv().await {
                let _ = codec_for_stderr.feed(&chunk).await;
            }
        });

        match tokio::time::timeout(start_timeout, signal_rx.recv()).await {
            Ok(Some(Signal::Ready)) => {}
            Ok(Some(other)) => {
                stdout_task.abort();
                stderr_task.abort();
                guest.task.abort();
                return Err(EngineError::StartFailed(format!(
                    "expected ready signal, got {other:?}"
                )));
            }
            Ok(None) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(EngineError::StartFailed("guest closed before signaling ready".to_string()));
            }
            Err(_elapsed) => {
                stdout_task.abort();
                stderr_task.abort();
                guest.task.abort();
                return Err(EngineError::StartFailed(format!(
                    "no ready signal within {start_timeout:?}"
                )));
            }
        }

        Ok(Self {
            state: StdMutex::new(State::Ready),
            call_mutex: Mutex::new(()),
            call_timeout,
            stdin: guest.stdin,
            signal_rx: Mutex::new(signal_rx),
            codec,
            stdout,
            stderr_task,
            stdout_task,
            guest_task: StdMutex::new(Some(guest.task)),
            seq: AtomicU64::new(0),
        })
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if *self.state.lock().unwrap() == State::Closed {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    async fn write_command(&self, frame: &CommandFrame) -> EngineResult<()> {
        let mut bytes = serde_json::to_vec(frame)
            .map_err(|e| EngineError::ProtocolError(format!("failed to serialize command: {e}")))?;
        bytes.push(b'\n');
        self.stdin.write(bytes);
        Ok(())
    }

    async fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Run `code` in the session's persistent namespace.
    pub async fn run(&self, code: &str) -> EngineResult<RunResult> {
        self.run_inner(code, false).await
    }

    /// Like [`Session::run`], but instructs the guest to echo a trailing
    /// expression's value as `_`.
    pub async fn run_repl(&self, code: &str) -> EngineResult<RunResult> {
        self.run_inner(code, true).await
    }

    async fn run_inner(&self, code: &str, repl: bool) -> EngineResult<RunResult> {
        let _span = tracing::info_span!("session_call", repl).entered();
        let started = Instant::now();

        self.ensure_open()?;
        let _call_guard = self.call_mutex.lock().await;
        self.ensure_open()?;

        *self.state.lock().unwrap() = State::Busy;
        self.codec.begin_call().await;
        self.stdout.0.lock().await.clear();

        let seq = self.next_seq().await;
        self.write_command(&CommandFrame::Exec {
            code: code.to_string(),
            repl,
            seq,
        })
        .await?;

        let outcome = {
            let mut signal_rx = self.signal_rx.lock().await;
            tokio::time::timeout(self.call_timeout, async {
                loop {
                    match signal_rx.recv().await {
                        Some(Signal::Done) => break Ok(None),
                        Some(Signal::Error(msg)) => break Ok(Some(msg)),
                        Some(_other) => continue,
                        None => break Err(EngineError::Closed),
                    }
                }
            })
            .await
        };

        self.reset_to_ready_unless_closed();

        let error = match outcome {
            Ok(Ok(error)) => error,
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => Some(format!("timeout after {:?}", self.call_timeout)),
        };

        let stdout = { std::mem::take(&mut *self.stdout.0.lock().await) };
        let stderr = self.codec.take_output().await;

        Ok(RunResult::from_parts(&stdout, &stderr, started.elapsed(), error))
    }

    /// Move `Busy` back to `Ready` now that a call finished, unless a
    /// concurrent `close()` already moved the session to its terminal
    /// `Closed` state while the call was in flight — that transition must
    /// never be clobbered back open (spec.md §4.2/§8).
    fn reset_to_ready_unless_closed(&self) {
        reset_to_ready_unless_closed(&self.state);
    }

    /// Ask whether `code` parses as a complete statement block.
    pub async fn check_complete(&self, code: &str) -> EngineResult<bool> {
        let _span = tracing::info_span!("session_call", repl = false, check = true).entered();
        self.ensure_open()?;
        let _call_guard = self.call_mutex.lock().await;
        self.ensure_open()?;

        *self.state.lock().unwrap() = State::Busy;
        self.codec.begin_call().await;

        let seq = self.next_seq().await;
        self.write_command(&CommandFrame::Check {
            code: code.to_string(),
            seq,
        })
        .await?;

        let outcome = {
            let mut signal_rx = self.signal_rx.lock().await;
            tokio::time::timeout(self.call_timeout, async {
                loop {
                    match signal_rx.recv().await {
                        Some(Signal::Complete) => break Ok(true),
                        Some(Signal::Incomplete) => break Ok(false),
                        Some(_other) => continue,
                        None => break Err(EngineError::Closed),
                    }
                }
            })
            .await
        };

        self.reset_to_ready_unless_closed();

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => Err(EngineError::Timeout(self.call_timeout)),
        }
    }

    /// Idempotent. Closes the stdin pipe (guest observes EOF and
    /// terminates), then tears down the background tasks.
    pub async fn close(&self) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        if *state == State::Closed {
            return Ok(());
        }
        *state = State::Closed;
        drop(state);

        self.stdin.close();
        if let Some(task) = self.guest_task.lock().unwrap().take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
        self.stdout_task.abort();
        self.stderr_task.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_config_omits_package_install_when_not_allowed() {
        let options = SessionOptions::default();
        assert!(options.capability_config().package_install.is_none());
    }

    #[test]
    fn capability_config_includes_package_install_when_allowed() {
        let options = SessionOptions {
            allow_package_install: true,
            allowed_packages: vec!["requests".to_string()],
            ..Default::default()
        };
        let config = options.capability_config();
        assert!(config.package_install.is_some());
        assert_eq!(config.package_install.unwrap().allowed_packages, vec!["requests"]);
    }

    #[test]
    fn reset_to_ready_leaves_closed_state_alone() {
        let state = StdMutex::new(State::Closed);
        reset_to_ready_unless_closed(&state);
        assert_eq!(*state.lock().unwrap(), State::Closed);
    }

    #[test]
    fn reset_to_ready_reopens_busy_state() {
        let state = StdMutex::new(State::Busy);
        reset_to_ready_unless_closed(&state);
        assert_eq!(*state.lock().unwrap(), State::Ready);
    }
}

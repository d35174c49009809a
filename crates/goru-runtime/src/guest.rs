//! Spawns a single guest instance: compiles/instantiates the adapter's
//! module, wires WASI stdio to the [`pipes`] duplex streams, enforces
//! fuel, wall-clock, and linear-memory limits, and drives `_start` to
//! completion on a background task.
//!
//! The fuel/epoch setup mirrors
//! `openfang-runtime::sandbox::WasmSandbox::execute_sync`; the stdio
//! wiring is new, grounded on `crates/wasi/tests/all/piped.rs`'s
//! `StoreBuilder` usage.

use crate::engine::WasmRuntime;
use crate::pipes::{CapturedOutputPipe, GuestStdinPipe};
use goru_types::error::{EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;
use wasmtime::{Linker, ResourceLimiter, Store};
use wasmtime_wasi::p2::{ResourceTable, WasiCtx, WasiCtxBuilder, WasiView};

struct GuestState {
    table: ResourceTable,
    wasi: WasiCtx,
    max_memory_bytes: usize,
}

impl WasiView for GuestState {
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.table
    }
    fn ctx(&mut self) -> &mut WasiCtx {
        &mut self.wasi
    }
}

impl ResourceLimiter for GuestState {
    fn memory_growing(&mut self, _current: usize, desired: usize, _maximum: Option<usize>) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_memory_bytes)
    }

    fn table_growing(&mut self, _current: usize, desired: usize, maximum: Option<usize>) -> wasmtime::Result<bool> {
        Ok(maximum.map_or(true, |max| desired <= max))
    }
}

/// Host-side handles for a spawned guest: write to `stdin`, drain
/// `stdout`/`stderr`, and `await` `task` for guest exit.
pub struct GuestHandles {
    pub stdin: GuestStdinPipe,
    pub stdout: tokio::sync::mpsc::UnboundedReceiver<bytes::Bytes>,
    pub stderr: tokio::sync::mpsc::UnboundedReceiver<bytes::Bytes>,
    pub task: tokio::task::JoinHandle<EngineResult<()>>,
}

/// Fuel budget and wall-clock timeout applied to one guest instance.
#[derive(Debug, Clone, Copy)]
pub struct GuestLimits {
    pub fuel: u64,
    pub timeout: Duration,
}

impl Default for GuestLimits {
    fn default() -> Self {
        Self {
            fuel: 1_000_000_000,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Compile (if needed), instantiate, and start running `argv[0]` with
/// `argv` as its command-line arguments. `module_name` keys the
/// compiled-module cache; `module_bytes` is the interpreter binary.
pub fn spawn(
    runtime: Arc<WasmRuntime>,
    module_name: &str,
    module_bytes: &[u8],
    argv: Vec<String>,
    limits: GuestLimits,
) -> EngineResult<GuestHandles> {
    let module = runtime.module(module_name, module_bytes)?;

    let stdin = GuestStdinPipe::new();
    let (stdout_pipe, stdout_rx) = CapturedOutputPipe::new();
    let (stderr_pipe, stderr_rx) = CapturedOutputPipe::new();

    let mut builder = WasiCtxBuilder::new();
    builder.stdin(stdin.clone());
    builder.stdout(stdout_pipe);
    builder.stderr(stderr_pipe);
    for arg in &argv {
        builder.arg(arg);
    }
    let wasi = builder.build();

    let mut store = Store::new(
        runtime.engine(),
        GuestState {
            table: ResourceTable::new(),
            wasi,
            max_memory_bytes: runtime.max_memory.bytes() as usize,
        },
    );
    store
        .set_fuel(limits.fuel)
        .map_err(|e| EngineError::StartFailed(format!("fuel setup failed: {e}")))?;
    store.set_epoch_deadline(1);
    store.limiter(|state| state);

    let mut linker: Linker<GuestState> = Linker::new(runtime.engine());
    wasmtime_wasi::p2::preview1::add_to_linker_async(&mut linker, |state: &mut GuestState| state)
        .map_err(|e| EngineError::StartFailed(format!("wasi linker setup failed: {e}")))?;

    let watchdog = runtime.spawn_timeout(limits.timeout);

    let initial_fuel = limits.fuel;
    let task = tokio::spawn(async move {
        let result = run_to_completion(&mut linker, &mut store, &module, initial_fuel).await;
        watchdog.abort();
        result
    });

    Ok(GuestHandles {
        stdin,
        stdout: stdout_rx,
        stderr: stderr_rx,
        task,
    })
}

async fn run_to_completion(
    linker: &mut Linker<GuestState>,
    store: &mut Store<GuestState>,
    module: &wasmtime::Module,
    initial_fuel: u64,
) -> EngineResult<()> {
    let instance = {
        let _span = tracing::info_span!("instantiate").entered();
        linker
            .instantiate_async(&mut *store, module)
            .await
            .map_err(|e| EngineError::StartFailed(format!("instantiation failed: {e}")))?
    };
    let start = instance
        .get_typed_func::<(), ()>(&mut *store, "_start")
        .map_err(|e| EngineError::StartFailed(format!("module has no '_start' export: {e}")))?;

    let outcome = start.call_async(&mut *store, ()).await;
    let fuel_consumed = store.get_fuel().ok().map(|remaining| initial_fuel.saturating_sub(remaining));
    tracing::debug!(fuel_consumed, "guest run finished");

    match outcome {
        Ok(()) => Ok(()),
        Err(trap) => {
            if let Some(wasmtime::Trap::OutOfFuel) = trap.downcast_ref::<wasmtime::Trap>() {
                Err(EngineError::Timeout(Duration::ZERO))
            } else if let Some(wasmtime::Trap::Interrupt) = trap.downcast_ref::<wasmtime::Trap>() {
                Err(EngineError::Timeout(Duration::ZERO))
            } else if let Some(exit) = trap.downcast_ref::<wasmtime_wasi::p2::I32Exit>() {
                if exit.0 == 0 {
                    Ok(())
                } else {
                    Err(EngineError::GuestTrap(format!("guest exited with status {}", exit.0)))
                }
            } else {
                Err(EngineError::GuestTrap(trap.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WasmRuntime;
    use goru_types::mem::MemoryPages;

    // Declares one page of memory, then tries to grow by 1000 pages.
    // Writes "denied" to stderr if `memory.grow` reports failure (-1),
    // which is the only way the test can observe the limiter's decision
    // since the store itself isn't exposed back to the caller.
    const GROW_DENIED_WAT: &[u8] = br#"
        (module
            (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "\40\00\00\00\06\00\00\00")
            (data (i32.const 64) "denied")
            (func $_start (export "_start")
                (if (i32.lt_s (memory.grow (i32.const 1000)) (i32.const 0))
                    (then (drop (call $fd_write (i32.const 2) (i32.const 0) (i32.const 1) (i32.const 32))))
                )
            )
        )
    "#;

    #[tokio::test]
    async fn memory_growth_past_the_page_cap_is_denied() {
        let runtime = Arc::new(WasmRuntime::new(MemoryPages(1)).unwrap());
        let mut handles = spawn(runtime, "grow-denied", GROW_DENIED_WAT, vec![], GuestLimits::default()).unwrap();
        handles.task.await.unwrap().unwrap();
        let chunk = handles.stderr.recv().await.expect("stderr write");
        assert_eq!(&chunk[..], b"denied");
    }
}

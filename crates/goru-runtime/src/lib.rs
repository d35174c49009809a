//! WASM instance lifecycle: compiled-module cache, WASI stdio wiring,
//! and fuel/wall-clock enforcement for a single guest process.

pub mod engine;
pub mod guest;
pub mod pipes;

pub use engine::WasmRuntime;
pub use guest::{spawn, GuestHandles, GuestLimits};
pub use pipes::{CapturedOutputPipe, GuestStdinPipe};

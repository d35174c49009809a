//! Shared data types for the goru sandbox engine.
//!
//! This crate defines the wire formats, capability configuration, and error
//! taxonomy used across the protocol codec, the WASM runtime container, the
//! host-function handlers, and the executor/session. It contains no
//! business logic.

pub mod capability;
pub mod error;
pub mod mem;
pub mod wire;

pub use capability::{CapabilityConfig, FsLimits, HttpLimits, KvLimits, Mount, MountMode};
pub use error::{EngineError, EngineResult};
pub use mem::MemoryPages;
pub use wire::{CallRequest, CallResponse};

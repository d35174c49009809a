//! Error taxonomy for the goru sandbox engine.

use thiserror::Error;

/// Top-level error type returned to an embedding caller.
///
/// Engine errors (compile/trap/timeout/start failure) are returned here and
/// never re-entered. Handler errors cross into the guest as exceptions and
/// only surface here if a caller asks for the underlying detail.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// The guest module did not compile.
    #[error("compile failed: {0}")]
    CompileFailed(String),

    /// A session failed to reach `Ready` before its start timeout.
    #[error("session failed to start: {0}")]
    StartFailed(String),

    /// The operation was attempted on a closed session.
    #[error("session is closed")]
    Closed,

    /// A per-call deadline was exceeded.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The guest died with a runtime trap.
    #[error("execution failed: {0}")]
    GuestTrap(String),

    /// A malformed frame or missing terminator was seen on the codec.
    /// Logged and absorbed inside the codec; surfaced here only for tests.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A host handler returned an error, propagated verbatim.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// The operation was denied by capability policy.
    #[error("capability denied: {0}")]
    CapabilityDenied(String),

    /// An I/O error occurred wiring up guest pipes.
    #[error("io error: {0}")]
    Io(String),

    /// A configuration value was invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

/// Alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;

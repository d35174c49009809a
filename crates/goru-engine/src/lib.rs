//! Embeddable WASM execution engine: one-shot runs and persistent
//! sessions over sandboxed Python/JavaScript guests, with a
//! capability-gated host-call bridge multiplexed over guest stderr.

pub mod config;
pub mod executor;
pub mod session;

pub use config::{load_config, EngineConfig};
pub use executor::{Executor, ExecutorOptions, PerRunOptions};
pub use goru_types::capability::{CapabilityConfig, FsLimits, HttpLimits, KvLimits, Mount, MountMode};
pub use goru_types::error::{EngineError, EngineResult};
pub use goru_types::mem::MemoryPages;
pub use session::{Session, SessionOptions};

/// Output of a single guest invocation: captured stdout and real
/// (non-framed) stderr concatenated in that order, the wall-clock time
/// the guest ran for, and an error message if the guest trapped, timed
/// out, or exited non-zero.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RunResult {
    pub output: String,
    #[serde(with = "duration_secs_f64")]
    pub duration: std::time::Duration,
    pub error: Option<String>,
}

impl RunResult {
    /// Assemble a result from the guest's stdout bytes and the codec's
    /// real-stderr accumulator, concatenated stdout-then-stderr per
    /// spec.md §3.
    pub fn from_parts(stdout: &[u8], stderr: &[u8], duration: std::time::Duration, error: Option<String>) -> Self {
        let mut output = String::from_utf8_lossy(stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(stderr));
        Self { output, duration, error }
    }

    /// Whether the guest finished without error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// `Duration` as fractional seconds, for a human-legible `RunResult` wire
/// form (mirrors `goru_types::capability`'s `duration_secs`, but keeps
/// sub-second precision since a run's duration is usually well under a
/// second).
mod duration_secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs_f64(f64::deserialize(d)?))
    }
}

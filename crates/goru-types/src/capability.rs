//! Capability-based security types: deny-by-default configuration for the
//! KV store, HTTP client, mounted filesystem, and package installer.
//!
//! Capabilities are immutable after a run/session starts and enforced by
//! the handlers in `goru-capabilities`, never by guest code.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Deny-by-default capability configuration handed to the Executor for a
/// single run or session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Hosts (or parent domains) the `http_request` handler may reach.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Virtual→host path mappings for the `fs_*` handlers.
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// KV store bounds. `None` disables the KV handlers entirely.
    #[serde(default)]
    pub kv_limits: Option<KvLimits>,
    /// HTTP request/response bounds.
    #[serde(default)]
    pub http_limits: Option<HttpLimits>,
    /// FS read/write/path-length bounds.
    #[serde(default)]
    pub fs_limits: Option<FsLimits>,
    /// Whether `install_pkg` is enabled for this run/session.
    #[serde(default)]
    pub package_install: Option<PackageInstallConfig>,
}

/// A single virtual→host filesystem mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    /// Absolute, canonicalized virtual path the guest sees (e.g. `/data`).
    pub virtual_path: String,
    /// Real filesystem path this mount resolves to.
    pub host_path: std::path::PathBuf,
    /// Permission mode granted to this mount.
    pub mode: MountMode,
}

/// Permission mode of a [`Mount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    /// Reads only; any write is rejected.
    ReadOnly,
    /// Reads and writes to paths that already exist; no new paths.
    ReadWrite,
    /// Reads, writes, and creation of new paths under the mount root.
    ReadWriteCreate,
}

impl MountMode {
    /// Whether this mode permits writing to an existing path.
    pub fn allows_write(self) -> bool {
        matches!(self, MountMode::ReadWrite | MountMode::ReadWriteCreate)
    }

    /// Whether this mode permits creating a path that does not yet exist.
    pub fn allows_create(self) -> bool {
        matches!(self, MountMode::ReadWriteCreate)
    }
}

impl FromStr for MountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ro" => Ok(MountMode::ReadOnly),
            "rw" => Ok(MountMode::ReadWrite),
            "rwc" => Ok(MountMode::ReadWriteCreate),
            other => Err(format!("unknown mount mode: {other}")),
        }
    }
}

/// Parse the command-line mount spec text form: `virtual:host:mode`.
impl FromStr for Mount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        let [virtual_path, host_path, mode] = parts.as_slice() else {
            return Err(format!(
                "mount spec must be 'virtual:host:mode', got: {s}"
            ));
        };
        if !virtual_path.starts_with('/') {
            return Err(format!("mount virtual path must be absolute: {virtual_path}"));
        }
        Ok(Mount {
            virtual_path: virtual_path.to_string(),
            host_path: std::path::PathBuf::from(host_path),
            mode: mode.parse()?,
        })
    }
}

/// Bounds on the per-session/per-run KV store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KvLimits {
    /// Maximum key length in bytes.
    pub max_key: usize,
    /// Maximum value length in bytes.
    pub max_value: usize,
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Maximum aggregate bytes across all keys and values.
    pub max_total_bytes: usize,
}

impl Default for KvLimits {
    fn default() -> Self {
        Self {
            max_key: 256,
            max_value: 64 * 1024,
            max_entries: 1024,
            max_total_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Bounds on `http_request` calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HttpLimits {
    /// Maximum URL length in bytes.
    pub max_url_len: usize,
    /// Maximum request body size in bytes.
    pub max_request_body: usize,
    /// Maximum response body size read from the wire.
    pub max_response_body: usize,
    /// Per-request timeout.
    #[serde(with = "duration_secs")]
    pub timeout: std::time::Duration,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_url_len: 4096,
            max_request_body: 1024 * 1024,
            max_response_body: 4 * 1024 * 1024,
            timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Bounds on `fs_*` calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FsLimits {
    /// Maximum bytes read in one `fs_read`.
    pub max_read_bytes: usize,
    /// Maximum bytes written in one `fs_write`.
    pub max_write_bytes: usize,
    /// Maximum virtual path length in bytes.
    pub max_path_len: usize,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_read_bytes: 16 * 1024 * 1024,
            max_write_bytes: 16 * 1024 * 1024,
            max_path_len: 1024,
        }
    }
}

/// Configuration for the optional `install_pkg` handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageInstallConfig {
    /// Directory packages are installed into; sandboxed per session.
    pub packages_path: std::path::PathBuf,
    /// If non-empty, only packages matching one of these names (optionally
    /// with an `[extras]` suffix) may be installed.
    #[serde(default)]
    pub allowed_packages: Vec<String>,
}

/// Whether `host` is permitted by `allowed_hosts`.
///
/// An allow-list entry matches itself exactly, and also matches any strict
/// subdomain (`example.com` covers `api.example.com` but not
/// `evilexample.com`).
pub fn host_allowed(allowed_hosts: &[String], host: &str) -> bool {
    allowed_hosts.iter().any(|allowed| {
        host == allowed || host.ends_with(&format!(".{allowed}"))
    })
}


mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

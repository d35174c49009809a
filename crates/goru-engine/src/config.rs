//! TOML configuration loading with defaults, modeled on
//! `openfang-kernel::config::load_config` (same fallback-to-defaults
//! behavior on any read/parse/deserialize failure, same `tracing`
//! breadcrumbs; dropped that function's config-include merging, which
//! no engine option needs).

use goru_types::capability::CapabilityConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level engine configuration, typically loaded from
/// `~/.goru/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory compiled modules are cached to on disk. `None` leaves
    /// the location to [`crate::Executor::new`]'s OS-appropriate default
    /// (XDG cache dir / user home cache / temp fallback) rather than
    /// turning persistence off — the disk cache tier is always active.
    #[serde(default)]
    pub disk_cache_dir: Option<PathBuf>,
    /// Linear memory page cap applied to every guest instance.
    #[serde(default)]
    pub memory_limit_pages: goru_types::mem::MemoryPages,
    /// Default per-run timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Default session start timeout in seconds.
    #[serde(default = "default_start_timeout_secs")]
    pub session_start_timeout_secs: u64,
    /// Default capability grants applied when a caller does not override
    /// them per-run.
    #[serde(default)]
    pub default_capabilities: CapabilityConfig,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_start_timeout_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disk_cache_dir: None,
            memory_limit_pages: goru_types::mem::MemoryPages::default(),
            default_timeout_secs: default_timeout_secs(),
            session_start_timeout_secs: default_start_timeout_secs(),
            default_capabilities: CapabilityConfig::default(),
        }
    }
}

/// Load engine configuration from `path`, falling back to
/// `~/.goru/config.toml` and finally to defaults on any failure.
pub fn load_config(path: Option<&Path>) -> EngineConfig {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

    if !config_path.exists() {
        tracing::info!(path = %config_path.display(), "config file not found, using defaults");
        return EngineConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, path = %config_path.display(), "failed to read config file, using defaults");
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&contents) {
        Ok(config) => {
            tracing::info!(path = %config_path.display(), "loaded configuration");
            config
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %config_path.display(), "failed to parse config, using defaults");
            EngineConfig::default()
        }
    }
}

impl EngineConfig {
    /// Build [`crate::ExecutorOptions`] from this configuration. Callers
    /// that need precompiled adapters still set
    /// `precompile_adapters` themselves afterward.
    pub fn executor_options(&self) -> crate::ExecutorOptions {
        crate::ExecutorOptions {
            disk_cache: self.disk_cache_dir.clone(),
            precompile_adapters: Vec::new(),
            memory_limit_pages: Some(self.memory_limit_pages),
        }
    }
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".goru").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".goru/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/goru-config.toml")));
        assert_eq!(config.default_timeout_secs, 30);
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.session_start_timeout_secs, 10);
    }

    #[test]
    fn valid_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_timeout_secs = 5\n").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.default_timeout_secs, 5);
    }

    #[test]
    fn executor_options_carries_disk_cache_dir_through() {
        let mut config = EngineConfig::default();
        config.disk_cache_dir = Some(PathBuf::from("/tmp/goru-cache"));
        let options = config.executor_options();
        assert_eq!(options.disk_cache, Some(PathBuf::from("/tmp/goru-cache")));
        assert_eq!(options.memory_limit_pages, Some(config.memory_limit_pages));
    }
}

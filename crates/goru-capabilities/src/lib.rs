//! Capability-gated host function handlers.
//!
//! Each handler is deny-by-default: [`build_registry`] only registers a
//! function once the run/session's [`CapabilityConfig`] grants the
//! capability it gates. `time_now` is the single exception, always
//! present.

pub mod fs;
pub mod http;
pub mod kv;
pub mod pkg;
pub mod time;

pub use kv::KvStore;

use goru_registry::Registry;
use goru_types::capability::CapabilityConfig;
use std::sync::Arc;

/// Build a [`Registry`] of the host functions `config` grants, layered
/// over nothing — callers combine this with a base registry of
/// user-supplied handlers via [`Registry::layered`].
pub fn build_registry(config: &CapabilityConfig) -> Registry {
    let registry = Registry::new();
    registry.register("time_now", Arc::new(time::TimeNow));

    if let Some(limits) = config.kv_limits {
        let store = Arc::new(KvStore::new(limits));
        registry.register("kv_get", Arc::new(kv::KvGet(store.clone())));
        registry.register("kv_set", Arc::new(kv::KvSet(store.clone())));
        registry.register("kv_delete", Arc::new(kv::KvDelete(store.clone())));
        registry.register("kv_keys", Arc::new(kv::KvKeys(store)));
    }

    if let Some(limits) = config.http_limits {
        registry.register(
            "http_request",
            Arc::new(http::HttpRequest::new(config.allowed_hosts.clone(), limits)),
        );
    }

    if let Some(limits) = config.fs_limits {
        registry.register(
            "fs_read",
            Arc::new(fs::FsRead {
                mounts: config.mounts.clone(),
                limits,
            }),
        );
        registry.register(
            "fs_write",
            Arc::new(fs::FsWrite {
                mounts: config.mounts.clone(),
                limits,
            }),
        );
        registry.register(
            "fs_list",
            Arc::new(fs::FsList {
                mounts: config.mounts.clone(),
                limits,
            }),
        );
        registry.register(
            "fs_exists",
            Arc::new(fs::FsExists {
                mounts: config.mounts.clone(),
            }),
        );
        registry.register(
            "fs_mkdir",
            Arc::new(fs::FsMkdir {
                mounts: config.mounts.clone(),
                limits,
            }),
        );
        registry.register(
            "fs_remove",
            Arc::new(fs::FsRemove {
                mounts: config.mounts.clone(),
            }),
        );
        registry.register(
            "fs_stat",
            Arc::new(fs::FsStat {
                mounts: config.mounts.clone(),
            }),
        );
    }

    registry.register(
        "install_pkg",
        Arc::new(pkg::InstallPackage {
            config: config.package_install.clone(),
        }),
    );

    registry
}

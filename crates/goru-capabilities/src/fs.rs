//! Mounted virtual filesystem.
//!
//! Guest paths are always virtual (`/data/input.txt`) and are resolved
//! against a fixed list of [`Mount`]s into real host paths. Grounded on
//! the teacher's `safe_resolve_path` / `safe_resolve_parent`: reject any
//! `..` component outright, then canonicalize and re-check that the
//! result still lives under the mount's host root, so a symlink planted
//! inside the mount can't be used to escape it.

use async_trait::async_trait;
use goru_registry::{HostContext, HostFn};
use goru_types::capability::{FsLimits, Mount, MountMode};
use goru_types::error::{EngineError, EngineResult};
use serde_json::{json, Value};
use std::collections::BTreeMap as ArgMap;
use std::path::{Component, Path, PathBuf};

fn reject_traversal(virtual_path: &str) -> EngineResult<()> {
    for component in Path::new(virtual_path).components() {
        if matches!(component, Component::ParentDir) {
            return Err(EngineError::CapabilityDenied(
                "path traversal denied: '..' components forbidden".to_string(),
            ));
        }
    }
    Ok(())
}

fn find_mount<'a>(mounts: &'a [Mount], virtual_path: &str) -> Option<&'a Mount> {
    mounts
        .iter()
        .filter(|m| {
            virtual_path == m.virtual_path
                || virtual_path.starts_with(&format!("{}/", m.virtual_path.trim_end_matches('/')))
        })
        .max_by_key(|m| m.virtual_path.len())
}

/// Resolve `virtual_path` to a real host path inside its mount, verifying
/// the mount's access mode permits the requested operation and that
/// canonicalization keeps the result under the mount root.
fn resolve(mounts: &[Mount], virtual_path: &str, need_write: bool, must_exist: bool) -> EngineResult<PathBuf> {
    tracing::debug!(virtual_path, need_write, "fs resolve");
    reject_traversal(virtual_path)?;
    let mount = find_mount(mounts, virtual_path)
        .ok_or_else(|| EngineError::CapabilityDenied(format!("no mount covers path: {virtual_path}")))?;
    if need_write && !mount.mode.allows_write() {
        return Err(EngineError::CapabilityDenied(format!(
            "mount {} is read-only",
            mount.virtual_path
        )));
    }
    let relative = virtual_path
        .strip_prefix(&mount.virtual_path)
        .unwrap_or(virtual_path)
        .trim_start_matches('/');
    let host_target = mount.host_path.join(relative);

    let canonical_root = std::fs::canonicalize(&mount.host_path)
        .map_err(|e| EngineError::HandlerError(format!("cannot resolve mount root: {e}")))?;

    if must_exist || host_target.exists() {
        let canonical = std::fs::canonicalize(&host_target)
            .map_err(|e| EngineError::HandlerError(format!("cannot resolve path: {e}")))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(EngineError::CapabilityDenied(
                "path traversal denied: resolved path escapes mount".to_string(),
            ));
        }
        return Ok(canonical);
    }

    if !mount.mode.allows_create() {
        return Err(EngineError::CapabilityDenied(format!(
            "mount {} does not allow creating new files",
            mount.virtual_path
        )));
    }
    let parent = host_target
        .parent()
        .ok_or_else(|| EngineError::HandlerError("invalid path: no parent directory".to_string()))?;
    let canonical_parent = std::fs::canonicalize(parent)
        .map_err(|e| EngineError::HandlerError(format!("cannot resolve parent directory: {e}")))?;
    if !canonical_parent.starts_with(&canonical_root) {
        return Err(EngineError::CapabilityDenied(
            "path traversal denied: resolved path escapes mount".to_string(),
        ));
    }
    let file_name = host_target
        .file_name()
        .ok_or_else(|| EngineError::HandlerError("invalid path: no file name".to_string()))?;
    Ok(canonical_parent.join(file_name))
}

fn require_path(args: &ArgMap<String, Value>) -> EngineResult<&str> {
    args.get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::HandlerError("missing 'path' parameter".to_string()))
}

fn check_path_len(path: &str, limits: &FsLimits) -> EngineResult<()> {
    if path.len() > limits.max_path_len {
        return Err(EngineError::CapabilityDenied("path too long".to_string()));
    }
    Ok(())
}

pub struct FsRead {
    pub mounts: Vec<Mount>,
    pub limits: FsLimits,
}
#[async_trait]
impl HostFn for FsRead {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let path = require_path(&args)?;
        check_path_len(path, &self.limits)?;
        let host_path = resolve(&self.mounts, path, false, true)?;
        let bytes = std::fs::read(&host_path).map_err(|e| EngineError::Io(e.to_string()))?;
        if bytes.len() > self.limits.max_read_bytes {
            return Err(EngineError::CapabilityDenied("file too large to read".to_string()));
        }
        Ok(json!(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

pub struct FsWrite {
    pub mounts: Vec<Mount>,
    pub limits: FsLimits,
}
#[async_trait]
impl HostFn for FsWrite {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let path = require_path(&args)?;
        check_path_len(path, &self.limits)?;
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::HandlerError("missing 'content' parameter".to_string()))?;
        if content.len() > self.limits.max_write_bytes {
            return Err(EngineError::CapabilityDenied("write too large".to_string()));
        }
        let host_path = resolve(&self.mounts, path, true, false)?;
        std::fs::write(&host_path, content).map_err(|e| EngineError::Io(e.to_string()))?;
        Ok(Value::from("ok"))
    }
}

pub struct FsList {
    pub mounts: Vec<Mount>,
    pub limits: FsLimits,
}
#[async_trait]
impl HostFn for FsList {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let path = require_path(&args)?;
        check_path_len(path, &self.limits)?;
        let host_path = resolve(&self.mounts, path, false, true)?;
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&host_path).map_err(|e| EngineError::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Io(e.to_string()))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(json!(names))
    }
}

pub struct FsExists {
    pub mounts: Vec<Mount>,
}
#[async_trait]
impl HostFn for FsExists {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let path = require_path(&args)?;
        let exists = resolve(&self.mounts, path, false, true).is_ok();
        Ok(json!(exists))
    }
}

pub struct FsMkdir {
    pub mounts: Vec<Mount>,
    pub limits: FsLimits,
}
#[async_trait]
impl HostFn for FsMkdir {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let path = require_path(&args)?;
        check_path_len(path, &self.limits)?;
        let host_path = resolve(&self.mounts, path, true, false)?;
        std::fs::create_dir_all(&host_path).map_err(|e| EngineError::Io(e.to_string()))?;
        Ok(Value::from("ok"))
    }
}

pub struct FsRemove {
    pub mounts: Vec<Mount>,
}
#[async_trait]
impl HostFn for FsRemove {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let path = require_path(&args)?;
        let host_path = resolve(&self.mounts, path, true, true)?;
        if host_path.is_dir() {
            std::fs::remove_dir(&host_path).map_err(|e| EngineError::Io(e.to_string()))?;
        } else {
            std::fs::remove_file(&host_path).map_err(|e| EngineError::Io(e.to_string()))?;
        }
        Ok(Value::from("ok"))
    }
}

pub struct FsStat {
    pub mounts: Vec<Mount>,
}
#[async_trait]
impl HostFn for FsStat {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let path = require_path(&args)?;
        let host_path = resolve(&self.mounts, path, false, true)?;
        let meta = std::fs::metadata(&host_path).map_err(|e| EngineError::Io(e.to_string()))?;
        Ok(json!({
            "is_dir": meta.is_dir(),
            "is_file": meta.is_file(),
            "len": meta.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(tmp: &std::path::Path, mode: MountMode) -> Mount {
        Mount {
            virtual_path: "/data".to_string(),
            host_path: tmp.to_path_buf(),
            mode,
        }
    }

    #[test]
    fn resolves_file_inside_mount() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let mounts = vec![mount(dir.path(), MountMode::ReadOnly)];
        let resolved = resolve(&mounts, "/data/a.txt", false, true).unwrap();
        assert_eq!(std::fs::read_to_string(resolved).unwrap(), "hi");
    }

    #[test]
    fn rejects_dotdot_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mounts = vec![mount(dir.path(), MountMode::ReadOnly)];
        assert!(resolve(&mounts, "/data/../secret", false, true).is_err());
    }

    #[test]
    fn rejects_write_on_read_only_mount() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let mounts = vec![mount(dir.path(), MountMode::ReadOnly)];
        assert!(resolve(&mounts, "/data/a.txt", true, true).is_err());
    }

    #[test]
    fn rejects_create_without_rwc_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mounts = vec![mount(dir.path(), MountMode::ReadWrite)];
        assert!(resolve(&mounts, "/data/new.txt", true, false).is_err());
    }

    #[test]
    fn allows_create_with_rwc_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mounts = vec![mount(dir.path(), MountMode::ReadWriteCreate)];
        let resolved = resolve(&mounts, "/data/new.txt", true, false).unwrap();
        assert!(resolved.starts_with(dir.path()));
    }

    #[test]
    fn rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "nope").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt")).unwrap();
        #[cfg(unix)]
        {
            let mounts = vec![mount(dir.path(), MountMode::ReadOnly)];
            assert!(resolve(&mounts, "/data/link.txt", false, true).is_err());
        }
    }

    #[test]
    fn no_mount_covers_path_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let mounts = vec![mount(dir.path(), MountMode::ReadOnly)];
        assert!(resolve(&mounts, "/other/a.txt", false, true).is_err());
    }
}

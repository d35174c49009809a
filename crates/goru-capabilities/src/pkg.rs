//! Optional package installer. Disabled unless the run's capability
//! config enables it.
//!
//! `Command::new` never goes through a shell, so the package name reaches
//! the installer binary as a single argument, not a shell command line —
//! that rules out shell metacharacter injection. It does not rule out pip
//! itself misreading a crafted package spec as one of its own CLI options
//! (e.g. a spec starting with `--index-url=...` arriving as `install_pkg`'s
//! final argv entry), so the deny-list below guards against that
//! independently of the allow-list membership check.

use async_trait::async_trait;
use goru_registry::{HostContext, HostFn};
use goru_types::capability::PackageInstallConfig;
use goru_types::error::{EngineError, EngineResult};
use serde_json::{json, Value};
use std::collections::BTreeMap as ArgMap;

/// Characters that have no business in a package name/version and would
/// either be shell-special or change how `pip` parses its argv.
const DENIED_CHARS: &[char] = &[';', '&', '|', '$', '`', '>', '<', '\n', '\r', '(', ')', '{', '}', '\\', '"', '\''];

fn base_name(spec: &str) -> &str {
    spec.split(['[', '=', '<', '>', '!', '~']).next().unwrap_or(spec).trim()
}

/// Whether `spec` passes the unconditional deny-list: no shell
/// metacharacters, and not shaped like a pip CLI option.
fn package_spec_safe(spec: &str) -> bool {
    !spec.chars().any(|c| DENIED_CHARS.contains(&c)) && !spec.trim_start().starts_with('-')
}

/// Whether `spec` is permitted by `allowed`. An empty allow-list imposes
/// no constraint — only the deny-list applies in that case.
fn package_allowed(allowed: &[String], spec: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let base = base_name(spec);
    allowed.iter().any(|a| base_name(a) == base)
}

pub struct InstallPackage {
    pub config: Option<PackageInstallConfig>,
}

#[async_trait]
impl HostFn for InstallPackage {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EngineError::CapabilityDenied("package installation not enabled".to_string()))?;
        let package = args
            .get("package")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::HandlerError("missing 'package' parameter".to_string()))?;
        if !package_spec_safe(package) {
            return Err(EngineError::CapabilityDenied(format!("package spec rejected: {package}")));
        }
        if !package_allowed(&config.allowed_packages, package) {
            return Err(EngineError::CapabilityDenied(format!(
                "package not allowed: {}",
                base_name(package)
            )));
        }
        let output = tokio::process::Command::new("pip")
            .arg("install")
            .arg("--target")
            .arg(&config.packages_path)
            .arg(package)
            .output()
            .await
            .map_err(|e| EngineError::HandlerError(format!("install failed to start: {e}")))?;
        if !output.status.success() {
            return Err(EngineError::HandlerError(format!(
                "install failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(json!({"installed": base_name(package)}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_strips_version_and_extras() {
        assert_eq!(base_name("requests[socks]>=2.0"), "requests");
        assert_eq!(base_name("numpy==1.26"), "numpy");
        assert_eq!(base_name("httpx"), "httpx");
    }

    #[test]
    fn package_allowed_matches_base_name_only() {
        let allowed = vec!["requests".to_string()];
        assert!(package_allowed(&allowed, "requests[socks]>=2.0"));
        assert!(!package_allowed(&allowed, "flask"));
    }

    #[test]
    fn empty_allow_list_imposes_no_constraint() {
        assert!(package_allowed(&[], "requests"));
        assert!(package_allowed(&[], "anything-at-all==1.0"));
    }

    #[test]
    fn deny_list_rejects_shell_metacharacters() {
        assert!(!package_spec_safe("requests; rm -rf /"));
        assert!(!package_spec_safe("requests`whoami`"));
        assert!(!package_spec_safe("requests$(whoami)"));
        assert!(package_spec_safe("requests[socks]>=2.0"));
    }

    #[test]
    fn deny_list_rejects_option_like_specs() {
        assert!(!package_spec_safe("--index-url=http://evil.example/"));
        assert!(!package_spec_safe("-e git+https://evil.example/repo"));
        assert!(package_spec_safe("numpy==1.26"));
    }
}

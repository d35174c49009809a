//! Metadata describing a guest interpreter: its module bytes, the
//! host-call-bridge prelude injected ahead of guest code, the session-mode
//! init snippet, and how to build its launch argv.
//!
//! `LanguageAdapter` is deliberately the only polymorphism point in the
//! engine — five small accessors — so that adding a language adds no
//! branches anywhere else in the core.

use goru_types::error::{EngineError, EngineResult};
use std::path::Path;
use std::sync::Arc;

/// Description of a guest language interpreter.
///
/// `module_bytes` are the compiled WASM interpreter binary. Real
/// interpreter binaries (CPython-on-WASI, QuickJS-on-WASI, …) are
/// external build artifacts this crate does not produce; callers load
/// them from disk with [`WasmAdapter::from_module_path`] or hand them in
/// directly with [`WasmAdapter::new`].
pub trait LanguageAdapter: Send + Sync {
    /// Stable name; uniquely keys the compiled-module cache.
    fn name(&self) -> &str;
    /// The interpreter's compiled WASM module bytes.
    fn module_bytes(&self) -> &[u8];
    /// Source injected ahead of guest code in every run.
    fn prelude_source(&self) -> &str;
    /// Source appended after the prelude only in session mode, instead of
    /// guest code — enters the command read-loop.
    fn session_init(&self) -> &str;
    /// Build the guest's launch argv from its full source (prelude and,
    /// for one-shot runs, code concatenated by the caller).
    fn argv(&self, full_source: &str) -> Vec<String>;
}

/// A `LanguageAdapter` backed by an in-memory module and a fixed argv
/// template, shared by the Python and JavaScript adapters.
#[derive(Clone)]
pub struct WasmAdapter {
    name: Arc<str>,
    module_bytes: Arc<[u8]>,
    prelude_source: Arc<str>,
    session_init: Arc<str>,
    argv_template: fn(&str) -> Vec<String>,
}

impl WasmAdapter {
    /// Build an adapter from module bytes already in memory.
    pub fn new(
        name: impl Into<Arc<str>>,
        module_bytes: impl Into<Arc<[u8]>>,
        prelude_source: impl Into<Arc<str>>,
        session_init: impl Into<Arc<str>>,
        argv_template: fn(&str) -> Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            module_bytes: module_bytes.into(),
            prelude_source: prelude_source.into(),
            session_init: session_init.into(),
            argv_template,
        }
    }

    /// Read module bytes from `path` on disk, keeping everything else
    /// from `template`.
    pub fn from_module_path(path: &Path, template: &WasmAdapter) -> EngineResult<Self> {
        let module_bytes = std::fs::read(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {e}", path.display())))?;
        Ok(Self {
            module_bytes: module_bytes.into(),
            ..template.clone()
        })
    }

    /// The Python adapter template. `module_bytes` is empty until loaded
    /// with [`WasmAdapter::from_module_path`] — the real CPython-on-WASI
    /// binary is a build artifact outside this crate's scope.
    pub fn python_template() -> Self {
        Self::new(
            "python",
            Vec::new(),
            include_str!("../preludes/python_prelude.py"),
            include_str!("../preludes/python_session_init.py"),
            |full_source| vec!["python".to_string(), "-c".to_string(), full_source.to_string()],
        )
    }

    /// The JavaScript adapter template, analogous to
    /// [`WasmAdapter::python_template`].
    pub fn javascript_template() -> Self {
        Self::new(
            "javascript",
            Vec::new(),
            include_str!("../preludes/js_prelude.js"),
            include_str!("../preludes/js_session_init.js"),
            |full_source| vec!["qjs".to_string(), "-e".to_string(), full_source.to_string()],
        )
    }
}

impl LanguageAdapter for WasmAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn module_bytes(&self) -> &[u8] {
        &self.module_bytes
    }

    fn prelude_source(&self) -> &str {
        &self.prelude_source
    }

    fn session_init(&self) -> &str {
        &self.session_init
    }

    fn argv(&self, full_source: &str) -> Vec<String> {
        (self.argv_template)(full_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_template_argv_wraps_source() {
        let adapter = WasmAdapter::python_template();
        assert_eq!(adapter.name(), "python");
        let argv = adapter.argv("print(1)");
        assert_eq!(argv, vec!["python", "-c", "print(1)"]);
    }

    #[test]
    fn from_module_path_preserves_prelude_and_replaces_bytes() {
        let template = WasmAdapter::python_template();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"\0asm\x01\0\0\0").unwrap();
        let adapter = WasmAdapter::from_module_path(file.path(), &template).unwrap();
        assert_eq!(adapter.module_bytes(), b"\0asm\x01\0\0\0");
        assert_eq!(adapter.prelude_source(), template.prelude_source());
    }

    #[test]
    fn javascript_template_has_distinct_name_and_argv() {
        let adapter = WasmAdapter::javascript_template();
        assert_eq!(adapter.name(), "javascript");
        assert_eq!(adapter.argv("1+1"), vec!["qjs", "-e", "1+1"]);
    }
}

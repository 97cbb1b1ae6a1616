use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{JudgeError, Result};
use crate::language::{SpjCompileConfig, SpjConfig, SpjKey};
use crate::sandbox::Compiler;
use crate::workspace::Ownership;

/// Checker sources: owner may write, compiler group may only read
pub const SPJ_SRC_MODE: u32 = 0o640;
/// Compiled checkers can only be read and run by owner and group
pub const SPJ_EXE_MODE: u32 = 0o550;

/// On-disk store of compiled special judges, keyed by [`SpjKey`]
///
/// An executable that exists in the store is trusted and never rebuilt.
/// Entries are only ever added; nothing here deletes them.
pub struct SpjCache {
    src_dir: PathBuf,
    exe_dir: PathBuf,
    ownership: Ownership,
    compiler: Arc<dyn Compiler>,
    /// One lock per key so concurrent first uses compile only once
    in_flight: Mutex<HashMap<SpjKey, Arc<Mutex<()>>>>,
}

impl SpjCache {
    pub fn new(
        src_dir: impl Into<PathBuf>,
        exe_dir: impl Into<PathBuf>,
        ownership: Ownership,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        Self {
            src_dir: src_dir.into(),
            exe_dir: exe_dir.into(),
            ownership,
            compiler,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Where the checker described by `config` lives for this key
    pub fn exe_path(&self, key: &SpjKey, config: &SpjConfig) -> Result<PathBuf> {
        Ok(self.exe_dir.join(key.file_name(&config.exe_name)?))
    }

    /// Returns the cached checker for `key`, compiling it first if it is absent
    pub fn ensure_compiled(
        &self,
        key: &SpjKey,
        src: &str,
        config: &SpjCompileConfig,
    ) -> Result<PathBuf> {
        let resolved = config.resolve(key)?;
        let exe_path = self.exe_dir.join(&resolved.exe_name);

        // Held across the existence check so a half-written executable is never handed out
        let key_lock = self.in_flight.lock().entry(key.clone()).or_default().clone();
        let _guard = key_lock.lock();

        if exe_path.is_file() {
            log::debug!("Reusing cached checker {}", exe_path.display());
            return Ok(exe_path);
        }

        let src_path = self.src_dir.join(&resolved.src_name);
        if !src_path.exists() {
            self.write_source(&src_path, src)?;
        }

        log::info!(
            "Compiling checker version {} for test case {}",
            key.version,
            key.test_case_id
        );
        let exe_path = self
            .compiler
            .compile(&resolved, &src_path, &self.exe_dir)
            .map_err(JudgeError::into_spj)?;
        fs::set_permissions(&exe_path, fs::Permissions::from_mode(SPJ_EXE_MODE))?;

        Ok(exe_path)
    }

    /// Creates the source with its final mode and ownership before any content lands
    ///
    /// A file that cannot be fully set up is removed again, so the next call
    /// retries instead of trusting it.
    fn write_source(&self, src_path: &Path, src: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(SPJ_SRC_MODE)
            .open(src_path)?;

        let written = self
            .ownership
            .apply(src_path, SPJ_SRC_MODE)
            .and_then(|()| file.write_all(src.as_bytes()));

        written.map_err(|e| {
            log::error!("Failed to set up checker source {}: {e}", src_path.display());
            if let Err(e) = fs::remove_file(src_path) {
                log::error!("Failed to remove checker source {}: {e}", src_path.display());
            }
            JudgeError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::language::CompileConfig;

    /// Copies the source to the executable name and counts invocations
    #[derive(Default)]
    struct CountingCompiler {
        calls: AtomicUsize,
        fail_with: Option<String>,
    }

    impl Compiler for CountingCompiler {
        fn compile(
            &self,
            config: &CompileConfig,
            src_path: &Path,
            output_dir: &Path,
        ) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            if let Some(message) = &self.fail_with {
                return Err(JudgeError::Compile(message.clone()));
            }
            let exe = output_dir.join(&config.exe_name);
            fs::copy(src_path, &exe)?;
            Ok(exe)
        }
    }

    fn compile_config() -> SpjCompileConfig {
        serde_json::from_value(serde_json::json!({
            "src_name": "spj-{spj_version}.c",
            "exe_name": "spj-{spj_version}",
            "compile_command": "/usr/bin/gcc {src_path} -o {exe_path}"
        }))
        .unwrap()
    }

    fn cache_in(dir: &Path, compiler: Arc<CountingCompiler>) -> SpjCache {
        let meta = fs::metadata(dir).unwrap();
        let ownership = Ownership {
            uid: meta.uid(),
            gid: meta.gid(),
        };
        SpjCache::new(dir.join("src"), dir.join("exe"), ownership, compiler)
    }

    fn prepare(dir: &Path) {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::create_dir_all(dir.join("exe")).unwrap();
    }

    #[test]
    fn test_second_call_reuses_executable() {
        let dir = tempfile::tempdir().unwrap();
        prepare(dir.path());
        let compiler = Arc::new(CountingCompiler::default());
        let cache = cache_in(dir.path(), compiler.clone());
        let key = SpjKey::new("v1", "1");

        let first = cache.ensure_compiled(&key, "int main(){}", &compile_config()).unwrap();
        let second = cache.ensure_compiled(&key, "int main(){}", &compile_config()).unwrap();

        assert_eq!(first, dir.path().join("exe").join("spj-v1"));
        assert_eq!(first, second);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);

        let src_meta = fs::metadata(dir.path().join("src").join("spj-v1.c")).unwrap();
        assert_eq!(src_meta.permissions().mode() & 0o777, SPJ_SRC_MODE);
        let exe_meta = fs::metadata(&first).unwrap();
        assert_eq!(exe_meta.permissions().mode() & 0o777, SPJ_EXE_MODE);
        assert_eq!(src_meta.permissions().mode() & 0o007, 0);
        assert_eq!(exe_meta.permissions().mode() & 0o007, 0);
    }

    #[test]
    fn test_source_is_removed_when_ownership_fails() {
        let dir = tempfile::tempdir().unwrap();
        prepare(dir.path());
        let meta = fs::metadata(dir.path()).unwrap();
        if meta.uid() == 0 {
            // root may chown to anyone
            return;
        }
        let compiler = Arc::new(CountingCompiler::default());
        let ownership = Ownership {
            uid: 0,
            gid: meta.gid(),
        };
        let cache = SpjCache::new(
            dir.path().join("src"),
            dir.path().join("exe"),
            ownership,
            compiler.clone(),
        );

        let err = cache
            .ensure_compiled(&SpjKey::new("v5", "1"), "int main(){}", &compile_config())
            .unwrap_err();
        assert_eq!(err.kind(), "JudgeClientError");
        assert!(!dir.path().join("src").join("spj-v5.c").exists());
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_existing_source_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        prepare(dir.path());
        fs::write(dir.path().join("src").join("spj-v2.c"), "original").unwrap();
        let compiler = Arc::new(CountingCompiler::default());
        let cache = cache_in(dir.path(), compiler.clone());

        let exe = cache
            .ensure_compiled(&SpjKey::new("v2", "1"), "replacement", &compile_config())
            .unwrap();
        assert_eq!(fs::read_to_string(exe).unwrap(), "original");
    }

    #[test]
    fn test_compile_failure_is_retagged() {
        let dir = tempfile::tempdir().unwrap();
        prepare(dir.path());
        let compiler = Arc::new(CountingCompiler {
            calls: AtomicUsize::new(0),
            fail_with: Some("spj.c:1: error".to_string()),
        });
        let cache = cache_in(dir.path(), compiler);

        let err = cache
            .ensure_compiled(&SpjKey::new("v3", "1"), "int main(){", &compile_config())
            .unwrap_err();
        assert_eq!(err.kind(), "SPJCompileError");
        assert_eq!(err.to_string(), "spj.c:1: error");
    }

    #[test]
    fn test_concurrent_first_use_compiles_once() {
        let dir = tempfile::tempdir().unwrap();
        prepare(dir.path());
        let compiler = Arc::new(CountingCompiler::default());
        let cache = Arc::new(cache_in(dir.path(), compiler.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache
                        .ensure_compiled(&SpjKey::new("v4", "9"), "int main(){}", &compile_config())
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_versions_compile_separately() {
        let dir = tempfile::tempdir().unwrap();
        prepare(dir.path());
        let compiler = Arc::new(CountingCompiler::default());
        let cache = cache_in(dir.path(), compiler.clone());

        cache.ensure_compiled(&SpjKey::new("a", "1"), "x", &compile_config()).unwrap();
        cache.ensure_compiled(&SpjKey::new("b", "1"), "x", &compile_config()).unwrap();
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
    }
}

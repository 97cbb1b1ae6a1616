use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Compiler;
use super::command::{Finished, Invocation, render_command};
use crate::error::{JudgeError, Result};
use crate::language::{CompileConfig, ensure_file_name};

const COMPILER_OUTPUT: &str = "compiler.out";

/// Runs the configured compile command as a child process
///
/// Stdout and stderr of the compiler are collected in `compiler.out` inside the
/// output directory; on failure its content becomes the compile diagnostic.
#[derive(Debug, Default, Clone)]
pub struct CommandCompiler;

impl CommandCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for CommandCompiler {
    fn compile(
        &self,
        config: &CompileConfig,
        src_path: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        ensure_file_name(&config.exe_name)?;
        let exe_path = output_dir.join(&config.exe_name);
        let compiler_out = output_dir.join(COMPILER_OUTPUT);

        let src = src_path.to_string_lossy();
        let exe_dir = output_dir.to_string_lossy();
        let exe = exe_path.to_string_lossy();
        let argv = render_command(
            &config.compile_command,
            &[
                ("{src_path}", src.as_ref()),
                ("{exe_dir}", exe_dir.as_ref()),
                ("{exe_path}", exe.as_ref()),
            ],
        );

        let execution = Invocation {
            argv: &argv,
            cwd: output_dir,
            env: &[],
            stdin: None,
            output: &compiler_out,
            limit: Duration::from_millis(config.max_real_time),
        }
        .run()
        .map_err(|e| {
            log::error!("Failed to spawn compiler {:?}: {e}", argv.first());
            JudgeError::Compile(format!("Compiler runtime error, info: {e}"))
        })?;

        let diagnostic = fs::read_to_string(&compiler_out).unwrap_or_default();
        if let Err(e) = fs::remove_file(&compiler_out) {
            log::warn!("Failed to remove {}: {e}", compiler_out.display());
        }

        if execution.success() {
            log::debug!(
                "Compiled {} in {} ms",
                src_path.display(),
                execution.elapsed.as_millis()
            );
            return Ok(exe_path);
        }

        if !diagnostic.trim().is_empty() {
            return Err(JudgeError::Compile(diagnostic));
        }

        let info = serde_json::json!({
            "timed_out": matches!(execution.finished, Finished::TimedOut),
            "real_time": execution.elapsed.as_millis() as u64,
            "exit_code": execution.exit_code(),
            "signal": execution.signal(),
        });
        Err(JudgeError::Compile(format!("Compiler runtime error, info: {info}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_config(script: &str) -> CompileConfig {
        CompileConfig {
            src_name: "main.sh".to_string(),
            exe_name: "main".to_string(),
            compile_command: format!("/bin/sh {script} {{src_path}} {{exe_path}}"),
            max_real_time: 5000,
        }
    }

    fn compile_in_runtime(
        config: CompileConfig,
        src_path: PathBuf,
        output_dir: PathBuf,
    ) -> Result<PathBuf> {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime
            .block_on(runtime.spawn_blocking(move || {
                CommandCompiler::new().compile(&config, &src_path, &output_dir)
            }))
            .unwrap()
    }

    #[test]
    fn test_successful_compile_returns_executable() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cc.sh");
        fs::write(&script, "cp \"$1\" \"$2\"\n").unwrap();
        let src = dir.path().join("main.sh");
        fs::write(&src, "echo hi\n").unwrap();

        let config = shell_config(&script.to_string_lossy());
        let exe = compile_in_runtime(config, src, dir.path().to_path_buf()).unwrap();

        assert_eq!(exe, dir.path().join("main"));
        assert!(exe.exists());
        assert!(!dir.path().join(COMPILER_OUTPUT).exists());
    }

    #[test]
    fn test_failed_compile_carries_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cc.sh");
        fs::write(&script, "echo 'main.c:1:1: error: expected ;' >&2\nexit 1\n").unwrap();
        let src = dir.path().join("main.c");
        fs::write(&src, "int main(){").unwrap();

        let config = shell_config(&script.to_string_lossy());
        let err = compile_in_runtime(config, src, dir.path().to_path_buf()).unwrap_err();

        assert_eq!(err.kind(), "CompileError");
        assert!(err.to_string().contains("expected ;"));
    }

    #[test]
    fn test_silent_failure_reports_runtime_info() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cc.sh");
        fs::write(&script, "exit 3\n").unwrap();
        let src = dir.path().join("main.c");
        fs::write(&src, "").unwrap();

        let config = shell_config(&script.to_string_lossy());
        let err = compile_in_runtime(config, src, dir.path().to_path_buf()).unwrap_err();

        assert_eq!(err.kind(), "CompileError");
        assert!(err.to_string().starts_with("Compiler runtime error, info: "));
        assert!(err.to_string().contains("\"exit_code\":3"));
    }
}

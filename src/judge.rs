use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::JudgerConfig;
use crate::error::{JudgeError, Result};
use crate::language::{
    LanguageConfig, SpjCompileConfig, SpjConfig, SpjKey, ensure_file_name,
    optional_string_or_number, string_or_number,
};
use crate::sandbox::{
    CaseResult, CommandCompiler, Compiler, ExecutionEngine, LocalEngine, RunRequest, SpjRun,
};
use crate::spj_cache::SpjCache;
use crate::workspace::{Ownership, new_submission_id, with_workspace};

/// Parameters of the `judge` operation
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct JudgeRequest {
    pub language_config: LanguageConfig,
    pub src: String,
    /// Milliseconds
    pub max_cpu_time: u64,
    /// Bytes
    pub max_memory: u64,
    #[serde(deserialize_with = "string_or_number")]
    pub test_case_id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub spj_version: Option<String>,
    #[serde(default)]
    pub spj_config: Option<SpjConfig>,
    #[serde(default)]
    pub spj_compile_config: Option<SpjCompileConfig>,
    #[serde(default)]
    pub spj_src: Option<String>,
    /// Return the program output of every case
    #[serde(default)]
    pub output: bool,
}

/// Parameters of the `compile_spj` operation
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CompileSpjRequest {
    #[serde(deserialize_with = "string_or_number")]
    pub spj_version: String,
    pub src: String,
    pub spj_compile_config: SpjCompileConfig,
    #[serde(deserialize_with = "string_or_number")]
    pub test_case_id: String,
}

/// Composes workspace, checker cache, compiler and execution engine into the
/// end-to-end judging flow of one submission
pub struct JudgeServer {
    judger: JudgerConfig,
    spj_cache: SpjCache,
    compiler: Arc<dyn Compiler>,
    engine: Arc<dyn ExecutionEngine>,
}

impl JudgeServer {
    pub fn new(
        judger: JudgerConfig,
        compiler: Arc<dyn Compiler>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        let ownership = ownership_of(&judger);
        let spj_cache = SpjCache::new(
            judger.spj_src_dir.clone(),
            judger.spj_exe_dir.clone(),
            ownership,
            compiler.clone(),
        );
        Self {
            judger,
            spj_cache,
            compiler,
            engine,
        }
    }

    /// Uses the process-based compiler and engine shipped with this crate
    pub fn with_local_collaborators(judger: JudgerConfig) -> Self {
        let engine = Arc::new(LocalEngine::new(judger.test_case_base.clone()));
        Self::new(judger, Arc::new(CommandCompiler::new()), engine)
    }

    pub fn ping(&self) -> serde_json::Value {
        let mut data = crate::server_info();
        data["action"] = "pong".into();
        data
    }

    pub fn judge(&self, request: JudgeRequest) -> Result<Vec<CaseResult>> {
        let JudgeRequest {
            language_config,
            src,
            max_cpu_time,
            max_memory,
            test_case_id,
            spj_version,
            spj_config,
            spj_compile_config,
            spj_src,
            output,
        } = request;
        let LanguageConfig { compile, run } = &language_config;
        ensure_file_name(&test_case_id)
            .map_err(|_| JudgeError::JudgeClient(format!("invalid test case id {test_case_id:?}")))?;
        let submission_id = new_submission_id();

        // An empty version disables the special judge just like an absent one
        let spj = match (spj_version.filter(|v| !v.is_empty()), spj_config) {
            (Some(version), Some(config)) => {
                let key = SpjKey::new(version, test_case_id.as_str());
                let exe_path = self.spj_cache.exe_path(&key, &config)?;
                if !exe_path.is_file() {
                    log::warn!(
                        "{} does not exist, spj src will be recompiled",
                        exe_path.display()
                    );
                    let (Some(spj_src), Some(spj_compile_config)) =
                        (&spj_src, &spj_compile_config)
                    else {
                        return Err(JudgeError::JudgeClient(
                            "spj_src and spj_compile_config are required to compile the special judge"
                                .to_string(),
                        ));
                    };
                    self.spj_cache
                        .ensure_compiled(&key, spj_src, spj_compile_config)?;
                }
                Some(SpjRun { exe_path, config })
            }
            _ => None,
        };

        with_workspace(
            &self.judger.workspace_base,
            &submission_id,
            ownership_of(&self.judger),
            self.judger.debug,
            |submission_dir| {
                let exe_path: PathBuf = match compile {
                    Some(compile_config) => {
                        ensure_file_name(&compile_config.src_name)?;
                        let src_path = submission_dir.join(&compile_config.src_name);
                        fs::write(&src_path, &src)?;
                        self.compiler
                            .compile(compile_config, &src_path, submission_dir)?
                    }
                    None => {
                        let exe_name = run.exe_name.as_deref().ok_or_else(|| {
                            JudgeError::JudgeClient(
                                "run config needs exe_name when there is no compile step"
                                    .to_string(),
                            )
                        })?;
                        ensure_file_name(exe_name)?;
                        let exe_path = submission_dir.join(exe_name);
                        fs::write(&exe_path, &src)?;
                        exe_path
                    }
                };

                log::info!("Running submission {submission_id} on test case {test_case_id}");
                self.engine.run(RunRequest {
                    run_config: run,
                    exe_path: &exe_path,
                    max_cpu_time,
                    max_memory,
                    test_case_id: &test_case_id,
                    submission_dir,
                    spj,
                    capture_output: output,
                })
            },
        )
    }

    pub fn compile_spj(&self, request: CompileSpjRequest) -> Result<&'static str> {
        let key = SpjKey::new(request.spj_version, request.test_case_id);
        self.spj_cache
            .ensure_compiled(&key, &request.src, &request.spj_compile_config)?;
        Ok("success")
    }
}

fn ownership_of(judger: &JudgerConfig) -> Ownership {
    Ownership {
        uid: judger.owner_uid,
        gid: judger.compiler_group_gid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_judge_request_accepts_numeric_ids() {
        let request: JudgeRequest = serde_json::from_value(serde_json::json!({
            "language_config": { "run": { "command": "{exe_path}" } },
            "src": "",
            "max_cpu_time": 1000,
            "max_memory": 134217728,
            "test_case_id": 12,
            "spj_version": 3
        }))
        .unwrap();

        assert_eq!(request.test_case_id, "12");
        assert_eq!(request.spj_version.as_deref(), Some("3"));
        assert!(!request.output);
    }

    #[test]
    fn test_judge_request_rejects_missing_and_unknown_fields() {
        let missing = serde_json::from_value::<JudgeRequest>(serde_json::json!({
            "language_config": { "run": { "command": "{exe_path}" } },
            "max_cpu_time": 1000,
            "max_memory": 1,
            "test_case_id": "1"
        }))
        .unwrap_err();
        assert!(missing.to_string().contains("missing field `src`"));

        let unknown = serde_json::from_value::<CompileSpjRequest>(serde_json::json!({
            "spj_version": "1",
            "src": "",
            "spj_compile_config": {
                "src_name": "a.c", "exe_name": "a", "compile_command": "cc"
            },
            "test_case_id": "1",
            "extra": true
        }))
        .unwrap_err();
        assert!(unknown.to_string().contains("unknown field `extra`"));
    }
}

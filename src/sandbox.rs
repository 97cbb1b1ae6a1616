mod command;
mod compiler;
mod engine;

pub use compiler::CommandCompiler;
pub use engine::LocalEngine;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::language::{CompileConfig, RunConfig, SpjConfig};

/// Turns a source file into an executable
///
/// Implementations report a failed build as [`JudgeError::Compile`] carrying the
/// compiler diagnostic.
///
/// [`JudgeError::Compile`]: crate::error::JudgeError::Compile
pub trait Compiler: Send + Sync {
    /// Compiles `src_path` into `output_dir` and returns the executable's path
    fn compile(&self, config: &CompileConfig, src_path: &Path, output_dir: &Path)
    -> Result<PathBuf>;
}

/// A compiled checker ready to be run against a submission's output
#[derive(Debug, Clone)]
pub struct SpjRun {
    pub exe_path: PathBuf,
    pub config: SpjConfig,
}

/// Everything the execution engine needs to judge one submission
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub run_config: &'a RunConfig,
    pub exe_path: &'a Path,
    /// Milliseconds
    pub max_cpu_time: u64,
    /// Bytes
    pub max_memory: u64,
    pub test_case_id: &'a str,
    pub submission_dir: &'a Path,
    pub spj: Option<SpjRun>,
    pub capture_output: bool,
}

/// Runs an executable against every case of a test set under resource limits
pub trait ExecutionEngine: Send + Sync {
    fn run(&self, request: RunRequest<'_>) -> Result<Vec<CaseResult>>;
}

/// Verdict code of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunVerdict {
    WrongAnswer,
    Success,
    CpuTimeLimitExceeded,
    RealTimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
}

impl RunVerdict {
    pub fn code(self) -> i32 {
        match self {
            Self::WrongAnswer => -1,
            Self::Success => 0,
            Self::CpuTimeLimitExceeded => 1,
            Self::RealTimeLimitExceeded => 2,
            Self::MemoryLimitExceeded => 3,
            Self::RuntimeError => 4,
            Self::SystemError => 5,
        }
    }
}

impl Serialize for RunVerdict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

/// Result of a single test case execution
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub test_case: String,
    pub result: RunVerdict,
    /// Milliseconds
    pub cpu_time: u64,
    /// Milliseconds
    pub real_time: u64,
    /// Bytes; not tracked by the local engine
    pub memory: u64,
    pub signal: i32,
    pub exit_code: i32,
    pub error: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_result_wire_shape() {
        let result = CaseResult {
            test_case: "1".to_string(),
            result: RunVerdict::RealTimeLimitExceeded,
            cpu_time: 3000,
            real_time: 3001,
            memory: 0,
            signal: 9,
            exit_code: 0,
            error: 0,
            output: None,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["result"], 2);
        assert_eq!(value["test_case"], "1");
        assert!(value.get("output").is_none());
    }
}

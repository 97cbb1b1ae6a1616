use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::command::{Execution, Finished, Invocation, render_command};
use super::{CaseResult, ExecutionEngine, RunRequest, RunVerdict, SpjRun};
use crate::error::{JudgeError, Result};
use crate::language::ensure_file_name;

/// Wall-clock ceiling as a multiple of the CPU time limit
const REAL_TIME_FACTOR: u64 = 3;

/// Values of [`CaseResult::error`]
const ERROR_NONE: i32 = 0;
const ERROR_SPAWN: i32 = -1;
const ERROR_SPJ: i32 = -2;

const SPJ_ACCEPTED: i32 = 0;
const SPJ_WRONG_ANSWER: i32 = 1;

/// Executes programs as plain child processes
///
/// Only the wall-clock limit is enforced; CPU time is approximated by the
/// elapsed time and memory is not measured. Intended for hosts where the
/// resource limiting is provided by the surrounding container.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    test_case_base: PathBuf,
}

impl LocalEngine {
    pub fn new(test_case_base: impl Into<PathBuf>) -> Self {
        Self {
            test_case_base: test_case_base.into(),
        }
    }

    /// Lists the case names of a test set, ordered numerically when possible
    fn discover_cases(&self, test_case_dir: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(test_case_dir).map_err(|e| {
            log::error!("Cannot read test case dir {}: {e}", test_case_dir.display());
            JudgeError::JudgeClient("invalid test case path".to_string())
        })?;

        let mut cases = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "in")
                && let Some(stem) = path.file_stem()
            {
                cases.push(stem.to_string_lossy().into_owned());
            }
        }

        if cases.is_empty() {
            return Err(JudgeError::JudgeClient(format!(
                "no test cases found in {}",
                test_case_dir.display()
            )));
        }

        cases.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        });
        Ok(cases)
    }

    fn run_single_case(
        &self,
        request: &RunRequest<'_>,
        test_case_dir: &Path,
        case: &str,
    ) -> Result<CaseResult> {
        let input_path = test_case_dir.join(format!("{case}.in"));
        let answer_path = test_case_dir.join(format!("{case}.out"));
        let user_out_path = request.submission_dir.join(format!("{case}.out"));

        let exe_path = request.exe_path.to_string_lossy();
        let exe_dir = request.submission_dir.to_string_lossy();
        let max_memory_kb = (request.max_memory / 1024).to_string();
        let argv = render_command(
            &request.run_config.command,
            &[
                ("{exe_path}", exe_path.as_ref()),
                ("{exe_dir}", exe_dir.as_ref()),
                ("{max_memory}", max_memory_kb.as_str()),
            ],
        );

        let mut result = CaseResult {
            test_case: case.to_string(),
            result: RunVerdict::Success,
            cpu_time: 0,
            real_time: 0,
            memory: 0,
            signal: 0,
            exit_code: 0,
            error: ERROR_NONE,
            output: None,
        };

        let limit = request.max_cpu_time.saturating_mul(REAL_TIME_FACTOR).max(1);
        let execution = match (Invocation {
            argv: &argv,
            cwd: request.submission_dir,
            env: &request.run_config.env,
            stdin: Some(&input_path),
            output: &user_out_path,
            limit: Duration::from_millis(limit),
        })
        .run()
        {
            Ok(execution) => execution,
            Err(e) => {
                log::error!("Failed to execute case {case}: {e}");
                result.result = RunVerdict::SystemError;
                result.error = ERROR_SPAWN;
                return Ok(result);
            }
        };

        let elapsed = execution.elapsed.as_millis() as u64;
        result.cpu_time = elapsed;
        result.real_time = elapsed;
        result.exit_code = execution.exit_code();
        result.signal = execution.signal();
        result.result = classify(&execution, request.max_cpu_time);

        if request.capture_output {
            result.output = Some(read_lossy(&user_out_path));
        }

        if result.result == RunVerdict::Success {
            result.result = match &request.spj {
                Some(spj) => {
                    let verdict = self.run_checker(request, spj, &input_path, &user_out_path, case);
                    if verdict == RunVerdict::SystemError {
                        result.error = ERROR_SPJ;
                    }
                    verdict
                }
                None => match fs::read_to_string(&answer_path) {
                    Ok(expected) if outputs_match(&read_lossy(&user_out_path), &expected) => {
                        RunVerdict::Success
                    }
                    Ok(_) => RunVerdict::WrongAnswer,
                    Err(e) => {
                        log::error!("Failed to read answer file {}: {e}", answer_path.display());
                        RunVerdict::SystemError
                    }
                },
            };
        }

        Ok(result)
    }

    fn run_checker(
        &self,
        request: &RunRequest<'_>,
        spj: &SpjRun,
        input_path: &Path,
        user_out_path: &Path,
        case: &str,
    ) -> RunVerdict {
        let exe_path = spj.exe_path.to_string_lossy();
        let in_path = input_path.to_string_lossy();
        let out_path = user_out_path.to_string_lossy();
        let argv = render_command(
            &spj.config.command,
            &[
                ("{exe_path}", exe_path.as_ref()),
                ("{in_file_path}", in_path.as_ref()),
                ("{user_out_file_path}", out_path.as_ref()),
            ],
        );
        let checker_out = request.submission_dir.join(format!("{case}.spj.out"));
        let limit = request.max_cpu_time.saturating_mul(REAL_TIME_FACTOR).max(1);

        let execution = Invocation {
            argv: &argv,
            cwd: request.submission_dir,
            env: &[],
            stdin: None,
            output: &checker_out,
            limit: Duration::from_millis(limit),
        }
        .run();

        match execution {
            Ok(Execution {
                finished: Finished::Exited(status),
                ..
            }) => match status.code() {
                Some(SPJ_ACCEPTED) => RunVerdict::Success,
                Some(SPJ_WRONG_ANSWER) => RunVerdict::WrongAnswer,
                other => {
                    log::warn!("Checker for case {case} ended with {other:?}");
                    RunVerdict::SystemError
                }
            },
            Ok(_) => {
                log::warn!("Checker for case {case} timed out");
                RunVerdict::SystemError
            }
            Err(e) => {
                log::error!("Failed to run checker for case {case}: {e}");
                RunVerdict::SystemError
            }
        }
    }
}

impl ExecutionEngine for LocalEngine {
    fn run(&self, request: RunRequest<'_>) -> Result<Vec<CaseResult>> {
        ensure_file_name(request.test_case_id)?;
        let test_case_dir = self.test_case_base.join(request.test_case_id);
        let cases = self.discover_cases(&test_case_dir)?;

        cases
            .iter()
            .map(|case| self.run_single_case(&request, &test_case_dir, case))
            .collect()
    }
}

fn classify(execution: &Execution, max_cpu_time: u64) -> RunVerdict {
    match execution.finished {
        Finished::TimedOut => RunVerdict::RealTimeLimitExceeded,
        Finished::Exited(_) if execution.elapsed.as_millis() as u64 > max_cpu_time => {
            RunVerdict::CpuTimeLimitExceeded
        }
        Finished::Exited(status) if !status.success() => RunVerdict::RuntimeError,
        Finished::Exited(_) => RunVerdict::Success,
    }
}

fn read_lossy(path: &Path) -> String {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Line-wise comparison that tolerates trailing blanks and trailing empty lines
fn outputs_match(actual: &str, expected: &str) -> bool {
    significant_lines(actual).eq(significant_lines(expected))
}

fn significant_lines(text: &str) -> impl Iterator<Item = &str> {
    text.trim_end().lines().map(str::trim_end)
}

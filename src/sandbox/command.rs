use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::time::timeout;

/// Splits a command template on whitespace and substitutes placeholders per argument
///
/// Substituting after the split keeps paths containing spaces in one argument.
pub(super) fn render_command(template: &str, mapping: &[(&str, &str)]) -> Vec<String> {
    template
        .split_whitespace()
        .map(|arg| {
            let mut t = arg.to_string();
            for (k, v) in mapping {
                t = t.replace(k, v);
            }
            t
        })
        .collect()
}

/// How a bounded process ended
#[derive(Debug)]
pub(super) enum Finished {
    Exited(ExitStatus),
    TimedOut,
}

#[derive(Debug)]
pub(super) struct Execution {
    pub finished: Finished,
    pub elapsed: Duration,
}

impl Execution {
    pub fn success(&self) -> bool {
        matches!(&self.finished, Finished::Exited(status) if status.success())
    }

    pub fn exit_code(&self) -> i32 {
        match &self.finished {
            Finished::Exited(status) => status.code().unwrap_or(0),
            Finished::TimedOut => 0,
        }
    }

    pub fn signal(&self) -> i32 {
        match &self.finished {
            Finished::Exited(status) => status.signal().unwrap_or(0),
            Finished::TimedOut => libc::SIGKILL,
        }
    }
}

/// Process invocation with stdin/stdout redirection and a wall-clock ceiling
pub(super) struct Invocation<'a> {
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub env: &'a [String],
    pub stdin: Option<&'a Path>,
    /// Receives both stdout and stderr
    pub output: &'a Path,
    pub limit: Duration,
}

impl Invocation<'_> {
    /// Blocks the calling thread until the process exits or the limit expires
    ///
    /// Must be called from a thread that can reach a tokio runtime, such as a
    /// `spawn_blocking` or `web::block` worker.
    pub fn run(&self) -> std::io::Result<Execution> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| std::io::Error::other(format!("no async runtime available: {e}")))?;
        handle.block_on(self.run_async())
    }

    async fn run_async(&self) -> std::io::Result<Execution> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ));
        };

        let output_file = fs::File::create(self.output)?;
        let stdin = match self.stdin {
            Some(path) => Stdio::from(fs::File::open(path)?),
            None => Stdio::null(),
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(stdin)
            .stdout(Stdio::from(output_file.try_clone()?))
            .stderr(Stdio::from(output_file))
            .current_dir(self.cwd)
            .kill_on_drop(true);
        for pair in self.env {
            if let Some((key, value)) = pair.split_once('=') {
                cmd.env(key, value);
            }
        }

        let start_time = Instant::now();
        let mut child = cmd.spawn()?;

        let finished = match timeout(self.limit, child.wait()).await {
            Ok(status) => Finished::Exited(status?),
            Err(_) => {
                child.kill().await?;
                Finished::TimedOut
            }
        };

        Ok(Execution {
            finished,
            elapsed: start_time.elapsed(),
        })
    }
}

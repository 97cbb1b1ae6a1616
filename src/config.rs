use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "judge_server", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Keep submission workspaces after judging (diagnostics only)
    #[arg(long = "debug", default_value_t = false)]
    pub debug: bool,

    /// Shared secret expected in the X-Judge-Server-Token header
    #[arg(long = "token", env = "TOKEN")]
    pub token: Option<String>,
}

impl CliArgs {
    /// Load the configuration from the specified file and apply CLI overrides
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let file = std::fs::File::open(&self.config_path)
            .with_context(|| format!("cannot open config file {}", self.config_path))?;
        let reader = std::io::BufReader::new(file);
        let mut config: Config = serde_json::from_reader(reader)
            .with_context(|| format!("cannot parse config file {}", self.config_path))?;

        if self.debug {
            config.judger.debug = true;
        }
        if let Some(token) = &self.token {
            config.token = token.clone();
        }
        if config.token.is_empty() {
            bail!("the shared token must not be empty");
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub token: String,
    pub judger: JudgerConfig,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    pub workers: Option<usize>,
}

/// Filesystem layout and privilege settings used by the judge
#[derive(Deserialize, Debug, Clone)]
pub struct JudgerConfig {
    /// Base directory for per-submission workspaces
    #[serde(default = "default_workspace_base")]
    pub workspace_base: PathBuf,
    pub spj_src_dir: PathBuf,
    pub spj_exe_dir: PathBuf,
    pub test_case_base: PathBuf,
    /// Owner of every privilege-separated file or directory
    #[serde(default)]
    pub owner_uid: u32,
    /// Group shared with the compiler and the sandboxed programs
    pub compiler_group_gid: u32,
    /// Suppresses workspace cleanup
    #[serde(default)]
    pub debug: bool,
}

fn default_workspace_base() -> PathBuf {
    use directories::ProjectDirs;

    ProjectDirs::from("", "", "judge_server")
        .map(|dirs| dirs.cache_dir().join("workspace"))
        .unwrap_or_else(|| std::env::temp_dir().join("judge_server").join("workspace"))
}

impl JudgerConfig {
    /// Creates every base directory the judge writes into
    pub fn prepare_directories(&self) -> std::io::Result<()> {
        for dir in [&self.workspace_base, &self.spj_src_dir, &self.spj_exe_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

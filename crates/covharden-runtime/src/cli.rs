//! CLI definition using clap derive.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "covharden", about = "Coverage-driven test hardening", version)]
pub struct Cli {
    /// Repository root all paths resolve against (default: current directory)
    #[arg(long, short = 'C', global = true, env = "COVHARDEN_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Config file, relative to the working directory (default: covharden.toml when present)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Override the target coverage percentage for new plan records
    #[arg(long, global = true)]
    pub target_coverage: Option<f64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one session: measure, pick a module, generate, verify, commit or revert
    Session(SessionOpts),
    /// Run sessions until every module reaches its target
    Run(RunOpts),
    /// Print plan, history and test files as JSON
    Status,
    /// Print the progress log
    Logs,
}

#[derive(clap::Args)]
pub struct SessionOpts {
    #[arg(long, default_value = "1")]
    pub session_id: u64,
}

#[derive(clap::Args)]
pub struct RunOpts {
    /// Id of the first session
    #[arg(long, default_value = "1")]
    pub start_session: u64,

    /// Stop after this many sessions even if work remains
    #[arg(long)]
    pub max_sessions: Option<u64>,

    /// Pause between sessions in milliseconds (overrides [driver] pause_ms)
    #[arg(long)]
    pub pause_ms: Option<u64>,
}

impl Cli {
    /// Global flags every child session must see, with the working
    /// directory already resolved.
    pub fn forwarded_args(&self, workdir: &Path) -> Vec<OsString> {
        let mut args = vec![OsString::from("--workdir"), workdir.as_os_str().to_owned()];
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.as_os_str().to_owned());
        }
        if let Some(target) = self.target_coverage {
            args.push("--target-coverage".into());
            args.push(target.to_string().into());
        }
        args
    }
}

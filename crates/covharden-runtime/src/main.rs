//! covharden: coverage-driven test hardening.
//! `session` runs one measure/generate/verify cycle in-process; `run`
//! supervises one child process per session until the plan is done.

use anyhow::Context;
use clap::Parser;

mod artifacts;
mod cli;
mod cmd_run;
mod cmd_session;
mod cmd_status;
mod config;
mod driver;
mod run_handle;
mod session;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("COVHARDEN_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("reading current directory")?,
    };
    let workdir = std::path::absolute(&workdir)
        .with_context(|| format!("resolving {}", workdir.display()))?;

    let pause_ms = match &args.command {
        cli::Command::Run(opts) => opts.pause_ms,
        _ => None,
    };
    let config = config::Config::load(args.config.as_deref(), &workdir)?
        .with_overrides(args.target_coverage, pause_ms)?;
    let layout = config::RepoLayout::resolve(&workdir, &config.paths);

    match &args.command {
        cli::Command::Session(opts) => {
            let exit_code = cmd_session::cmd_session(opts.session_id, layout, &config).await;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        cli::Command::Run(opts) => {
            tracing::info!(workdir = %workdir.display(), "covharden driver starting");
            let forwarded = args.forwarded_args(&workdir);
            let exit_code = cmd_run::cmd_run(opts, &layout, &config, forwarded).await;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        cli::Command::Status => {
            cmd_status::cmd_status(
                &layout,
                &config.plan.test_prefix,
                &config.plan.source_extension,
            )?;
        }
        cli::Command::Logs => cmd_status::cmd_logs(&layout)?,
    }

    Ok(())
}

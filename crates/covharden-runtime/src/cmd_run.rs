//! `covharden run`: the multi-session driver.

use std::ffi::OsString;
use std::time::Duration;

use crate::cli::RunOpts;
use crate::config::{Config, RepoLayout};
use crate::driver::{ProcessLauncher, SessionDriver};
use crate::store::PlanStore;

/// Resolves on Ctrl-C. If the signal handler cannot be installed it never
/// resolves.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Returns the process exit code:
/// - 0: plan complete, or session cap reached
/// - 2: a session process could not be started
/// - 3: interrupted (Ctrl-C)
pub async fn cmd_run(
    opts: &RunOpts,
    layout: &RepoLayout,
    config: &Config,
    forwarded: Vec<OsString>,
) -> i32 {
    let launcher = match ProcessLauncher::current_exe(forwarded) {
        Ok(launcher) => launcher,
        Err(e) => {
            tracing::error!(error = %e, "cannot locate own executable");
            return 2;
        }
    };
    let driver = SessionDriver::new(launcher, PlanStore::new(&layout.plan_file))
        .with_start_session(opts.start_session)
        .with_max_sessions(opts.max_sessions)
        .with_pause(Duration::from_millis(config.driver.pause_ms))
        .with_grace(Duration::from_millis(config.driver.terminate_grace_ms));

    let exit = driver.run(ctrl_c()).await;
    tracing::info!(?exit, "driver stopped");
    exit.exit_code()
}

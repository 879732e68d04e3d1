//! `covharden run`: repeat sessions until the plan has no open module.
//!
//! Every session is its own child process. A failing session is logged and
//! the loop moves on; only an empty plan, the session cap, Ctrl-C or an
//! unspawnable child end it.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::run_handle::RunHandle;
use crate::store::PlanStore;

/// How long a session gets to exit after SIGTERM before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(10);

/// Starts one session process.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self, session_id: u64) -> io::Result<RunHandle>;
}

/// Re-invokes the current executable as `covharden session --session-id N`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    /// Global flags forwarded to every session (`--workdir`, `--config`, ...).
    global_args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, global_args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            global_args,
        }
    }

    pub fn current_exe(global_args: Vec<OsString>) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, global_args))
    }
}

impl SessionLauncher for ProcessLauncher {
    fn launch(&self, session_id: u64) -> io::Result<RunHandle> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.global_args)
            .arg("session")
            .arg("--session-id")
            .arg(session_id.to_string());
        RunHandle::start(&mut command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverExit {
    /// No Pending or InProgress module left.
    Completed { sessions: u64 },
    /// `--max-sessions` reached with work still open.
    CapReached { sessions: u64 },
    Interrupted,
    SpawnFailed { session_id: u64 },
}

impl DriverExit {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed { .. } | Self::CapReached { .. } => 0,
            Self::SpawnFailed { .. } => 2,
            Self::Interrupted => 3,
        }
    }
}

pub struct SessionDriver<L> {
    launcher: L,
    plan: PlanStore,
    start_session: u64,
    max_sessions: Option<u64>,
    pause: Duration,
    grace: Duration,
}

impl<L: SessionLauncher> SessionDriver<L> {
    pub fn new(launcher: L, plan: PlanStore) -> Self {
        Self {
            launcher,
            plan,
            start_session: 1,
            max_sessions: None,
            pause: Duration::from_secs(2),
            grace: TERMINATE_GRACE,
        }
    }

    #[must_use]
    pub fn with_start_session(mut self, session_id: u64) -> Self {
        self.start_session = session_id;
        self
    }

    #[must_use]
    pub fn with_max_sessions(mut self, max: Option<u64>) -> Self {
        self.max_sessions = max;
        self
    }

    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Drive sessions until done. `interrupt` resolving stops the loop and
    /// terminates the running session, if any.
    pub async fn run(&self, interrupt: impl Future<Output = ()>) -> DriverExit {
        tokio::pin!(interrupt);
        let mut session_id = self.start_session;
        let mut sessions = 0u64;

        loop {
            if self.max_sessions.is_some_and(|max| sessions >= max) {
                info!(sessions, "session cap reached");
                return DriverExit::CapReached { sessions };
            }

            info!(session_id, "launching session");
            let mut handle = match self.launcher.launch(session_id) {
                Ok(handle) => handle,
                Err(e) => {
                    error!(session_id, error = %e, "cannot spawn session");
                    return DriverExit::SpawnFailed { session_id };
                }
            };

            let status = tokio::select! {
                status = handle.wait() => status,
                _ = &mut interrupt => {
                    if handle.is_running() {
                        warn!(session_id, pid = ?handle.pid(), "interrupted, stopping session");
                        if let Err(e) = handle.terminate(self.grace).await {
                            error!(error = %e, "failed to stop session");
                        }
                    }
                    return DriverExit::Interrupted;
                }
            };
            match status {
                Ok(Some(0)) => info!(session_id, "session finished"),
                Ok(exit_code) => warn!(
                    session_id,
                    exit_code = ?exit_code,
                    "session failed, continuing with the next one"
                ),
                Err(e) => warn!(session_id, error = %e, "lost track of session, continuing"),
            }
            sessions += 1;

            if !self.plan.load().has_open_work() {
                info!(sessions, "all modules have reached target coverage");
                return DriverExit::Completed { sessions };
            }

            session_id += 1;
            tokio::select! {
                _ = tokio::time::sleep(self.pause) => {}
                _ = &mut interrupt => {
                    warn!("interrupted between sessions");
                    return DriverExit::Interrupted;
                }
            }
        }
    }
}

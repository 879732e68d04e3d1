//! Owned handle on one child session process.

use std::io;
use std::time::Duration;

use tokio::process::{Child, Command};

/// Lifecycle of the session child the driver supervises.
#[derive(Debug, Default)]
pub enum RunHandle {
    #[default]
    NotStarted,
    Running { pid: u32, child: Child },
    /// `exit_code` is `None` when the child died from a signal.
    Stopped { exit_code: Option<i32> },
}

impl RunHandle {
    /// Spawn `command`. The child is killed if the handle is dropped while
    /// still running.
    pub fn start(command: &mut Command) -> io::Result<Self> {
        let child = command.kill_on_drop(true).spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("child exited before its pid was read"))?;
        Ok(Self::Running { pid, child })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Running { pid, .. } => Some(*pid),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Wait for the child to exit. Returns its exit code; a handle that is
    /// already stopped returns the recorded one.
    pub async fn wait(&mut self) -> io::Result<Option<i32>> {
        let exit_code = match self {
            Self::NotStarted => return Ok(None),
            Self::Stopped { exit_code } => return Ok(*exit_code),
            Self::Running { child, .. } => child.wait().await?.code(),
        };
        *self = Self::Stopped { exit_code };
        Ok(exit_code)
    }

    /// Ask the child to stop (SIGTERM), then kill it if it is still alive
    /// after `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<Option<i32>> {
        let exit_code = match self {
            Self::NotStarted => return Ok(None),
            Self::Stopped { exit_code } => return Ok(*exit_code),
            Self::Running { pid, child } => {
                send_sigterm(*pid, child).await?;
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(status) => status?.code(),
                    Err(_) => {
                        tracing::warn!(pid = *pid, "session ignored SIGTERM, killing");
                        child.kill().await?;
                        None
                    }
                }
            }
        };
        *self = Self::Stopped { exit_code };
        Ok(exit_code)
    }
}

#[cfg(unix)]
async fn send_sigterm(pid: u32, _child: &mut Child) -> io::Result<()> {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return Err(io::Error::other(format!("pid {pid} out of range")));
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        let err = io::Error::last_os_error();
        // ESRCH: already gone, nothing to signal.
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[cfg(not(unix))]
async fn send_sigterm(_pid: u32, child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

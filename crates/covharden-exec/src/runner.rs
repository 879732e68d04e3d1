//! TestRunner trait and ShellTestRunner (async subprocess wrapper).
//! The trait keeps the orchestrator testable with scripted runners.

use std::future::Future;
use std::path::{Path, PathBuf};

use crate::error::ExecError;

/// pytest's "no tests were collected" exit status.
pub const PYTEST_NO_TESTS_EXIT_CODE: i32 = 5;

/// Classified result of one test-suite invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    /// The runner found nothing to run. Healthy for a cold start.
    NoTestsCollected,
    Failed {
        /// `None` when the process was killed by a signal.
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl RunOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Passed | Self::NoTestsCollected)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Passed => Some(0),
            Self::NoTestsCollected => None,
            Self::Failed { exit_code, .. } => *exit_code,
        }
    }
}

/// Map a raw exit status onto a [`RunOutcome`].
pub fn classify_exit(
    exit_code: Option<i32>,
    no_tests_exit_code: Option<i32>,
    stdout: String,
    stderr: String,
) -> RunOutcome {
    match exit_code {
        Some(0) => RunOutcome::Passed,
        Some(code) if Some(code) == no_tests_exit_code => RunOutcome::NoTestsCollected,
        _ => RunOutcome::Failed {
            exit_code,
            stdout,
            stderr,
        },
    }
}

/// Runs the full test suite of the target repository.
///
/// Implementations must leave a fresh coverage report behind on success.
pub trait TestRunner: Send + Sync {
    fn run(&self) -> impl Future<Output = Result<RunOutcome, ExecError>> + Send;
}

impl<T: TestRunner> TestRunner for &T {
    fn run(&self) -> impl Future<Output = Result<RunOutcome, ExecError>> + Send {
        (**self).run()
    }
}

/// Real runner: spawns the configured command in the repository root.
#[derive(Debug, Clone)]
pub struct ShellTestRunner {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    no_tests_exit_code: Option<i32>,
}

impl ShellTestRunner {
    /// `command[0]` is the program, the rest are its arguments.
    pub fn new(command: &[String]) -> Result<Self, ExecError> {
        let (program, args) = command.split_first().ok_or(ExecError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: PathBuf::from("."),
            no_tests_exit_code: Some(PYTEST_NO_TESTS_EXIT_CODE),
        })
    }

    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    #[must_use]
    pub fn with_no_tests_exit_code(mut self, code: Option<i32>) -> Self {
        self.no_tests_exit_code = code;
        self
    }

    /// Platform default: the harness test script next to the repository.
    pub fn default_command() -> Vec<String> {
        if cfg!(windows) {
            vec!["harness\\run_tests.bat".to_string()]
        } else {
            vec!["bash".to_string(), "harness/run_tests.sh".to_string()]
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

impl TestRunner for ShellTestRunner {
    async fn run(&self) -> Result<RunOutcome, ExecError> {
        tracing::info!(program = %self.program, args = ?self.args, "running test suite");
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.workdir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let outcome = classify_exit(
            output.status.code(),
            self.no_tests_exit_code,
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        );
        match &outcome {
            RunOutcome::Passed => tracing::info!("tests passed"),
            RunOutcome::NoTestsCollected => tracing::info!("no tests collected"),
            RunOutcome::Failed {
                exit_code,
                stdout,
                stderr,
            } => {
                tracing::error!(exit_code = ?exit_code, "tests failed");
                tracing::error!("{}", stdout.trim_end());
                tracing::error!("{}", stderr.trim_end());
            }
        }
        Ok(outcome)
    }
}

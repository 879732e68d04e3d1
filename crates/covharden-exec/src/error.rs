//! Error types for the test-runner boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("test runner command is empty")]
    EmptyCommand,

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed coverage report at byte {position}: {detail}")]
    Report { position: u64, detail: String },

    #[error("exec io error: {0}")]
    Io(#[from] std::io::Error),
}

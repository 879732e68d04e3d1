//! Error types for the core domain model.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("unknown module status: {0}")]
    UnknownStatus(String),

    #[error("unknown session result: {0}")]
    UnknownResult(String),
}

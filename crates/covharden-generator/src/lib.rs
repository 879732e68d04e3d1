//! covharden-generator: the test-generation collaborator.
//! Turns (module source, module id, existing tests, coverage summary) into
//! the full text of a replacement test file.

pub mod client;
pub mod error;
pub mod request;

pub use client::{ChatCompletionGenerator, strip_code_fences};
pub use error::GeneratorError;
pub use request::{GenerationRequest, SYSTEM_PROMPT, TestGenerator, build_prompt, coverage_summary};

//! covharden-exec: test-runner IO boundary.
//! Runs the target repository's test suite, reads the coverage report it
//! leaves behind, and walks the source tree for trackable modules.
//! No plan logic, only the IO boundary.

pub mod discovery;
pub mod error;
pub mod report;
pub mod runner;

pub use discovery::discover_modules;
pub use error::ExecError;
pub use report::{CoverageReport, load_report, parse_cobertura};
pub use runner::{
    PYTEST_NO_TESTS_EXIT_CODE, RunOutcome, ShellTestRunner, TestRunner, classify_exit,
};

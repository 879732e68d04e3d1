//! covharden.toml: optional configuration with defaults for every field,
//! plus the resolved on-disk layout of one target repository.

use std::path::{Path, PathBuf};
use std::time::Duration;

use covharden_core::{DEFAULT_TARGET_COVERAGE, normalize_module_id};
use covharden_exec::{PYTEST_NO_TESTS_EXIT_CODE, ShellTestRunner};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "covharden.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("target_coverage must be within 0..=100, got {0}")]
    TargetOutOfRange(f64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub plan: PlanConfig,
    pub runner: RunnerConfig,
    pub generator: GeneratorConfig,
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source_root: PathBuf,
    pub tests_dir: PathBuf,
    pub coverage_report: PathBuf,
    pub plan_file: PathBuf,
    pub history_file: PathBuf,
    pub progress_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("target_repo/src"),
            tests_dir: PathBuf::from("target_repo/tests"),
            coverage_report: PathBuf::from("coverage.xml"),
            plan_file: PathBuf::from("coverage_plan.json"),
            history_file: PathBuf::from("coverage_history.json"),
            progress_log: PathBuf::from("agent_progress.log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub target_coverage: f64,
    pub source_extension: String,
    /// File names never tracked, e.g. package markers.
    pub exclude: Vec<String>,
    pub test_prefix: String,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            target_coverage: DEFAULT_TARGET_COVERAGE,
            source_extension: "py".to_string(),
            exclude: vec!["__init__.py".to_string()],
            test_prefix: "test_".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub command: Vec<String>,
    /// Exit status meaning "nothing to run". Absent disables the special case.
    pub no_tests_exit_code: Option<i32>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: ShellTestRunner::default_command(),
            no_tests_exit_code: Some(PYTEST_NO_TESTS_EXIT_CODE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub language: String,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-5-nano".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            language: "Python".to_string(),
            timeout_secs: 120,
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Courtesy delay between sessions.
    pub pause_ms: u64,
    /// Time a session gets to exit after SIGTERM before it is killed.
    pub terminate_grace_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            pause_ms: 2000,
            terminate_grace_ms: 10_000,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()
    }

    /// Load `explicit`, or `covharden.toml` in `workdir` when present.
    /// An explicit path must exist; the implicit one is optional.
    pub fn load(explicit: Option<&Path>, workdir: &Path) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => workdir.join(path),
            None => {
                let implicit = workdir.join(CONFIG_FILE_NAME);
                if !implicit.is_file() {
                    tracing::debug!("no {CONFIG_FILE_NAME}, using defaults");
                    return Ok(Self::default());
                }
                implicit
            }
        };
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Self::from_toml(&text, &path)
    }

    /// Apply command-line overrides on top of file values.
    pub fn with_overrides(
        mut self,
        target_coverage: Option<f64>,
        pause_ms: Option<u64>,
    ) -> Result<Self, ConfigError> {
        if let Some(target) = target_coverage {
            self.plan.target_coverage = target;
        }
        if let Some(pause) = pause_ms {
            self.driver.pause_ms = pause;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let target = self.plan.target_coverage;
        if !(0.0..=100.0).contains(&target) {
            return Err(ConfigError::TargetOutOfRange(target));
        }
        Ok(self)
    }
}

// ─── Layout ───────────────────────────────────────────────────────

/// Absolute locations of everything a session reads or writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoLayout {
    pub workdir: PathBuf,
    /// Source root as given (relative to `workdir` when possible).
    pub source_root: PathBuf,
    pub tests_dir: PathBuf,
    pub coverage_report: PathBuf,
    pub plan_file: PathBuf,
    pub history_file: PathBuf,
    pub progress_log: PathBuf,
}

impl RepoLayout {
    pub fn resolve(workdir: impl Into<PathBuf>, paths: &PathsConfig) -> Self {
        let workdir = workdir.into();
        let source_root = paths
            .source_root
            .strip_prefix(&workdir)
            .unwrap_or(&paths.source_root)
            .to_path_buf();
        Self {
            tests_dir: workdir.join(&paths.tests_dir),
            coverage_report: workdir.join(&paths.coverage_report),
            plan_file: workdir.join(&paths.plan_file),
            history_file: workdir.join(&paths.history_file),
            progress_log: workdir.join(&paths.progress_log),
            source_root,
            workdir,
        }
    }

    /// Normalized root that measured module ids must fall under.
    pub fn tracked_root(&self) -> String {
        normalize_module_id(&self.source_root.to_string_lossy())
    }

    /// On-disk location of a module's source.
    pub fn source_path(&self, module_id: &str) -> PathBuf {
        self.workdir.join(module_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml("", Path::new("covharden.toml")).expect("parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.plan.target_coverage, 90.0);
        assert_eq!(config.runner.no_tests_exit_code, Some(5));
        assert_eq!(config.driver.pause_ms, 2000);
        assert_eq!(config.generator.model, "gpt-5-nano");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let text = r#"
[paths]
source_root = "app/lib"

[plan]
target_coverage = 75.0
exclude = []

[runner]
command = ["pytest", "--cov", "--cov-report=xml"]
"#;
        let config = Config::from_toml(text, Path::new("c.toml")).expect("parse");
        assert_eq!(config.paths.source_root, PathBuf::from("app/lib"));
        assert_eq!(config.paths.tests_dir, PathBuf::from("target_repo/tests"));
        assert_eq!(config.plan.target_coverage, 75.0);
        assert!(config.plan.exclude.is_empty());
        assert_eq!(config.plan.test_prefix, "test_");
        assert_eq!(config.runner.command[0], "pytest");
        assert_eq!(config.runner.no_tests_exit_code, Some(5));
    }

    #[test]
    fn bad_toml_names_the_file() {
        let err = Config::from_toml("[plan\n", Path::new("broken.toml")).expect_err("must fail");
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn target_out_of_range_rejected() {
        let text = "[plan]\ntarget_coverage = 120.0\n";
        assert!(matches!(
            Config::from_toml(text, Path::new("c.toml")),
            Err(ConfigError::TargetOutOfRange(_))
        ));
        assert!(Config::default().with_overrides(Some(-1.0), None).is_err());
    }

    #[test]
    fn overrides_win() {
        let config = Config::default()
            .with_overrides(Some(80.0), Some(0))
            .expect("valid");
        assert_eq!(config.plan.target_coverage, 80.0);
        assert_eq!(config.driver.pause_ms, 0);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(None, dir.path()).expect("load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_picks_up_implicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[driver]\npause_ms = 10\n")
            .expect("write");
        let config = Config::load(None, dir.path()).expect("load");
        assert_eq!(config.driver.pause_ms, 10);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Config::load(Some(Path::new("nope.toml")), dir.path()).expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn layout_resolves_against_workdir() {
        let layout = RepoLayout::resolve("/work/repo", &PathsConfig::default());
        assert_eq!(layout.plan_file, PathBuf::from("/work/repo/coverage_plan.json"));
        assert_eq!(layout.tests_dir, PathBuf::from("/work/repo/target_repo/tests"));
        assert_eq!(layout.tracked_root(), "target_repo/src");
        assert_eq!(
            layout.source_path("target_repo/src/a.py"),
            PathBuf::from("/work/repo/target_repo/src/a.py")
        );
    }

    #[test]
    fn absolute_source_root_inside_workdir_becomes_relative() {
        let paths = PathsConfig {
            source_root: PathBuf::from("/work/repo/lib/"),
            ..PathsConfig::default()
        };
        let layout = RepoLayout::resolve("/work/repo", &paths);
        assert_eq!(layout.tracked_root(), "lib");
    }
}

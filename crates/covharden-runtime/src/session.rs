//! One coverage-improvement session.
//!
//! ```text
//! Init → HealthCheck → PlanUpdate → Select → Context → Generate → Apply → Verify → Commit | Revert → Recorded
//! ```
//!
//! The plan is held in memory for the whole session and written only at a
//! terminal state. The test artifact is not touched before the generator
//! has produced a replacement.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use covharden_core::{CoveragePlan, ModuleId, ModuleStatus, SessionRecord, SessionResult};
use covharden_exec::{CoverageReport, RunOutcome, TestRunner, discover_modules, load_report};
use covharden_generator::{GenerationRequest, TestGenerator, coverage_summary};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::artifacts::TestArtifact;
use crate::config::{PlanConfig, RepoLayout};
use crate::store::{HistoryLog, PlanStore, ProgressLog, init_artifacts};

/// Conditions that end a session early. Each is recorded as NO_OP and
/// exits non-zero; none of them stops the driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionAbort {
    #[error("test suite failing before any change (exit code {exit_code:?})")]
    HealthCheckFailure { exit_code: Option<i32> },
    #[error("source file not found: {}", .0.display())]
    MissingSourceFile(PathBuf),
    #[error("test generation failed: {0}")]
    GenerationFailure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Verify passed; the new tests stay.
    Committed {
        module: ModuleId,
        before: f64,
        after: f64,
        overall: f64,
    },
    /// Verify failed; the artifact is back to its pre-session state.
    Reverted { module: ModuleId, overall: f64 },
    /// Nothing left below target.
    Exhausted { overall: f64 },
    Aborted(SessionAbort),
}

impl SessionOutcome {
    pub fn result(&self) -> SessionResult {
        match self {
            Self::Committed { .. } => SessionResult::Success,
            Self::Reverted { .. } => SessionResult::Reverted,
            Self::Exhausted { .. } | Self::Aborted(_) => SessionResult::NoOp,
        }
    }

    /// 0 for Success, Reverted and Exhausted; 1 for aborts.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Aborted(_) => 1,
            _ => 0,
        }
    }
}

pub struct SessionOrchestrator<R, G> {
    session_id: u64,
    layout: RepoLayout,
    plan_config: PlanConfig,
    runner: R,
    generator: G,
    plan_store: PlanStore,
    history: HistoryLog,
    progress: ProgressLog,
}

impl<R: TestRunner, G: TestGenerator> SessionOrchestrator<R, G> {
    pub fn new(
        session_id: u64,
        layout: RepoLayout,
        plan_config: PlanConfig,
        runner: R,
        generator: G,
    ) -> Self {
        Self {
            session_id,
            plan_store: PlanStore::new(&layout.plan_file),
            history: HistoryLog::new(&layout.history_file),
            progress: ProgressLog::new(&layout.progress_log),
            layout,
            plan_config,
            runner,
            generator,
        }
    }

    /// Run the session to a terminal state.
    ///
    /// `Err` means state could not be persisted; the artifact has been
    /// rolled back if it was already replaced.
    pub async fn run(&self) -> anyhow::Result<SessionOutcome> {
        let session_id = self.session_id;
        info!(session_id, "starting session");
        init_artifacts(&self.layout)?;

        // HealthCheck
        let health = self.run_suite("health check").await;
        if !health.is_healthy() {
            let abort = SessionAbort::HealthCheckFailure {
                exit_code: health.exit_code(),
            };
            error!(session_id, error = %abort, "health check failed");
            self.record(
                SessionResult::NoOp,
                self.last_known_overall(),
                "Initial health check failed.",
                Some("Tests failed before starting."),
            )?;
            return Ok(SessionOutcome::Aborted(abort));
        }

        // PlanUpdate
        let mut plan = self.plan_store.load_for_update();
        let report = self.measure();
        let overall_before = report.as_ref().map_or(0.0, |r| r.overall);
        self.reconcile(&mut plan, report.as_ref());

        // Select
        let Some(candidate) = plan.select_candidate().cloned() else {
            info!(session_id, "all modules meet target coverage");
            self.plan_store.save(&plan)?;
            self.record(
                SessionResult::NoOp,
                overall_before,
                "No pending modules found in plan.",
                Some("All modules meet target coverage."),
            )?;
            return Ok(SessionOutcome::Exhausted {
                overall: overall_before,
            });
        };
        let module = candidate.module_id;
        let before = candidate.current_coverage;
        info!(session_id, module = %module, coverage = before, "selected target");

        // Context
        plan.set_status(module.as_str(), ModuleStatus::InProgress);
        let mut artifact =
            TestArtifact::for_module(&self.layout.tests_dir, &self.plan_config.test_prefix, &module);
        let source_path = self.layout.source_path(module.as_str());
        let module_source = match std::fs::read_to_string(&source_path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                error!(session_id, path = %source_path.display(), "source file not found");
                self.plan_store.save(&plan)?;
                self.record(
                    SessionResult::NoOp,
                    overall_before,
                    &format!("Source file {module} missing."),
                    Some("Source file not found."),
                )?;
                return Ok(SessionOutcome::Aborted(SessionAbort::MissingSourceFile(
                    source_path,
                )));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", source_path.display()));
            }
        };
        let existing_tests = artifact
            .read_existing()
            .with_context(|| format!("reading {}", artifact.path().display()))?;
        if existing_tests.is_empty() {
            info!(path = %artifact.path().display(), "no existing tests, will create");
        }

        // Generate
        let request = GenerationRequest {
            module_source,
            module_id: module.to_string(),
            existing_tests,
            coverage_summary: coverage_summary(before),
        };
        let generated = match self.generator.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                error!(session_id, module = %module, error = %e, "test generation failed");
                self.plan_store.save(&plan)?;
                self.record(
                    SessionResult::NoOp,
                    overall_before,
                    &format!("Test generation failed: {e}"),
                    Some("Generator error."),
                )?;
                return Ok(SessionOutcome::Aborted(SessionAbort::GenerationFailure(
                    e.to_string(),
                )));
            }
        };

        // Apply
        if let Err(e) = artifact.apply(&generated) {
            self.roll_back(&artifact);
            return Err(e).with_context(|| format!("writing {}", artifact.path().display()));
        }
        debug!(path = %artifact.path().display(), bytes = generated.len(), "applied generated tests");

        // Verify
        let verify = self.run_suite("verify").await;
        if verify.is_healthy() {
            self.commit(plan, &artifact, module, before)
        } else {
            self.revert(plan, &artifact, module, overall_before)
        }
    }

    fn commit(
        &self,
        mut plan: CoveragePlan,
        artifact: &TestArtifact,
        module: ModuleId,
        before: f64,
    ) -> anyhow::Result<SessionOutcome> {
        info!(session_id = self.session_id, "changes verified, tests passed");
        let report = self.measure();
        self.reconcile(&mut plan, report.as_ref());
        let overall = report.as_ref().map_or(0.0, |r| r.overall);
        let after = plan
            .get(module.as_str())
            .map_or(0.0, |r| r.current_coverage);

        let persisted = self.plan_store.save(&plan).and_then(|()| {
            self.record(
                SessionResult::Success,
                overall,
                &format!("Improved coverage for {module} from {before:.1}% to {after:.1}%"),
                None,
            )
        });
        if let Err(e) = persisted {
            self.roll_back(artifact);
            return Err(e);
        }
        if let Err(e) = artifact.discard_backup() {
            warn!(path = %artifact.backup_path().display(), error = %e, "could not delete backup");
        }
        Ok(SessionOutcome::Committed {
            module,
            before,
            after,
            overall,
        })
    }

    fn revert(
        &self,
        plan: CoveragePlan,
        artifact: &TestArtifact,
        module: ModuleId,
        overall_before: f64,
    ) -> anyhow::Result<SessionOutcome> {
        warn!(session_id = self.session_id, module = %module, "tests failed after changes, reverting");
        let restored = artifact
            .restore()
            .with_context(|| format!("restoring {}", artifact.path().display()))?;
        debug!(?restored, "artifact reverted");

        self.plan_store.save(&plan)?;
        self.record(
            SessionResult::Reverted,
            overall_before,
            &format!("Tests failed for {module}. Reverted changes."),
            Some("Tests failed after applying generated changes."),
        )?;
        Ok(SessionOutcome::Reverted {
            module,
            overall: overall_before,
        })
    }

    /// Best effort: used only on the way out of a failed session.
    fn roll_back(&self, artifact: &TestArtifact) {
        match artifact.restore() {
            Ok(restored) => warn!(?restored, path = %artifact.path().display(), "rolled back test artifact"),
            Err(e) => error!(
                path = %artifact.path().display(),
                error = %e,
                "rollback failed, backup left in place"
            ),
        }
    }

    /// A runner that cannot even start counts as a failed run.
    async fn run_suite(&self, stage: &'static str) -> RunOutcome {
        match self.runner.run().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(stage, error = %e, "test runner could not run");
                RunOutcome::Failed {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                }
            }
        }
    }

    fn measure(&self) -> Option<CoverageReport> {
        match load_report(&self.layout.coverage_report) {
            Ok(report) => report.map(|r| r.relative_to(&self.layout.workdir)),
            Err(e) => {
                warn!(
                    path = %self.layout.coverage_report.display(),
                    error = %e,
                    "unreadable coverage report, treating as no measurement"
                );
                None
            }
        }
    }

    fn reconcile(&self, plan: &mut CoveragePlan, report: Option<&CoverageReport>) {
        let discovered = discover_modules(
            &self.layout.workdir,
            &self.layout.source_root,
            &self.plan_config.source_extension,
            &self.plan_config.exclude,
        );
        let empty = BTreeMap::new();
        let measured = report.map_or(&empty, |r| &r.modules);
        let summary = plan.reconcile(
            measured,
            &discovered,
            &self.layout.tracked_root(),
            self.plan_config.target_coverage,
        );
        info!(
            updated = summary.updated,
            inserted = summary.inserted,
            newly_done = summary.newly_done.len(),
            "coverage plan updated"
        );
    }

    fn last_known_overall(&self) -> f64 {
        self.measure()
            .map(|r| r.overall)
            .or_else(|| self.history.load().latest_overall())
            .unwrap_or(0.0)
    }

    fn record(
        &self,
        result: SessionResult,
        overall: f64,
        message: &str,
        reason: Option<&str>,
    ) -> anyhow::Result<()> {
        self.history
            .append(SessionRecord::new(self.session_id, overall, result, Utc::now()))?;
        self.progress
            .append(self.session_id, message, reason, result.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use covharden_exec::ExecError;
    use covharden_generator::GeneratorError;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    const HELPERS: &str = "target_repo/src/utils/helpers.py";
    const MODELS: &str = "target_repo/src/domain/models.py";

    fn cobertura(overall: f64, classes: &[(&str, f64)]) -> String {
        let mut xml = format!(
            "<?xml version=\"1.0\" ?>\n<coverage line-rate=\"{}\">\n<packages><package name=\"p\"><classes>\n",
            overall / 100.0
        );
        for (file, pct) in classes {
            xml.push_str(&format!(
                "<class name=\"c\" filename=\"{file}\" line-rate=\"{}\"/>\n",
                pct / 100.0
            ));
        }
        xml.push_str("</classes></package></packages>\n</coverage>\n");
        xml
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    enum Step {
        /// Pass, optionally leaving a fresh coverage report behind.
        Pass(Option<String>),
        NoTests,
        Fail(i32),
        CannotSpawn,
    }

    /// Plays back one step per run and records the artifact as it was
    /// when each run happened.
    struct ScriptedRunner {
        steps: Mutex<VecDeque<Step>>,
        report_path: PathBuf,
        watched: PathBuf,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedRunner {
        fn new(layout: &RepoLayout, watched: &Path, steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                report_path: layout.coverage_report.clone(),
                watched: watched.to_path_buf(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn runs(&self) -> usize {
            self.seen.lock().expect("lock").len()
        }
    }

    impl TestRunner for ScriptedRunner {
        async fn run(&self) -> Result<RunOutcome, ExecError> {
            self.seen
                .lock()
                .expect("lock")
                .push(fs::read_to_string(&self.watched).ok());
            let step = self
                .steps
                .lock()
                .expect("lock")
                .pop_front()
                .expect("unexpected extra test run");
            match step {
                Step::Pass(report) => {
                    if let Some(xml) = report {
                        fs::write(&self.report_path, xml).expect("write report");
                    }
                    Ok(RunOutcome::Passed)
                }
                Step::NoTests => Ok(RunOutcome::NoTestsCollected),
                Step::Fail(code) => Ok(RunOutcome::Failed {
                    exit_code: Some(code),
                    stdout: "F".into(),
                    stderr: "AssertionError".into(),
                }),
                Step::CannotSpawn => Err(ExecError::Spawn {
                    program: "bash".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "not found"),
                }),
            }
        }
    }

    struct ScriptedGenerator {
        reply: Result<String, u16>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                reply: Err(status),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().expect("lock").len()
        }
    }

    impl TestGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
            self.requests.lock().expect("lock").push(request.clone());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(status) => Err(GeneratorError::Api {
                    status: *status,
                    body: "upstream unavailable".into(),
                }),
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: RepoLayout,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let layout = RepoLayout::resolve(dir.path(), &PathsConfig::default());
            for module in [HELPERS, MODELS] {
                let path = layout.source_path(module);
                fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
                fs::write(path, "def f():\n    return 1\n").expect("write source");
            }
            fs::create_dir_all(&layout.tests_dir).expect("mkdir tests");
            Self { _dir: dir, layout }
        }

        fn helpers_artifact(&self) -> TestArtifact {
            TestArtifact::for_module(&self.layout.tests_dir, "test_", &ModuleId::new(HELPERS))
        }

        fn orchestrator<'a>(
            &self,
            runner: &'a ScriptedRunner,
            generator: &'a ScriptedGenerator,
        ) -> SessionOrchestrator<&'a ScriptedRunner, &'a ScriptedGenerator> {
            SessionOrchestrator::new(
                7,
                self.layout.clone(),
                PlanConfig::default(),
                runner,
                generator,
            )
        }

        fn plan(&self) -> CoveragePlan {
            PlanStore::new(&self.layout.plan_file).load()
        }

        fn history(&self) -> Vec<SessionRecord> {
            HistoryLog::new(&self.layout.history_file)
                .load()
                .entries()
                .to_vec()
        }

        fn progress(&self) -> String {
            ProgressLog::new(&self.layout.progress_log)
                .read()
                .expect("progress log")
        }
    }

    fn initial_report() -> String {
        cobertura(55.0, &[(HELPERS, 40.0), (MODELS, 70.0)])
    }

    #[tokio::test]
    async fn health_check_failure_is_noop_and_touches_nothing() {
        let fx = Fixture::new();
        let artifact = fx.helpers_artifact();
        fs::write(artifact.path(), "def test_old(): pass\n").expect("seed artifact");
        fs::write(&fx.layout.coverage_report, initial_report()).expect("seed report");
        let plan_json = r#"[{"module": "target_repo/src/utils/helpers.py", "current_coverage": 40.0, "target_coverage": 90.0, "status": "pending"}]"#;
        fs::write(&fx.layout.plan_file, plan_json).expect("seed plan");

        let runner = ScriptedRunner::new(&fx.layout, artifact.path(), vec![Step::Fail(2)]);
        let generator = ScriptedGenerator::replying("unused");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        assert_eq!(
            outcome,
            SessionOutcome::Aborted(SessionAbort::HealthCheckFailure { exit_code: Some(2) })
        );
        assert_ne!(outcome.exit_code(), 0);
        assert_eq!(generator.calls(), 0);
        assert_eq!(fs::read_to_string(&fx.layout.plan_file).expect("plan"), plan_json);
        assert_eq!(artifact.read_existing().expect("artifact"), "def test_old(): pass\n");

        let history = fx.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result, SessionResult::NoOp);
        assert!(approx(history[0].overall_coverage, 55.0), "last known overall is kept");
        assert!(fx.progress().contains("Initial health check failed."));
    }

    #[tokio::test]
    async fn runner_that_cannot_start_fails_health_check() {
        let fx = Fixture::new();
        let runner = ScriptedRunner::new(&fx.layout, fx.helpers_artifact().path(), vec![Step::CannotSpawn]);
        let generator = ScriptedGenerator::replying("unused");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");
        assert_eq!(
            outcome,
            SessionOutcome::Aborted(SessionAbort::HealthCheckFailure { exit_code: None })
        );
        assert!(approx(fx.history()[0].overall_coverage, 0.0));
    }

    #[tokio::test]
    async fn exhausted_plan_is_successful_noop() {
        let fx = Fixture::new();
        let report = cobertura(95.0, &[(HELPERS, 95.0), (MODELS, 100.0)]);
        let runner =
            ScriptedRunner::new(&fx.layout, fx.helpers_artifact().path(), vec![Step::Pass(Some(report))]);
        let generator = ScriptedGenerator::replying("unused");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        assert!(matches!(outcome, SessionOutcome::Exhausted { overall } if approx(overall, 95.0)));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(generator.calls(), 0);
        let plan = fx.plan();
        assert_eq!(plan.len(), 2);
        assert!(!plan.has_open_work());
        assert_eq!(fx.history()[0].result, SessionResult::NoOp);
        assert!(fx.progress().contains("All modules meet target coverage."));
    }

    #[tokio::test]
    async fn cold_start_without_tests_seeds_plan_from_discovery() {
        let fx = Fixture::new();
        let runner = ScriptedRunner::new(
            &fx.layout,
            fx.helpers_artifact().path(),
            vec![Step::NoTests, Step::Pass(Some(cobertura(30.0, &[(MODELS, 60.0)])))],
        );
        let generator = ScriptedGenerator::replying("def test_models(): pass\n");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        // Both modules discovered at 0%; ties break by id, domain/ sorts first.
        match outcome {
            SessionOutcome::Committed { module, before, after, .. } => {
                assert_eq!(module.as_str(), MODELS);
                assert!(approx(before, 0.0));
                assert!(approx(after, 60.0));
            }
            other => panic!("expected commit, got {other:?}"),
        }
        let request = &generator.requests.lock().expect("lock")[0];
        assert_eq!(request.existing_tests, "");
        assert_eq!(request.coverage_summary, "Current coverage: 0.0%");
    }

    #[tokio::test]
    async fn verified_change_is_committed() {
        let fx = Fixture::new();
        let artifact = fx.helpers_artifact();
        fs::write(artifact.path(), "def test_old(): pass\n").expect("seed artifact");
        let after = cobertura(77.5, &[(HELPERS, 85.0), (MODELS, 70.0)]);
        let runner = ScriptedRunner::new(
            &fx.layout,
            artifact.path(),
            vec![Step::Pass(Some(initial_report())), Step::Pass(Some(after))],
        );
        let generator = ScriptedGenerator::replying("def test_old(): pass\n\ndef test_new(): pass\n");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        match &outcome {
            SessionOutcome::Committed { module, before, after, overall } => {
                assert_eq!(module.as_str(), HELPERS);
                assert!(approx(*before, 40.0));
                assert!(approx(*after, 85.0));
                assert!(approx(*overall, 77.5));
            }
            other => panic!("expected commit, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 0);

        let seen = runner.seen.lock().expect("lock").clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].as_deref(), Some("def test_old(): pass\n"));
        assert_eq!(
            seen[1].as_deref(),
            Some("def test_old(): pass\n\ndef test_new(): pass\n"),
            "verify runs against the generated file"
        );

        let request = &generator.requests.lock().expect("lock")[0];
        assert_eq!(request.module_id, HELPERS);
        assert_eq!(request.existing_tests, "def test_old(): pass\n");
        assert_eq!(request.coverage_summary, "Current coverage: 40.0%");

        assert!(!artifact.has_backup());
        assert!(artifact.read_existing().expect("read").contains("test_new"));

        let plan = fx.plan();
        let record = plan.get(HELPERS).expect("helpers");
        assert!(approx(record.current_coverage, 85.0));
        assert_eq!(record.status, ModuleStatus::InProgress, "still below target");

        let history = fx.history();
        assert_eq!(history[0].result, SessionResult::Success);
        assert_eq!(history[0].session_id, 7);
        assert!(
            fx.progress()
                .contains(&format!("Improved coverage for {HELPERS} from 40.0% to 85.0%"))
        );
    }

    #[tokio::test]
    async fn commit_reaching_target_marks_done() {
        let fx = Fixture::new();
        let after = cobertura(92.0, &[(HELPERS, 95.0), (MODELS, 70.0)]);
        let runner = ScriptedRunner::new(
            &fx.layout,
            fx.helpers_artifact().path(),
            vec![Step::Pass(Some(initial_report())), Step::Pass(Some(after))],
        );
        let generator = ScriptedGenerator::replying("def test_all(): pass\n");
        fx.orchestrator(&runner, &generator).run().await.expect("run");

        let plan = fx.plan();
        assert_eq!(plan.get(HELPERS).expect("helpers").status, ModuleStatus::Done);
        assert_eq!(plan.select_candidate().expect("next").module_id.as_str(), MODELS);
    }

    #[tokio::test]
    async fn failed_verify_restores_original_bytes() {
        let fx = Fixture::new();
        let artifact = fx.helpers_artifact();
        let original = "import pytest\n\ndef test_keep():\n    assert 1 == 1\n";
        fs::write(artifact.path(), original).expect("seed artifact");
        let runner = ScriptedRunner::new(
            &fx.layout,
            artifact.path(),
            vec![Step::Pass(Some(initial_report())), Step::Fail(1)],
        );
        let generator = ScriptedGenerator::replying("def test_broken(): assert False\n");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        match &outcome {
            SessionOutcome::Reverted { module, overall } => {
                assert_eq!(module.as_str(), HELPERS);
                assert!(approx(*overall, 55.0));
            }
            other => panic!("expected revert, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(fs::read(artifact.path()).expect("read"), original.as_bytes());
        assert!(!artifact.has_backup());

        let history = fx.history();
        assert_eq!(history[0].result, SessionResult::Reverted);
        assert!(approx(history[0].overall_coverage, 55.0), "pre-attempt overall");
        assert_eq!(
            fx.plan().get(HELPERS).expect("helpers").status,
            ModuleStatus::InProgress
        );
        assert!(fx.progress().contains("Reverted changes."));
    }

    #[tokio::test]
    async fn failed_verify_removes_newly_created_artifact() {
        let fx = Fixture::new();
        let artifact = fx.helpers_artifact();
        let runner = ScriptedRunner::new(
            &fx.layout,
            artifact.path(),
            vec![Step::Pass(Some(initial_report())), Step::Fail(1)],
        );
        let generator = ScriptedGenerator::replying("def test_broken(): assert False\n");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        assert_eq!(outcome.result(), SessionResult::Reverted);
        assert!(!artifact.exists());
        assert!(!artifact.has_backup());
    }

    #[tokio::test]
    async fn failed_verify_leaves_no_new_tests_dir() {
        let fx = Fixture::new();
        fs::remove_dir_all(&fx.layout.tests_dir).expect("drop tests dir");
        let artifact = fx.helpers_artifact();
        let runner = ScriptedRunner::new(
            &fx.layout,
            artifact.path(),
            vec![Step::Pass(Some(initial_report())), Step::Fail(1)],
        );
        let generator = ScriptedGenerator::replying("def test_broken(): assert False\n");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        assert_eq!(outcome.result(), SessionResult::Reverted);
        assert!(!fx.layout.tests_dir.exists());
    }

    #[tokio::test]
    async fn report_relative_to_source_dir_updates_discovered_records() {
        let fx = Fixture::new();
        let source_dir = fx.layout.workdir.join("target_repo/src");
        let report = |overall: f64, helpers: f64| {
            format!(
                "<coverage line-rate=\"{}\">\n<sources><source>{}</source></sources>\n\
                 <packages><package name=\"p\"><classes>\n\
                 <class filename=\"utils/helpers.py\" line-rate=\"{}\"/>\n\
                 <class filename=\"domain/models.py\" line-rate=\"0.7\"/>\n\
                 </classes></package></packages>\n</coverage>\n",
                overall / 100.0,
                source_dir.display(),
                helpers / 100.0
            )
        };
        let runner = ScriptedRunner::new(
            &fx.layout,
            fx.helpers_artifact().path(),
            vec![
                Step::Pass(Some(report(55.0, 40.0))),
                Step::Pass(Some(report(80.0, 85.0))),
            ],
        );
        let generator = ScriptedGenerator::replying("def test_helpers(): pass\n");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        match outcome {
            SessionOutcome::Committed { module, before, after, .. } => {
                assert_eq!(module.as_str(), HELPERS);
                assert!(approx(before, 40.0));
                assert!(approx(after, 85.0));
            }
            other => panic!("expected commit, got {other:?}"),
        }
        let plan = fx.plan();
        assert_eq!(plan.len(), 2, "one record per module");
        assert!(approx(plan.get(MODELS).expect("models").current_coverage, 70.0));
    }

    #[tokio::test]
    async fn orphaned_backup_does_not_resurrect_on_revert() {
        let fx = Fixture::new();
        let artifact = fx.helpers_artifact();
        fs::write(artifact.backup_path(), "left by a killed session").expect("orphan");
        let runner = ScriptedRunner::new(
            &fx.layout,
            artifact.path(),
            vec![Step::Pass(Some(initial_report())), Step::Fail(1)],
        );
        let generator = ScriptedGenerator::replying("def test_broken(): assert False\n");
        fx.orchestrator(&runner, &generator).run().await.expect("run");

        assert!(!artifact.exists());
        assert!(!artifact.has_backup());
    }

    #[tokio::test]
    async fn generation_failure_touches_no_file() {
        let fx = Fixture::new();
        let artifact = fx.helpers_artifact();
        let runner =
            ScriptedRunner::new(&fx.layout, artifact.path(), vec![Step::Pass(Some(initial_report()))]);
        let generator = ScriptedGenerator::failing(503);
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        assert!(matches!(
            outcome,
            SessionOutcome::Aborted(SessionAbort::GenerationFailure(_))
        ));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(runner.runs(), 1, "no verify run");
        assert!(!artifact.exists());
        assert!(!artifact.has_backup());
        assert_eq!(fx.history()[0].result, SessionResult::NoOp);
        assert!(fx.progress().contains("Test generation failed"));
    }

    #[tokio::test]
    async fn missing_source_file_aborts_before_generation() {
        let fx = Fixture::new();
        let ghost = "target_repo/src/ghost.py";
        let report = cobertura(50.0, &[(ghost, 0.0), (HELPERS, 40.0), (MODELS, 70.0)]);
        let runner = ScriptedRunner::new(
            &fx.layout,
            fx.helpers_artifact().path(),
            vec![Step::Pass(Some(report))],
        );
        let generator = ScriptedGenerator::replying("unused");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        assert_eq!(
            outcome,
            SessionOutcome::Aborted(SessionAbort::MissingSourceFile(fx.layout.source_path(ghost)))
        );
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(generator.calls(), 0);
        assert_eq!(
            fx.plan().get(ghost).expect("ghost").status,
            ModuleStatus::InProgress
        );
        assert!(fx.progress().contains("Source file not found."));
    }

    #[tokio::test]
    async fn done_module_is_not_reopened_by_lower_measurement() {
        let fx = Fixture::new();
        let plan_json = format!(
            r#"[{{"module": "{HELPERS}", "current_coverage": 95.0, "target_coverage": 90.0, "status": "done"}},
                {{"module": "{MODELS}", "current_coverage": 95.0, "target_coverage": 90.0, "status": "done"}}]"#
        );
        fs::write(&fx.layout.plan_file, plan_json).expect("seed plan");
        let report = cobertura(50.0, &[(HELPERS, 50.0), (MODELS, 50.0)]);
        let runner =
            ScriptedRunner::new(&fx.layout, fx.helpers_artifact().path(), vec![Step::Pass(Some(report))]);
        let generator = ScriptedGenerator::replying("unused");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");

        assert!(matches!(outcome, SessionOutcome::Exhausted { overall } if approx(overall, 50.0)));
        let record = fx.plan().get(HELPERS).expect("helpers").clone();
        assert_eq!(record.status, ModuleStatus::Done);
        assert!(approx(record.current_coverage, 50.0));
    }

    #[tokio::test]
    async fn corrupt_report_counts_as_no_measurement() {
        let fx = Fixture::new();
        let runner = ScriptedRunner::new(
            &fx.layout,
            fx.helpers_artifact().path(),
            vec![Step::Pass(Some("<coverage line-rate=\"x\"".into())), Step::Fail(1)],
        );
        let generator = ScriptedGenerator::replying("def test_x(): pass\n");
        let outcome = fx.orchestrator(&runner, &generator).run().await.expect("run");
        assert_eq!(outcome.result(), SessionResult::Reverted);
        assert_eq!(fx.plan().len(), 2, "discovery still seeds the plan");
    }
}

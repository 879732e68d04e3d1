//! `covharden session`: wire the real runner and generator into one
//! [`SessionOrchestrator`] run.

use covharden_exec::ShellTestRunner;
use covharden_generator::ChatCompletionGenerator;

use crate::config::{Config, RepoLayout};
use crate::session::SessionOrchestrator;

/// Returns the process exit code.
pub async fn cmd_session(session_id: u64, layout: RepoLayout, config: &Config) -> i32 {
    let runner = match ShellTestRunner::new(&config.runner.command) {
        Ok(runner) => runner
            .with_workdir(&layout.workdir)
            .with_no_tests_exit_code(config.runner.no_tests_exit_code),
        Err(e) => {
            tracing::error!(error = %e, "invalid [runner] command");
            return 1;
        }
    };

    let api_key = config.generator.api_key();
    if api_key.is_none() {
        tracing::warn!(
            env = %config.generator.api_key_env,
            "no API key in environment, requests go out unauthenticated"
        );
    }
    let generator = ChatCompletionGenerator::new(&config.generator.base_url, &config.generator.model)
        .with_api_key(api_key)
        .with_language(&config.generator.language)
        .with_timeout(config.generator.timeout());

    let orchestrator =
        SessionOrchestrator::new(session_id, layout, config.plan.clone(), runner, generator);
    match orchestrator.run().await {
        Ok(outcome) => {
            tracing::info!(session_id, result = %outcome.result(), "session finished");
            outcome.exit_code()
        }
        Err(e) => {
            tracing::error!(session_id, error = %format!("{e:#}"), "session aborted");
            1
        }
    }
}

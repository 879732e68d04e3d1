//! Generation request, prompt construction and the TestGenerator seam.

use std::future::Future;

use crate::error::GeneratorError;

pub const SYSTEM_PROMPT: &str =
    "You are a helpful coding assistant specialized in unit testing.";

/// Everything the generator is told about one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub module_source: String,
    pub module_id: String,
    /// Current test file text; empty when the module has no tests yet.
    pub existing_tests: String,
    pub coverage_summary: String,
}

/// `Current coverage: 42.5%`
pub fn coverage_summary(current_coverage: f64) -> String {
    format!("Current coverage: {current_coverage:.1}%")
}

/// Dotted import path for a module id: `a/b/c.py` becomes `a.b.c`.
fn import_path(module_id: &str) -> String {
    let without_ext = match module_id.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') => stem,
        _ => module_id,
    };
    without_ext.replace('/', ".")
}

/// Render the user prompt for `request`.
///
/// The reply is expected to be the complete replacement test file, with
/// nothing but code in it.
pub fn build_prompt(language: &str, request: &GenerationRequest) -> String {
    let fence = language.to_ascii_lowercase();
    let existing = if request.existing_tests.trim().is_empty() {
        "(no tests yet)"
    } else {
        request.existing_tests.as_str()
    };
    format!(
        "You are an expert {language} testing agent. Your goal is to improve test coverage for the following module.\n\
         \n\
         Target Module Path: {module_id}\n\
         (Use this path to import the module correctly in your tests, e.g. `{import}`.)\n\
         \n\
         Target Module Code:\n\
         ```{fence}\n{source}\n```\n\
         \n\
         Existing Test Code:\n\
         ```{fence}\n{existing}\n```\n\
         \n\
         Coverage Info:\n\
         {summary}\n\
         \n\
         Task:\n\
         1. Analyze the module code and existing tests.\n\
         2. Write a COMPLETE {language} test file that improves coverage.\n\
         3. If tests exist, keep them and add new ones. If no tests exist, create a full suite.\n\
         4. Ensure all imports are correct based on the module path provided.\n\
         5. Return ONLY the code for the test file. No markdown formatting, no explanations.\n",
        module_id = request.module_id,
        import = import_path(&request.module_id),
        source = request.module_source.trim_end(),
        existing = existing.trim_end(),
        summary = request.coverage_summary,
    )
}

/// Produces the full text of a replacement test file.
///
/// Implementations must not touch the filesystem: the session decides what
/// gets written and when.
pub trait TestGenerator: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<String, GeneratorError>> + Send;
}

impl<T: TestGenerator> TestGenerator for &T {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<String, GeneratorError>> + Send {
        (**self).generate(request)
    }
}

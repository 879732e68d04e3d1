//! OpenAI-compatible chat completions generator.
//!
//! Works against any server exposing `/v1/chat/completions`: the hosted
//! API, ollama, llama.cpp and friends.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::GeneratorError;
use crate::request::{GenerationRequest, SYSTEM_PROMPT, TestGenerator, build_prompt};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Strip a markdown fence the model may have wrapped the file in.
///
/// Handles a leading ```` ```lang ```` (or bare ```` ``` ````) line and a
/// trailing ```` ``` ````, then trims surrounding whitespace.
pub fn strip_code_fences(content: &str) -> String {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.split_once('\n') {
            Some((tag, body)) if !tag.trim().contains(' ') => body,
            _ => rest,
        };
    }
    if let Some(body) = text.trim_end().strip_suffix("```") {
        text = body;
    }
    text.trim().to_string()
}

#[derive(Debug, Clone)]
pub struct ChatCompletionGenerator {
    base_url: String,
    model: String,
    api_key: Option<String>,
    language: String,
    client: reqwest::Client,
}

impl ChatCompletionGenerator {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// # Arguments
    /// * `base_url` - server root, e.g. `https://api.openai.com` or `http://localhost:11434`
    /// * `model` - model name sent with every request
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            language: "Python".to_string(),
            client: build_client(Self::DEFAULT_TIMEOUT),
        }
    }

    /// Bearer token. Without one, requests go out unauthenticated (local servers).
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Language named in the prompt and its code fences.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

impl TestGenerator for ChatCompletionGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        let prompt = build_prompt(&self.language, request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: Role::User,
                    content: &prompt,
                },
            ],
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        tracing::info!(module = %request.module_id, model = %self.model, "requesting tests");
        let start = Instant::now();

        let mut call = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let resp = call.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "generation request rejected");
            return Err(GeneratorError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let response: ChatResponse = resp.json().await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GeneratorError::EmptyResponse)?;
        let code = strip_code_fences(&content);
        if code.is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            bytes = code.len(),
            "tests generated"
        );
        Ok(code)
    }
}

//! Language-model collaborator boundary.
//!
//! The core only needs "given a prompt, return text". `OpenAiChatModel` talks
//! to any OpenAI-compatible `/chat/completions` endpoint; `RetryingModel` adds
//! caller-side bounded retries with exponential backoff.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use session_state::DialogueRole;
use tokio::time::sleep;
use tracing::debug;

use crate::config::IntelConfig;
use crate::error::CollaboratorError;

/// One message of a chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: DialogueRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: DialogueRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: DialogueRole::Assistant,
            content: content.into(),
        }
    }
}

/// A system prompt plus the conversation so far.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

impl ModelRequest {
    /// Single-shot request: one system prompt, one user message.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: vec![ChatMessage::user(user)],
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: &ModelRequest) -> Result<String, CollaboratorError>;
}

/// Run `fut`, abandoning it after `timeout_ms`.
pub async fn call_with_timeout<T, F>(timeout_ms: u64, fut: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(timeout_ms)),
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenAiChatConfig {
    pub chat_completions_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
}

#[derive(Clone)]
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: OpenAiChatConfig,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiChatConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| CollaboratorError::Unconfigured(format!("http client: {err}")))?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, CollaboratorError> {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
        );
        let body = json!({ "model": self.config.model, "messages": messages });

        let response = self
            .client
            .post(&self.config.chat_completions_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CollaboratorError::Timeout(self.config.timeout_ms)
                } else {
                    CollaboratorError::Provider("request_unavailable".to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|_| CollaboratorError::InvalidReply("response_body_read_failed".into()))?;

        if !status.is_success() {
            let detail = format!("status={}", status.as_u16());
            return Err(if is_retryable_status(status) {
                CollaboratorError::Provider(detail)
            } else {
                CollaboratorError::Rejected(detail)
            });
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|_| CollaboratorError::InvalidReply("response_json_parse_failed".into()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::InvalidReply("missing_choice".into()))?;

        debug!(model = %self.config.model, chars = content.len(), "model reply received");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Wrappers
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff (`base * 2^attempt`).
pub struct RetryingModel<M> {
    inner: M,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl<M> RetryingModel<M> {
    pub fn new(inner: M, max_retries: u32, base_backoff_ms: u64) -> Self {
        Self {
            inner,
            max_retries,
            base_backoff_ms,
        }
    }
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for RetryingModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, CollaboratorError> {
        let mut attempt = 0_u32;
        loop {
            match self.inner.complete(request).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let backoff_ms = self
                        .base_backoff_ms
                        .saturating_mul(2_u64.saturating_pow(attempt));
                    debug!(attempt = attempt + 1, backoff_ms, error = %err, "retrying model call");
                    sleep(Duration::from_millis(backoff_ms)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Stand-in when no credentials are configured; every call fails fast.
#[derive(Debug, Clone)]
pub struct UnconfiguredModel {
    reason: String,
}

impl UnconfiguredModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for UnconfiguredModel {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _request: &ModelRequest) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unconfigured(self.reason.clone()))
    }
}

/// Build the model described by `config`.
pub fn model_from_config(config: &IntelConfig) -> Arc<dyn LanguageModel> {
    let Some(api_key) = config.api_key.clone() else {
        return Arc::new(UnconfiguredModel::new("OPENAI_API_KEY is not set"));
    };
    let chat = OpenAiChatConfig {
        chat_completions_url: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
        api_key,
        model: config.model.clone(),
        timeout_ms: config.timeout_ms,
    };
    match OpenAiChatModel::new(chat) {
        Ok(model) => Arc::new(RetryingModel::new(
            model,
            config.max_retries,
            config.retry_base_backoff_ms,
        )),
        Err(err) => Arc::new(UnconfiguredModel::new(err.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"))
}

/// Pull the first `{...}` object out of a reply, ignoring code fences and prose.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let stripped: String = text
        .trim()
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let candidate = json_object_pattern().find(&stripped)?;
    match serde_json::from_str::<Value>(candidate.as_str()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Coerce a JSON value into a list of non-empty strings.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedModel;

    #[test]
    fn extracts_json_from_fenced_reply() {
        let reply = "```json\n{\"rewritten_prompt\": \"x\", \"justification\": [\"a\"]}\n```";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["rewritten_prompt"], "x");
    }

    #[test]
    fn extracts_json_surrounded_by_prose() {
        let reply = "Sure! Here it is: {\"a\": 1} hope that helps";
        assert_eq!(extract_json_object(reply).unwrap()["a"], 1);
    }

    #[test]
    fn non_json_reply_is_none() {
        assert!(extract_json_object("no braces here").is_none());
        assert!(extract_json_object("{broken").is_none());
    }

    #[test]
    fn string_list_accepts_scalars_and_arrays() {
        assert_eq!(string_list(Some(&json!("one"))), vec!["one"]);
        assert_eq!(string_list(Some(&json!(["a", " ", "b"]))), vec!["a", "b"]);
        assert!(string_list(Some(&json!(42))).is_empty());
        assert!(string_list(None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_model_retries_transient_failures() {
        let scripted = ScriptedModel::new(vec![
            Err(CollaboratorError::Provider("status=503".into())),
            Err(CollaboratorError::Timeout(10)),
            Ok("finally".to_string()),
        ]);
        let model = RetryingModel::new(scripted.clone(), 2, 100);
        let out = model.complete(&ModelRequest::new("s", "u")).await.unwrap();
        assert_eq!(out, "finally");
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_model_gives_up_after_budget() {
        let scripted = ScriptedModel::new(vec![
            Err(CollaboratorError::Provider("a".into())),
            Err(CollaboratorError::Provider("b".into())),
        ]);
        let model = RetryingModel::new(scripted.clone(), 1, 10);
        let err = model.complete(&ModelRequest::new("s", "u")).await.unwrap_err();
        assert_eq!(err, CollaboratorError::Provider("b".into()));
        assert_eq!(scripted.calls(), 2);
    }

    #[tokio::test]
    async fn rejected_requests_are_not_retried() {
        let scripted = ScriptedModel::new(vec![Err(CollaboratorError::Rejected(
            "status=401".into(),
        ))]);
        let model = RetryingModel::new(scripted.clone(), 3, 10);
        assert!(model.complete(&ModelRequest::new("s", "u")).await.is_err());
        assert_eq!(scripted.calls(), 1);
    }

    #[tokio::test]
    async fn unconfigured_model_fails_fast() {
        let config = IntelConfig::default();
        let model = model_from_config(&config);
        let err = model
            .complete(&ModelRequest::new("s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unconfigured(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn call_with_timeout_abandons_slow_calls() {
        let err = call_with_timeout(50, async {
            sleep(Duration::from_secs(5)).await;
            Ok::<_, CollaboratorError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err, CollaboratorError::Timeout(50));
    }
}

//! The task-agent collaborator that answers forwarded questions.
//!
//! Two backends:
//! - [`ModelAssistant`]: a language model with history from [`SessionMemory`],
//!   trimmed before every request.
//! - [`CodexCliAssistant`]: the `codex exec --experimental-json` CLI, resumed
//!   by the handle it reports on its first reply.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use session_state::{DialogueRole, MemoryItem, SessionId, SessionMemory, Turn};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::CollaboratorError;
use crate::llm::{call_with_timeout, ChatMessage, LanguageModel, ModelRequest};
use crate::obs;
use crate::trimmer::{trim, TrimPolicy};

/// Text returned by an assistant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssistantReply {
    pub text: String,
    /// Reasoning summaries, when the backend exposes them.
    pub reasoning: Vec<String>,
    /// Handle to resume the assistant's own conversation later.
    pub handle: Option<String>,
}

impl AssistantReply {
    /// Text for the turn log: reasoning lines first, then the answer.
    pub fn transcript(&self) -> String {
        if self.reasoning.is_empty() {
            return self.text.clone();
        }
        let mut lines = self.reasoning.clone();
        lines.push(self.text.clone());
        lines.join("\n")
    }
}

#[async_trait]
pub trait Assistant: Send + Sync {
    fn name(&self) -> &str;

    /// Answer `prompt`. `instructions` is the session preamble; `handle`
    /// resumes an earlier conversation when the backend supports it.
    async fn respond(
        &self,
        session_id: &SessionId,
        instructions: &str,
        prompt: &str,
        handle: Option<&str>,
    ) -> Result<AssistantReply, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Language-model backend
// ---------------------------------------------------------------------------

pub struct ModelAssistant {
    model: Arc<dyn LanguageModel>,
    memory: Arc<dyn SessionMemory>,
    policy: TrimPolicy,
    timeout_ms: u64,
}

impl ModelAssistant {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        memory: Arc<dyn SessionMemory>,
        policy: TrimPolicy,
        timeout_ms: u64,
    ) -> Self {
        Self {
            model,
            memory,
            policy,
            timeout_ms,
        }
    }

    async fn history(&self, session_id: &SessionId) -> Vec<ChatMessage> {
        let items = match self.memory.get_items(session_id, None).await {
            Ok(items) => items,
            Err(err) => {
                obs::emit_storage_degraded(session_id.as_str(), "memory.get_items", &err);
                return Vec::new();
            }
        };

        let turns: Vec<Turn> = items
            .into_iter()
            .zip(1_u64..)
            .map(|(item, index)| match item.role {
                DialogueRole::User => Turn::user(index, item.content),
                DialogueRole::Assistant => Turn::agent(index, item.content),
                DialogueRole::System => Turn::system(item.content),
            })
            .collect();

        trim(&turns, &self.policy)
            .into_iter()
            .map(|turn| ChatMessage {
                role: if turn.is_user() {
                    DialogueRole::User
                } else if turn.is_system() {
                    DialogueRole::System
                } else {
                    DialogueRole::Assistant
                },
                content: turn.content,
            })
            .collect()
    }
}

#[async_trait]
impl Assistant for ModelAssistant {
    fn name(&self) -> &str {
        self.model.name()
    }

    async fn respond(
        &self,
        session_id: &SessionId,
        instructions: &str,
        prompt: &str,
        _handle: Option<&str>,
    ) -> Result<AssistantReply, CollaboratorError> {
        let mut messages = self.history(session_id).await;
        messages.push(ChatMessage::user(prompt));
        let request = ModelRequest {
            system: instructions.to_string(),
            messages,
        };

        let text = call_with_timeout(self.timeout_ms, self.model.complete(&request)).await?;

        let items = [
            MemoryItem::new(DialogueRole::User, prompt),
            MemoryItem::new(DialogueRole::Assistant, text.clone()),
        ];
        if let Err(err) = self.memory.add_items(session_id, &items).await {
            obs::emit_storage_degraded(session_id.as_str(), "memory.add_items", &err);
        }

        Ok(AssistantReply {
            text,
            reasoning: Vec::new(),
            handle: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Codex CLI backend
// ---------------------------------------------------------------------------

const NO_RESPONSE: &str = "(no response)";

/// Bridge to `codex exec --experimental-json`.
#[derive(Debug, Clone)]
pub struct CodexCliAssistant {
    binary: PathBuf,
    workdir: PathBuf,
    config_overrides: Vec<String>,
    timeout_ms: u64,
}

impl CodexCliAssistant {
    pub fn new(workdir: impl Into<PathBuf>, timeout_ms: u64) -> Self {
        Self {
            binary: PathBuf::from("codex"),
            workdir: workdir.into(),
            config_overrides: Vec::new(),
            timeout_ms,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Extra arguments placed after `--experimental-json` (e.g. `-c key=value`).
    pub fn with_config_overrides(mut self, overrides: Vec<String>) -> Self {
        self.config_overrides = overrides;
        self
    }

    fn args(&self, prompt: &str, handle: Option<&str>) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--experimental-json".to_string()];
        args.extend(self.config_overrides.iter().cloned());
        if let Some(handle) = handle {
            args.push("resume".to_string());
            args.push(handle.to_string());
        }
        args.push(prompt.to_string());
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<AssistantReply, CollaboratorError> {
        let child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => CollaboratorError::Process(format!(
                    "{} binary not found; is it installed?",
                    self.binary.display()
                )),
                _ => CollaboratorError::Process(err.to_string()),
            })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| CollaboratorError::Process(err.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            return Err(CollaboratorError::Process(format!(
                "codex exited with code {code}: {}",
                last_line(&stderr).unwrap_or("(no stderr)")
            )));
        }

        parse_codex_events(&stdout)
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|l| !l.is_empty())
}

#[async_trait]
impl Assistant for CodexCliAssistant {
    fn name(&self) -> &str {
        "codex"
    }

    async fn respond(
        &self,
        session_id: &SessionId,
        instructions: &str,
        prompt: &str,
        handle: Option<&str>,
    ) -> Result<AssistantReply, CollaboratorError> {
        // A resumed conversation already carries the preamble.
        let prompt = match handle {
            None if !instructions.trim().is_empty() => {
                format!("{}\n\n{}", instructions.trim(), prompt)
            }
            _ => prompt.to_string(),
        };
        debug!(session_id = %session_id, resume = handle.is_some(), "invoking codex");

        let mut reply =
            call_with_timeout(self.timeout_ms, self.run(self.args(&prompt, handle))).await?;
        if reply.handle.is_none() {
            reply.handle = handle.map(str::to_string);
        }
        Ok(reply)
    }
}

/// Parse the JSON-lines event stream printed by `codex exec --experimental-json`.
///
/// Non-JSON lines (banners) are kept as part of the answer.
pub fn parse_codex_events(stdout: &str) -> Result<AssistantReply, CollaboratorError> {
    let mut reply = AssistantReply::default();
    let mut answer = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            answer.push(line.to_string());
            continue;
        };

        match event.get("type").and_then(Value::as_str) {
            Some("session.created") => {
                if let Some(id) = event.get("session_id").and_then(Value::as_str) {
                    reply.handle = Some(id.to_string());
                }
            }
            Some("item.completed") => {
                let item = event.get("item").unwrap_or(&Value::Null);
                let text = item
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                match item.get("item_type").and_then(Value::as_str) {
                    Some("assistant_message") => answer.push(text.to_string()),
                    Some("reasoning") => reply.reasoning.push(text.to_string()),
                    _ => {}
                }
            }
            Some("response.error") => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown codex error");
                warn!(error = %message, "codex reported an error");
                return Err(CollaboratorError::Process(message.to_string()));
            }
            _ => {}
        }
    }

    let text = answer.join("\n\n");
    reply.text = if text.trim().is_empty() {
        NO_RESPONSE.to_string()
    } else {
        text.trim().to_string()
    };
    Ok(reply)
}

//! Scripted collaborators for tests.
//!
//! Both fakes replay a fixed script and record what they were asked, so
//! tests can assert on prompts without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use session_state::SessionId;

use crate::assistant::{Assistant, AssistantReply};
use crate::error::CollaboratorError;
use crate::llm::{LanguageModel, ModelRequest};

#[derive(Debug, Default)]
struct ModelScript {
    replies: VecDeque<Result<String, CollaboratorError>>,
    requests: Vec<ModelRequest>,
}

/// Language model that returns queued replies in order.
///
/// Clones share the same script, so a test can keep a handle after moving
/// the model into a wrapper.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    script: Arc<Mutex<ModelScript>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, CollaboratorError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(ModelScript {
                replies: replies.into(),
                requests: Vec::new(),
            })),
        }
    }

    /// Model that answers every listed prompt successfully.
    pub fn replying<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn push(&self, reply: Result<String, CollaboratorError>) {
        self.script.lock().unwrap().replies.push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.script.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, CollaboratorError> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(request.clone());
        script
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(CollaboratorError::Unconfigured("script exhausted".into())))
    }
}

/// One call received by [`ScriptedAssistant`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantCall {
    pub session_id: SessionId,
    pub instructions: String,
    pub prompt: String,
    pub handle: Option<String>,
}

#[derive(Debug, Default)]
struct AssistantScript {
    replies: VecDeque<Result<String, CollaboratorError>>,
    calls: Vec<AssistantCall>,
}

/// Assistant that replays queued answers and hands out a fixed handle.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAssistant {
    script: Arc<Mutex<AssistantScript>>,
    handle: Option<String>,
}

impl ScriptedAssistant {
    pub fn new(replies: Vec<Result<String, CollaboratorError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(AssistantScript {
                replies: replies.into(),
                calls: Vec::new(),
            })),
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn calls(&self) -> Vec<AssistantCall> {
        self.script.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    fn name(&self) -> &str {
        "scripted-assistant"
    }

    async fn respond(
        &self,
        session_id: &SessionId,
        instructions: &str,
        prompt: &str,
        handle: Option<&str>,
    ) -> Result<AssistantReply, CollaboratorError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(AssistantCall {
            session_id: session_id.clone(),
            instructions: instructions.to_string(),
            prompt: prompt.to_string(),
            handle: handle.map(str::to_string),
        });
        let text = script
            .replies
            .pop_front()
            .unwrap_or_else(|| Ok("(no response)".to_string()))?;
        Ok(AssistantReply {
            text,
            reasoning: Vec::new(),
            handle: self.handle.clone(),
        })
    }
}

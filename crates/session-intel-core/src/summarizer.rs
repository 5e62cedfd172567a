//! Session summarizer boundary.
//!
//! A summarizer turns a transcript into a structured [`Summary`]. It owns no
//! state; failing is always allowed and the caller closes the session
//! without a new summary.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use session_state::{Gap, Summary, Turn};
use tracing::debug;

use crate::error::CollaboratorError;
use crate::llm::{call_with_timeout, extract_json_object, string_list, LanguageModel, ModelRequest};

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `turns`. `previous_gaps` are the gaps of the latest earlier
    /// summary so the collaborator can mark them resolved.
    async fn summarize(
        &self,
        turns: &[Turn],
        previous_gaps: &[Gap],
    ) -> Result<Summary, CollaboratorError>;
}

const SYSTEM_PROMPT: &str = "You are an assistant that produces concise session retrospectives \
for developers. Summaries must help a human revisit the session quickly.";

/// Summarizer backed by a [`LanguageModel`].
pub struct LlmSummarizer {
    model: Arc<dyn LanguageModel>,
    timeout_ms: u64,
}

impl LlmSummarizer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout_ms: u64) -> Self {
        Self { model, timeout_ms }
    }

    fn request(turns: &[Turn], previous_gaps: &[Gap]) -> Result<ModelRequest, CollaboratorError> {
        let transcript: Vec<Value> = turns
            .iter()
            .filter(|t| !t.is_system())
            .map(|t| json!({ "turn": t.turn, "role": t.role.label(), "content": t.content }))
            .collect();
        let transcript = serde_json::to_string_pretty(&transcript)
            .map_err(|e| CollaboratorError::InvalidReply(e.to_string()))?;

        let previous = if previous_gaps.is_empty() {
            "(none)".to_string()
        } else {
            previous_gaps
                .iter()
                .map(|g| format!("- [{}] {}", if g.resolved { "x" } else { " " }, g.description))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let user = format!(
            "Here is the chronological log of user and agent turns for a coding session.\n\
             Focus on knowledge gaps and learning opportunities.\n\
             Gaps tracked so far (earlier summaries and the recapped session):\n{previous}\n\n\
             Respond with JSON containing `highlights` (3-5 short strings), \
             `gaps` (array of objects with `description` and `resolved` boolean; \
             mark an earlier gap resolved if the session closed it) and \
             `next_steps` (array of short strings).\n\
             Transcript JSON:\n```json\n{transcript}\n```"
        );
        Ok(ModelRequest::new(SYSTEM_PROMPT, user))
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        turns: &[Turn],
        previous_gaps: &[Gap],
    ) -> Result<Summary, CollaboratorError> {
        if !turns.iter().any(|t| !t.is_system()) {
            return Err(CollaboratorError::InvalidReply(
                "nothing to summarize".to_string(),
            ));
        }
        let request = Self::request(turns, previous_gaps)?;
        let reply = call_with_timeout(self.timeout_ms, self.model.complete(&request)).await?;
        debug!(model = self.model.name(), chars = reply.len(), "summary reply");
        parse_summary_reply(&reply)
    }
}

/// Parse a summarizer reply into a [`Summary`].
pub fn parse_summary_reply(reply: &str) -> Result<Summary, CollaboratorError> {
    let value = extract_json_object(reply)
        .ok_or_else(|| CollaboratorError::InvalidReply("summary reply was not JSON".into()))?;

    let gaps = match value.get("gaps") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_gap).collect(),
        other => string_list(other).into_iter().map(Gap::open).collect(),
    };

    Ok(Summary::new(
        string_list(value.get("highlights")),
        gaps,
        string_list(value.get("next_steps")),
    ))
}

fn parse_gap(item: &Value) -> Option<Gap> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(Gap::open(s.trim())),
        Value::Object(map) => {
            let description = map.get("description")?.as_str()?.trim();
            if description.is_empty() {
                return None;
            }
            let resolved = map
                .get("resolved")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(Gap {
                description: description.to_string(),
                resolved,
            })
        }
        _ => None,
    }
}

/// Keep gap resolution monotonic: a gap resolved in any earlier summary
/// stays resolved in `summary`. Duplicate gaps collapse to their first
/// occurrence.
pub fn reconcile_gaps(earlier: &[Summary], mut summary: Summary) -> Summary {
    let resolved: HashSet<String> = earlier
        .iter()
        .flat_map(|s| s.gaps.iter())
        .filter(|g| g.resolved)
        .map(Gap::key)
        .collect();

    let mut seen = HashSet::new();
    summary.gaps.retain(|g| seen.insert(g.key()));
    for gap in &mut summary.gaps {
        if !gap.resolved && resolved.contains(&gap.key()) {
            gap.resolved = true;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedModel;

    fn transcript() -> Vec<Turn> {
        vec![
            Turn::user(1, "Why does my useEffect run twice?"),
            Turn::agent(2, "StrictMode mounts components twice in development."),
        ]
    }

    #[tokio::test]
    async fn parses_structured_reply() {
        let model = ScriptedModel::replying([r#"```json
{"highlights": ["Explored StrictMode double mount"],
 "gaps": [{"description": "useEffect lifecycle", "resolved": false}],
 "next_steps": ["Write a cleanup function"]}
```"#]);
        let summarizer = LlmSummarizer::new(Arc::new(model.clone()), 1_000);
        let summary = summarizer.summarize(&transcript(), &[]).await.unwrap();

        assert_eq!(summary.highlights, vec!["Explored StrictMode double mount"]);
        assert_eq!(summary.gaps, vec![Gap::open("useEffect lifecycle")]);
        assert_eq!(summary.next_steps, vec!["Write a cleanup function"]);

        let request = &model.requests()[0];
        assert!(request.messages[0].content.contains("useEffect run twice"));
        assert!(request.messages[0].content.contains("(none)"));
    }

    #[tokio::test]
    async fn previous_gaps_are_sent() {
        let model = ScriptedModel::replying([r#"{"highlights": [], "gaps": [], "next_steps": []}"#]);
        let summarizer = LlmSummarizer::new(Arc::new(model.clone()), 1_000);
        summarizer
            .summarize(&transcript(), &[Gap::open("useEffect lifecycle")])
            .await
            .unwrap();
        assert!(model.requests()[0].messages[0]
            .content
            .contains("- [ ] useEffect lifecycle"));
    }

    #[tokio::test]
    async fn empty_transcript_is_a_failure() {
        let model = ScriptedModel::default();
        let summarizer = LlmSummarizer::new(Arc::new(model.clone()), 1_000);
        let err = summarizer
            .summarize(&[Turn::system("preface")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidReply(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn collaborator_failure_propagates() {
        let model = ScriptedModel::new(vec![Err(CollaboratorError::Unconfigured("no key".into()))]);
        let summarizer = LlmSummarizer::new(Arc::new(model), 1_000);
        assert!(summarizer.summarize(&transcript(), &[]).await.is_err());
    }

    #[test]
    fn prose_reply_is_invalid() {
        assert!(parse_summary_reply("Great session, well done!").is_err());
    }

    #[test]
    fn gaps_accept_plain_strings() {
        let summary =
            parse_summary_reply(r#"{"gaps": ["closures", {"description": "refs", "resolved": true}, 3]}"#)
                .unwrap();
        assert_eq!(
            summary.gaps,
            vec![Gap::open("closures"), Gap::resolved("refs")]
        );
    }

    #[test]
    fn reconcile_keeps_resolved_gaps_resolved() {
        let earlier = vec![Summary::new(
            vec![],
            vec![Gap::resolved("useEffect lifecycle"), Gap::open("memo")],
            vec![],
        )];
        let next = Summary::new(
            vec![],
            vec![
                Gap::open("useEffect Lifecycle."),
                Gap::open("memo"),
                Gap::open("MEMO"),
            ],
            vec![],
        );
        let reconciled = reconcile_gaps(&earlier, next);
        assert_eq!(reconciled.gaps.len(), 2);
        assert!(reconciled.gaps[0].resolved);
        assert!(!reconciled.gaps[1].resolved);
    }
}

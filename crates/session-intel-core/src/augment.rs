//! Prompt augmentation for learn mode.
//!
//! The augmenter asks the language model to rewrite a question using a
//! recap of an earlier session. Any failure yields the original question
//! unchanged with an empty justification and a notice saying why.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use session_state::{AugmentationRecord, Decision};
use tracing::debug;

use crate::llm::{call_with_timeout, extract_json_object, string_list, LanguageModel, ModelRequest};
use crate::obs;
use crate::prompt_diff::diff_prompts;
use crate::recap::Recap;

const SYSTEM_PROMPT: &str = "You are the Knowledge Exchange agent. Improve the user's request so \
the task agent benefits from lessons learned in prior sessions. Use the context below to add \
reminders, clarify intent, or highlight prior solutions.";

/// A suggested rewrite, before the human decides.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentationResult {
    pub suggestion: String,
    pub justification: Vec<String>,
    /// Unified diff original → suggestion; empty when unchanged.
    pub diff: String,
    /// Raw model reply, kept for debugging.
    pub raw_text: String,
    /// Set when the rewrite was skipped.
    pub notice: Option<String>,
}

impl AugmentationResult {
    fn unchanged(original: &str, raw_text: String, notice: impl Into<String>) -> Self {
        Self {
            suggestion: original.to_string(),
            justification: Vec::new(),
            diff: String::new(),
            raw_text,
            notice: Some(notice.into()),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.diff.is_empty()
    }
}

/// What the human did with the preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanChoice {
    Accept,
    Reject,
    Edit(String),
}

pub struct Augmenter {
    model: Arc<dyn LanguageModel>,
    timeout_ms: u64,
}

impl Augmenter {
    pub fn new(model: Arc<dyn LanguageModel>, timeout_ms: u64) -> Self {
        Self { model, timeout_ms }
    }

    fn request(original: &str, recap: Option<&Recap>) -> ModelRequest {
        let context = recap
            .map(Recap::render_context)
            .unwrap_or_else(|| "(No additional context)".to_string());
        let gaps: Vec<String> = recap
            .map(|r| r.open_gaps().iter().map(|g| g.description.clone()).collect())
            .unwrap_or_default();
        let gap_hint = if gaps.is_empty() {
            String::new()
        } else {
            format!(
                "Open knowledge gaps to address: {}. When the rewrite draws on one, name it in the justification.\n\n",
                gaps.join("; ")
            )
        };

        let user = format!(
            "Original user request:\n```\n{original}\n```\n\n\
             Context for augmentation:\n```\n{context}```\n\n\
             {gap_hint}\
             Respond with JSON containing `rewritten_prompt` (string) and \
             `justification` (array of short bullet strings)."
        );
        ModelRequest::new(SYSTEM_PROMPT, user)
    }

    /// Suggest a rewrite of `original`. Never fails.
    pub async fn augment(&self, original: &str, recap: Option<&Recap>) -> AugmentationResult {
        if original.trim().is_empty() {
            return AugmentationResult::unchanged(original, String::new(), "No content provided.");
        }

        let request = Self::request(original, recap);
        let raw_text = match call_with_timeout(self.timeout_ms, self.model.complete(&request)).await
        {
            Ok(text) => text,
            Err(err) => {
                obs::emit_collaborator_failed("augmenter", &err);
                return AugmentationResult::unchanged(
                    original,
                    String::new(),
                    format!("Augmentation skipped: {err}"),
                );
            }
        };

        let Some(parsed) = extract_json_object(&raw_text) else {
            return AugmentationResult::unchanged(
                original,
                raw_text,
                "Augmentation skipped: model response was not valid JSON.",
            );
        };

        let suggestion = match parsed.get("rewritten_prompt") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => {
                return AugmentationResult::unchanged(
                    original,
                    raw_text,
                    "Augmentation skipped: model did not provide a rewritten prompt.",
                )
            }
        };

        let mut justification = string_list(parsed.get("justification"));
        if let Some(recap) = recap {
            let references = gap_references(recap, original, &suggestion, &justification);
            justification.extend(references);
        }
        let diff = diff_prompts(original, &suggestion);
        debug!(changed = !diff.is_empty(), reasons = justification.len(), "augmentation ready");

        AugmentationResult {
            suggestion,
            justification,
            diff,
            raw_text,
            notice: None,
        }
    }
}

const STOPWORDS: [&str; 12] = [
    "about", "does", "from", "have", "into", "that", "their", "there", "this", "what", "when",
    "with",
];

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Justification bullets for open recap gaps the question or rewrite touches
/// and the model's own bullets do not already name.
fn gap_references(
    recap: &Recap,
    original: &str,
    suggestion: &str,
    justification: &[String],
) -> Vec<String> {
    let asked: HashSet<String> = terms(original).union(&terms(suggestion)).cloned().collect();
    let named = justification.join("\n").to_lowercase();

    recap
        .open_gaps()
        .into_iter()
        .filter(|gap| !named.contains(&gap.key()))
        .filter(|gap| terms(&gap.description).iter().any(|t| asked.contains(t)))
        .map(|gap| {
            format!(
                "Draws on open gap from session {}: {}",
                recap.session_id,
                gap.description.trim()
            )
        })
        .collect()
}

/// Turn the human's choice into the record persisted before forwarding.
///
/// An edit matching the suggestion counts as accepted; an empty edit or one
/// matching the original counts as rejected.
pub fn resolve(
    turn: u64,
    original: &str,
    result: &AugmentationResult,
    choice: HumanChoice,
) -> AugmentationRecord {
    let (final_text, decision) = match choice {
        HumanChoice::Accept => (result.suggestion.clone(), Decision::Accepted),
        HumanChoice::Reject => (original.to_string(), Decision::Rejected),
        HumanChoice::Edit(text) => {
            let text = text.trim().to_string();
            if text.is_empty() || text == original.trim() {
                (original.to_string(), Decision::Rejected)
            } else if text == result.suggestion.trim() {
                (result.suggestion.clone(), Decision::Accepted)
            } else {
                (text, Decision::Edited)
            }
        }
    };

    AugmentationRecord {
        turn,
        original: original.to_string(),
        suggestion: result.suggestion.clone(),
        final_diff: diff_prompts(original, &final_text),
        final_text,
        justification: result.justification.clone(),
        suggestion_diff: result.diff.clone(),
        decision,
        recorded_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::fakes::ScriptedModel;
    use crate::recap::RecapSource;
    use session_state::{Gap, SessionId, Summary};

    fn recap_with_gap() -> Recap {
        Recap {
            session_id: SessionId::parse("20250101-120000-abcdef").unwrap(),
            source: RecapSource::Summary(Summary::new(
                vec!["Debugged a double fetch".into()],
                vec![Gap::open("useEffect lifecycle")],
                vec!["Practice cleanup functions".into()],
            )),
            notices: vec![],
        }
    }

    #[tokio::test]
    async fn unavailable_collaborator_returns_original() {
        let model = ScriptedModel::new(vec![Err(CollaboratorError::Unconfigured("no key".into()))]);
        let augmenter = Augmenter::new(Arc::new(model), 1_000);
        let result = augmenter.augment("How do I fetch data?", None).await;

        assert_eq!(result.suggestion, "How do I fetch data?");
        assert!(result.justification.is_empty());
        assert!(result.is_unchanged());
        assert!(result.notice.unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn rejected_fallback_records_original() {
        let augmenter = Augmenter::new(Arc::new(ScriptedModel::default()), 1_000);
        let result = augmenter.augment("q", None).await;
        let record = resolve(1, "q", &result, HumanChoice::Accept);
        assert_eq!(record.final_text, "q");
        assert!(record.justification.is_empty());
        assert_eq!(record.final_diff, "");
    }

    #[tokio::test]
    async fn open_gap_flows_into_prompt_and_justification() {
        let model = ScriptedModel::replying([r#"Here you go:
{"rewritten_prompt": "How do I fetch data in React? Remind me how the useEffect lifecycle and cleanup work.",
 "justification": ["Last session left the useEffect lifecycle gap open"]}"#]);
        let augmenter = Augmenter::new(Arc::new(model.clone()), 1_000);
        let recap = recap_with_gap();
        let result = augmenter
            .augment("How do I fetch data in React?", Some(&recap))
            .await;

        let sent = &model.requests()[0].messages[0].content;
        assert!(sent.contains("Open knowledge gaps to address: useEffect lifecycle"));
        assert!(result
            .justification
            .iter()
            .any(|j| j.contains("useEffect lifecycle")));
        assert!(result.diff.contains("+How do I fetch data in React? Remind me"));
        assert!(result.notice.is_none());
    }

    #[tokio::test]
    async fn touched_gap_is_named_even_when_the_model_omits_it() {
        let model = ScriptedModel::replying([
            r#"{"rewritten_prompt": "How should a useEffect that fetches data clean up?",
                "justification": ["clearer wording"]}"#,
        ]);
        let augmenter = Augmenter::new(Arc::new(model), 1_000);
        let result = augmenter
            .augment("Why does my useEffect fetch twice?", Some(&recap_with_gap()))
            .await;

        assert_eq!(
            result.justification,
            vec![
                "clearer wording".to_string(),
                "Draws on open gap from session 20250101-120000-abcdef: useEffect lifecycle"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unrelated_gap_adds_no_bullet() {
        let model = ScriptedModel::replying([
            r#"{"rewritten_prompt": "How do I center a div with flexbox?",
                "justification": ["names the layout tool"]}"#,
        ]);
        let augmenter = Augmenter::new(Arc::new(model), 1_000);
        let result = augmenter
            .augment("How do I center a div?", Some(&recap_with_gap()))
            .await;
        assert_eq!(result.justification, vec!["names the layout tool"]);
    }

    #[tokio::test]
    async fn non_json_reply_falls_back() {
        let model = ScriptedModel::replying(["I would rather not."]);
        let augmenter = Augmenter::new(Arc::new(model), 1_000);
        let result = augmenter.augment("q", None).await;
        assert_eq!(result.suggestion, "q");
        assert_eq!(result.raw_text, "I would rather not.");
        assert!(result.notice.is_some());
    }

    #[tokio::test]
    async fn empty_question_skips_the_model() {
        let model = ScriptedModel::default();
        let augmenter = Augmenter::new(Arc::new(model.clone()), 1_000);
        let result = augmenter.augment("   ", None).await;
        assert_eq!(result.suggestion, "   ");
        assert_eq!(model.calls(), 0);
    }

    fn suggested() -> AugmentationResult {
        AugmentationResult {
            suggestion: "better q".into(),
            justification: vec!["why".into()],
            diff: diff_prompts("q", "better q"),
            raw_text: String::new(),
            notice: None,
        }
    }

    #[test]
    fn decisions_are_normalized() {
        let result = suggested();
        let accept = resolve(3, "q", &result, HumanChoice::Accept);
        assert_eq!((accept.final_text.as_str(), accept.decision), ("better q", Decision::Accepted));

        let reject = resolve(3, "q", &result, HumanChoice::Reject);
        assert_eq!((reject.final_text.as_str(), reject.decision), ("q", Decision::Rejected));

        let same_as_suggestion = resolve(3, "q", &result, HumanChoice::Edit(" better q ".into()));
        assert_eq!(same_as_suggestion.decision, Decision::Accepted);

        let same_as_original = resolve(3, "q", &result, HumanChoice::Edit("q".into()));
        assert_eq!(same_as_original.decision, Decision::Rejected);

        let empty = resolve(3, "q", &result, HumanChoice::Edit("  ".into()));
        assert_eq!((empty.final_text.as_str(), empty.decision), ("q", Decision::Rejected));

        let edited = resolve(3, "q", &result, HumanChoice::Edit("my own q".into()));
        assert_eq!(edited.decision, Decision::Edited);
        assert!(edited.final_diff.contains("+my own q"));
        assert_eq!(edited.suggestion_diff, result.diff);
    }
}

//! Session pipeline: wires the stores and collaborators for one session.
//!
//! Usage:
//! 1. [`SessionPipeline::start`] resolves the session id, mode and recap.
//! 2. [`SessionPipeline::prepare_turn`] builds the preview for a question.
//! 3. [`SessionPipeline::submit_turn`] persists the decision and turns and
//!    forwards the final prompt to the assistant.
//! 4. [`SessionPipeline::finalize`] appends a summary and applies exit criteria.
//!
//! Storage failures never end a session: they become notices, the
//! conversation continues in memory, and [`SessionPipeline::take_notices`]
//! hands them to the caller.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use session_state::{
    ArtifactStore, AugmentationRecord, Gap, SessionId, SessionMode, StorageError, Summary, Turn,
};

use crate::assistant::{Assistant, AssistantReply};
use crate::augment::{resolve, AugmentationResult, Augmenter, HumanChoice};
use crate::error::{IntelError, Result};
use crate::exit_criteria::{ExitCriteria, Transition};
use crate::obs;
use crate::recap::{load_recap, pick_source_session, Recap};
use crate::summarizer::{reconcile_gaps, Summarizer};

/// Commands that end an interactive session.
pub const EXIT_COMMANDS: [&str; 6] = [":exit", ":quit", ":end", "exit", "quit", "end"];

pub fn is_exit_command(input: &str) -> bool {
    let folded = input.trim().to_lowercase();
    EXIT_COMMANDS.contains(&folded.as_str())
}

const DEFAULT_RECAP_USER_TURNS: usize = 5;

const NO_RECAP_NOTICE: &str =
    "No prior session artifacts found; learn mode will use fresh context.";

/// External collaborators and the artifact store for a session.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ArtifactStore>,
    pub assistant: Arc<dyn Assistant>,
    pub summarizer: Arc<dyn Summarizer>,
    pub augmenter: Arc<Augmenter>,
}

#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Resume this session; a fresh id is generated when `None`.
    pub session_id: Option<SessionId>,
    /// Force a mode (the external toggle); `None` keeps the persisted mode.
    pub mode: Option<SessionMode>,
    /// Session to recap in learn mode; newest other session when `None`.
    pub source_session: Option<SessionId>,
    pub recap_user_turns: usize,
    pub exit_criteria: ExitCriteria,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            mode: None,
            source_session: None,
            recap_user_turns: DEFAULT_RECAP_USER_TURNS,
            exit_criteria: ExitCriteria::default(),
        }
    }
}

/// What the human sees before a question is forwarded.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPreview {
    pub original: String,
    pub augmentation: AugmentationResult,
    /// Learn mode asks the human to accept, edit or reject.
    pub requires_confirmation: bool,
    /// Set when this input ended learn mode.
    pub transition: Option<Transition>,
}

/// Result of one forwarded question.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub user_turn: u64,
    pub final_prompt: String,
    pub record: Option<AugmentationRecord>,
    pub reply: AssistantReply,
    /// False when the assistant failed and `reply.text` is an error marker.
    pub answered: bool,
}

/// Outcome of closing a session.
#[derive(Debug, Clone)]
pub struct CloseReport {
    pub summary: Option<Summary>,
    pub transition: Option<Transition>,
    pub mode: SessionMode,
}

pub struct SessionPipeline {
    session_id: SessionId,
    mode: SessionMode,
    deps: Collaborators,
    criteria: ExitCriteria,
    recap: Option<Recap>,
    next_turn: u64,
    transcript: Vec<Turn>,
    assistant_handle: Option<String>,
    notices: Vec<String>,
}

impl SessionPipeline {
    /// Open (or resume) a session.
    pub async fn start(options: StartOptions, deps: Collaborators) -> Self {
        let session_id = options.session_id.unwrap_or_else(SessionId::generate);
        let mut notices = Vec::new();
        let store = deps.store.clone();

        let persisted = store.mode(&session_id).await.unwrap_or_else(|err| {
            degrade(&session_id, "mode.read", &err, &mut notices);
            SessionMode::default()
        });
        let mode = options.mode.unwrap_or(persisted);
        if mode != persisted {
            match store.set_mode(&session_id, mode).await {
                Ok(()) => obs::emit_mode_transition(
                    session_id.as_str(),
                    persisted.as_str(),
                    mode.as_str(),
                    "toggle",
                ),
                Err(err) => degrade(&session_id, "mode.write", &err, &mut notices),
            }
        }

        let next_turn = match store.last_index(&session_id).await {
            Ok(last) => last + 1,
            Err(err) => {
                degrade(&session_id, "turn_log.last_index", &err, &mut notices);
                1
            }
        };

        let assistant_handle = store
            .assistant_handle(&session_id)
            .await
            .unwrap_or_else(|err| {
                degrade(&session_id, "assistant_handle.read", &err, &mut notices);
                None
            });

        let recap = if mode == SessionMode::Learn {
            Self::load_source_recap(
                store.as_ref(),
                &session_id,
                options.source_session.as_ref(),
                options.recap_user_turns,
                &mut notices,
            )
            .await
        } else {
            None
        };

        obs::emit_session_started(
            session_id.as_str(),
            mode.as_str(),
            recap.as_ref().map(|r| r.session_id.as_str()),
        );

        Self {
            session_id,
            mode,
            deps,
            criteria: options.exit_criteria,
            recap,
            next_turn,
            transcript: Vec::new(),
            assistant_handle,
            notices,
        }
    }

    async fn load_source_recap(
        store: &dyn ArtifactStore,
        session_id: &SessionId,
        requested: Option<&SessionId>,
        recap_user_turns: usize,
        notices: &mut Vec<String>,
    ) -> Option<Recap> {
        let source = match pick_source_session(store, requested, Some(session_id)).await
        {
            Ok(Some(source)) => source,
            Ok(None) => {
                notices.push(NO_RECAP_NOTICE.to_string());
                return None;
            }
            Err(err) => {
                degrade(session_id, "catalog.list", &err, notices);
                return None;
            }
        };

        match load_recap(store, &source, recap_user_turns).await {
            Ok(recap) => {
                notices.extend(recap.notices.iter().cloned());
                Some(recap)
            }
            Err(err) if err.is_missing() => {
                notices.push(NO_RECAP_NOTICE.to_string());
                None
            }
            Err(err) => {
                degrade(session_id, "recap.load", &err, notices);
                None
            }
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn recap(&self) -> Option<&Recap> {
        self.recap.as_ref()
    }

    /// Turns recorded by this process, including ones that failed to persist.
    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Drain notices accumulated since the last call.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    /// Instruction preamble for the assistant.
    pub fn compose_instructions(&self) -> String {
        let mut lines = vec![
            "You are a collaborative coding assistant helping developers learn new skills.".to_string(),
            "Provide concise, actionable help while calling out knowledge gaps to revisit.".to_string(),
        ];
        if self.mode == SessionMode::Learn {
            lines.push(
                "Lean on previous insights to accelerate progress; remind the developer of \
                 strategies that worked last time."
                    .to_string(),
            );
            if let Some(recap) = &self.recap {
                lines.push(recap.render_context().trim_end().to_string());
            }
        }
        lines.join("\n\n")
    }

    /// Build the preview for `input`.
    ///
    /// In learn mode a completion token ends learn mode instead of being
    /// augmented; otherwise the augmenter suggests a rewrite.
    pub async fn prepare_turn(&mut self, input: &str) -> TurnPreview {
        if self.mode == SessionMode::Learn {
            let transition = self.criteria.evaluate(self.mode, None, Some(input));
            if transition.changed() {
                self.apply_transition(transition).await;
                return TurnPreview {
                    original: input.to_string(),
                    augmentation: passthrough(input),
                    requires_confirmation: false,
                    transition: Some(transition),
                };
            }

            let augmentation = self.deps.augmenter.augment(input, self.recap.as_ref()).await;
            if let Some(notice) = &augmentation.notice {
                self.notices.push(notice.clone());
            }
            return TurnPreview {
                original: input.to_string(),
                augmentation,
                requires_confirmation: true,
                transition: None,
            };
        }

        TurnPreview {
            original: input.to_string(),
            augmentation: passthrough(input),
            requires_confirmation: false,
            transition: None,
        }
    }

    /// Persist the human decision and the user turn, forward the final
    /// prompt, then record the reply.
    pub async fn submit_turn(&mut self, preview: &TurnPreview, choice: HumanChoice) -> TurnOutcome {
        let user_turn = self.next_turn;

        let (final_prompt, record) = if preview.requires_confirmation {
            let record = resolve(user_turn, &preview.original, &preview.augmentation, choice);
            match self.deps.store.record(&self.session_id, &record).await {
                Ok(()) => obs::emit_augmentation_recorded(
                    self.session_id.as_str(),
                    user_turn,
                    &record.decision.to_string(),
                ),
                Err(err) => self.degrade("augmentation.record", &err),
            }
            (record.final_text.clone(), Some(record))
        } else {
            (preview.original.clone(), None)
        };

        self.record_user_turn(&final_prompt).await;

        let instructions = self.compose_instructions();
        let (reply, answered) = match self
            .deps
            .assistant
            .respond(
                &self.session_id,
                &instructions,
                &final_prompt,
                self.assistant_handle.as_deref(),
            )
            .await
        {
            Ok(reply) => (reply, true),
            Err(err) => {
                obs::emit_collaborator_failed(self.deps.assistant.name(), &err);
                self.notices.push(format!("Assistant call failed: {err}"));
                let reply = AssistantReply {
                    text: format!("[Assistant error: {err}]"),
                    ..AssistantReply::default()
                };
                (reply, false)
            }
        };

        if let Some(handle) = reply.handle.as_deref() {
            self.remember_handle(handle).await;
        }
        self.record_agent_turn(&reply.transcript()).await;

        TurnOutcome {
            user_turn,
            final_prompt,
            record,
            reply,
            answered,
        }
    }

    /// Log a user turn. Returns its index.
    pub async fn record_user_turn(&mut self, content: &str) -> u64 {
        let index = self.next_turn;
        self.log_turn(Turn::user(index, content)).await;
        index
    }

    /// Log an agent reply. Returns its index.
    pub async fn record_agent_turn(&mut self, content: &str) -> u64 {
        let index = self.next_turn;
        self.log_turn(Turn::agent(index, content)).await;
        index
    }

    /// Log a tool invocation made by the assistant. Returns its index.
    pub async fn record_tool_turn(
        &mut self,
        tool: &str,
        args: Value,
        content: &str,
        result_snippet: Option<String>,
    ) -> u64 {
        let index = self.next_turn;
        self.log_turn(Turn::tool(index, tool, args, content, result_snippet))
            .await;
        index
    }

    async fn log_turn(&mut self, turn: Turn) {
        self.next_turn = turn.turn + 1;
        let store = self.deps.store.clone();

        match store.append(&self.session_id, &turn).await {
            Ok(()) => obs::emit_turn_logged(self.session_id.as_str(), turn.turn, turn.role.label()),
            Err(err) => self.degrade("turn_log.append", &err),
        }
        match store.append_turn_note(&self.session_id, &turn).await {
            Ok(true) => {}
            Ok(false) => obs::emit_note_skipped(self.session_id.as_str(), turn.turn),
            Err(err) => self.degrade("journal.append_turn_note", &err),
        }
        self.transcript.push(turn);
    }

    async fn remember_handle(&mut self, handle: &str) {
        if self.assistant_handle.as_deref() == Some(handle) {
            return;
        }
        self.assistant_handle = Some(handle.to_string());
        let store = self.deps.store.clone();
        if let Err(err) = store.save_assistant_handle(&self.session_id, handle).await {
            self.degrade("assistant_handle.write", &err);
        }
    }

    /// Summarize the session and apply exit criteria.
    pub async fn finalize(&mut self) -> CloseReport {
        let store = self.deps.store.clone();
        let turns = match store.read_all(&self.session_id).await {
            Ok(sequence) => sequence.to_vec().unwrap_or_else(|_| self.transcript.clone()),
            Err(_) => self.transcript.clone(),
        };

        let carried: Vec<Gap> = match (&self.recap, self.mode) {
            (Some(recap), SessionMode::Learn) => recap.open_gaps().into_iter().cloned().collect(),
            _ => Vec::new(),
        };

        let summary = match summarize_turns(
            store.as_ref(),
            self.deps.summarizer.as_ref(),
            &self.session_id,
            &turns,
            &carried,
        )
        .await
        {
            Ok(summary) => Some(summary),
            Err(err) => {
                self.notices.push(format!("Skipped summary ({err})."));
                None
            }
        };

        // Without a fresh summary the stored one still decides learn mode.
        let latest = match &summary {
            Some(summary) => Some(summary.clone()),
            None => match store.latest_summary(&self.session_id).await {
                Ok(latest) => latest,
                Err(err) if err.is_missing() => None,
                Err(err) => {
                    self.degrade("journal.latest_summary", &err);
                    None
                }
            },
        };

        let transition = self.criteria.evaluate(self.mode, latest.as_ref(), None);
        let transition = if transition.changed() {
            self.apply_transition(transition).await;
            Some(transition)
        } else {
            None
        };

        CloseReport {
            summary,
            transition,
            mode: self.mode,
        }
    }

    async fn apply_transition(&mut self, transition: Transition) {
        let from = self.mode;
        self.mode = transition.next;
        let reason = transition
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "toggle".to_string());
        let store = self.deps.store.clone();
        match store.set_mode(&self.session_id, transition.next).await {
            Ok(()) => obs::emit_mode_transition(
                self.session_id.as_str(),
                from.as_str(),
                transition.next.as_str(),
                &reason,
            ),
            Err(err) => self.degrade("mode.write", &err),
        }
        self.notices.push(format!(
            "Leaving {from} mode ({reason}); next run starts in {}.",
            transition.next
        ));
    }

    fn degrade(&mut self, operation: &str, err: &StorageError) {
        degrade(&self.session_id, operation, err, &mut self.notices);
    }
}

fn passthrough(input: &str) -> AugmentationResult {
    AugmentationResult {
        suggestion: input.to_string(),
        justification: Vec::new(),
        diff: String::new(),
        raw_text: String::new(),
        notice: None,
    }
}

fn degrade(session_id: &SessionId, operation: &str, err: &StorageError, notices: &mut Vec<String>) {
    obs::emit_storage_degraded(session_id.as_str(), operation, err);
    notices.push(format!("Storage problem during {operation}: {err}. Continuing in memory."));
}

/// Summarize `turns`, reconcile gaps against earlier summaries and append
/// the result to the journal.
///
/// `carried_gaps` are open gaps the session set out to close (the recap's
/// gaps in learn mode). They are shown to the summarizer next to the gaps of
/// this session's latest summary, and any the reply leaves out stay open.
pub async fn summarize_turns(
    store: &dyn ArtifactStore,
    summarizer: &dyn Summarizer,
    session_id: &SessionId,
    turns: &[Turn],
    carried_gaps: &[Gap],
) -> Result<Summary> {
    let earlier = match store.summaries(session_id).await {
        Ok(earlier) => earlier,
        Err(err) if err.is_missing() => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    let mut previous_gaps = earlier.last().map(|s| s.gaps.clone()).unwrap_or_default();
    let mut known: HashSet<String> = previous_gaps.iter().map(Gap::key).collect();
    for gap in carried_gaps {
        if known.insert(gap.key()) {
            previous_gaps.push(gap.clone());
        }
    }

    let summary = match summarizer.summarize(turns, &previous_gaps).await {
        Ok(summary) => reconcile_gaps(&earlier, carry_open_gaps(summary, carried_gaps)),
        Err(err) => {
            obs::emit_summary_skipped(session_id.as_str(), &err);
            return Err(IntelError::Collaborator(err));
        }
    };

    store.append_summary(session_id, &summary).await?;
    obs::emit_summary_appended(
        session_id.as_str(),
        summary.gaps.len(),
        summary.unresolved_gaps().count(),
    );
    Ok(summary)
}

fn carry_open_gaps(mut summary: Summary, carried_gaps: &[Gap]) -> Summary {
    let mut mentioned: HashSet<String> = summary.gaps.iter().map(Gap::key).collect();
    for gap in carried_gaps {
        if !gap.resolved && mentioned.insert(gap.key()) {
            summary.gaps.push(gap.clone());
        }
    }
    summary
}

/// On-demand summary of a stored session.
pub async fn summarize_session(
    store: &dyn ArtifactStore,
    summarizer: &dyn Summarizer,
    session_id: &SessionId,
) -> Result<Summary> {
    let turns = store.read_all(session_id).await?.to_vec()?;
    summarize_turns(store, summarizer, session_id, &turns, &[]).await
}

/// The external learn-mode toggle.
pub async fn set_session_mode(
    store: &dyn ArtifactStore,
    session_id: &SessionId,
    mode: SessionMode,
) -> Result<SessionMode> {
    let previous = store.mode(session_id).await?;
    if previous != mode {
        store.set_mode(session_id, mode).await?;
        obs::emit_mode_transition(session_id.as_str(), previous.as_str(), mode.as_str(), "toggle");
    }
    Ok(previous)
}

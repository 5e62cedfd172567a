//! Recap loading from a prior session.
//!
//! A recap prefers the newest structured summary, then a summary section
//! parsed out of a legacy `learnings.md`, then one-line synopses of the last
//! few user turns. Every degraded step leaves a notice for the human.

use chrono::Utc;
use session_state::markdown::parse_latest_summary;
use session_state::{ArtifactStore, Gap, SessionId, StorageError, StorageResult, Summary};
use tracing::warn;

use crate::obs;

/// Maximum characters of a user turn kept in a synopsis line.
pub const SYNOPSIS_CHARS: usize = 160;

/// Where the recap content came from.
#[derive(Debug, Clone, PartialEq)]
pub enum RecapSource {
    Summary(Summary),
    /// `Turn N: <synopsis>` lines, oldest first.
    RawTurns(Vec<String>),
}

/// Compact context reconstructed from a prior session. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Recap {
    pub session_id: SessionId,
    pub source: RecapSource,
    pub notices: Vec<String>,
}

impl Recap {
    pub fn summary(&self) -> Option<&Summary> {
        match &self.source {
            RecapSource::Summary(summary) => Some(summary),
            RecapSource::RawTurns(_) => None,
        }
    }

    /// Gaps still open in the recap's summary.
    pub fn open_gaps(&self) -> Vec<&Gap> {
        self.summary()
            .map(|s| s.unresolved_gaps().collect())
            .unwrap_or_default()
    }

    /// Plain-text block for prompts and terminal display.
    pub fn render_context(&self) -> String {
        match &self.source {
            RecapSource::Summary(summary) => {
                let mut out = format!("Summary of session {}:\n", self.session_id);
                push_section(&mut out, "Timeline highlights", &summary.highlights);
                let gaps: Vec<String> = summary
                    .gaps
                    .iter()
                    .map(|g| {
                        let mark = if g.resolved { "resolved" } else { "open" };
                        format!("{} ({mark})", g.description)
                    })
                    .collect();
                push_section(&mut out, "Knowledge gaps", &gaps);
                push_section(&mut out, "Suggested next reps", &summary.next_steps);
                out
            }
            RecapSource::RawTurns(lines) if lines.is_empty() => {
                format!("Session {} has no recorded user turns.\n", self.session_id)
            }
            RecapSource::RawTurns(lines) => {
                let mut out = format!("Recent user questions from session {}:\n", self.session_id);
                for line in lines {
                    out.push_str(&format!("- {line}\n"));
                }
                out
            }
        }
    }
}

fn push_section(out: &mut String, title: &str, items: &[String]) {
    out.push_str(&format!("{title}:\n"));
    if items.is_empty() {
        out.push_str("- None\n");
    }
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

/// Build a recap for `session_id`.
///
/// Fails with `NoArtifacts` only when neither a journal nor a turn log exists.
pub async fn load_recap(
    store: &dyn ArtifactStore,
    session_id: &SessionId,
    recap_user_turns: usize,
) -> StorageResult<Recap> {
    let mut notices = Vec::new();
    let mut summaries_usable = true;

    match store.latest_summary(session_id).await {
        Ok(Some(summary)) => {
            return Ok(finish(session_id, RecapSource::Summary(summary), notices));
        }
        Ok(None) => {}
        Err(err) if err.is_missing() => {}
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "summaries unreadable");
            notices.push(format!(
                "Could not read summaries for {session_id} ({err}); using recent user turns instead."
            ));
            summaries_usable = false;
        }
    }

    let journal_exists = match store.read(session_id).await {
        Ok(markdown) => {
            if summaries_usable {
                if let Some(summary) = parse_latest_summary(&markdown, Utc::now()) {
                    return Ok(finish(session_id, RecapSource::Summary(summary), notices));
                }
            }
            true
        }
        Err(err) if err.is_missing() => false,
        Err(err) => {
            notices.push(format!("Could not read learnings for {session_id} ({err})."));
            true
        }
    };

    let turns = match store.read_all(session_id).await {
        Ok(sequence) => Some(sequence.to_vec()?),
        Err(err) if err.is_missing() => None,
        Err(err) => return Err(err),
    };

    let Some(turns) = turns else {
        if !journal_exists {
            return Err(StorageError::NoArtifacts {
                session_id: session_id.to_string(),
            });
        }
        notices.push(format!("Session {session_id} has no turn log."));
        return Ok(finish(session_id, RecapSource::RawTurns(Vec::new()), notices));
    };

    let users: Vec<_> = turns.iter().filter(|t| t.is_user()).collect();
    let skip = users.len().saturating_sub(recap_user_turns);
    let lines = users[skip..]
        .iter()
        .map(|t| format!("Turn {}: {}", t.turn, t.synopsis(SYNOPSIS_CHARS)))
        .collect();
    Ok(finish(session_id, RecapSource::RawTurns(lines), notices))
}

fn finish(session_id: &SessionId, source: RecapSource, notices: Vec<String>) -> Recap {
    obs::emit_recap_loaded(
        session_id.as_str(),
        matches!(source, RecapSource::Summary(_)),
        notices.len(),
    );
    Recap {
        session_id: session_id.clone(),
        source,
        notices,
    }
}

/// Resolve which prior session to recap.
///
/// An explicit `requested` id must exist. Otherwise the newest session other
/// than `exclude` is used.
pub async fn pick_source_session(
    store: &dyn ArtifactStore,
    requested: Option<&SessionId>,
    exclude: Option<&SessionId>,
) -> StorageResult<Option<SessionId>> {
    if let Some(id) = requested {
        return Ok(store.exists(id).await?.then(|| id.clone()));
    }
    Ok(store
        .list_sessions()
        .await?
        .into_iter()
        .map(|listing| listing.session_id)
        .find(|id| Some(id) != exclude))
}

//! Structured observability hooks for session lifecycle events.
//!
//! This module provides:
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard
//! - Emission functions with a stable `event` field for each lifecycle step
//!
//! Events are emitted at `info!` (degradations at `warn!`); filter with
//! `RUST_LOG` and switch to JSON with `--json`.

use tracing::{info, warn};

/// RAII guard that enters a session-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = SessionSpan::enter("20250101-120000-abcdef");
/// // every event below carries session_id
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        let span = tracing::info_span!("session_intel.session", session_id = %session_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: session started in the given mode.
pub fn emit_session_started(session_id: &str, mode: &str, source_session: Option<&str>) {
    info!(
        event = "session.started",
        session_id = %session_id,
        mode = %mode,
        source_session = source_session.unwrap_or("-"),
    );
}

/// Emit event: a turn reached the turn log.
pub fn emit_turn_logged(session_id: &str, turn: u64, role: &str) {
    info!(event = "turn.logged", session_id = %session_id, turn = turn, role = %role);
}

/// Emit event: the journal already had a bullet for this turn.
pub fn emit_note_skipped(session_id: &str, turn: u64) {
    info!(event = "journal.note_skipped", session_id = %session_id, turn = turn);
}

/// Emit event: an augmentation decision was persisted.
pub fn emit_augmentation_recorded(session_id: &str, turn: u64, decision: &str) {
    info!(
        event = "augmentation.recorded",
        session_id = %session_id,
        turn = turn,
        decision = %decision,
    );
}

/// Emit event: a summary was appended to the journal.
pub fn emit_summary_appended(session_id: &str, gaps: usize, unresolved: usize) {
    info!(
        event = "summary.appended",
        session_id = %session_id,
        gaps = gaps,
        unresolved = unresolved,
    );
}

/// Emit event: the session closed without a new summary.
pub fn emit_summary_skipped(session_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "summary.skipped", session_id = %session_id, reason = %reason);
}

/// Emit event: the session mode changed.
pub fn emit_mode_transition(session_id: &str, from: &str, to: &str, reason: &str) {
    info!(
        event = "mode.transition",
        session_id = %session_id,
        from = %from,
        to = %to,
        reason = %reason,
    );
}

/// Emit event: an external collaborator call failed (warning level).
pub fn emit_collaborator_failed(collaborator: &str, error: &dyn std::fmt::Display) {
    warn!(event = "collaborator.failed", collaborator = %collaborator, error = %error);
}

/// Emit event: a recap was assembled from a prior session.
pub fn emit_recap_loaded(source_session: &str, from_summary: bool, notices: usize) {
    info!(
        event = "recap.loaded",
        source_session = %source_session,
        from_summary = from_summary,
        notices = notices,
    );
}

/// Emit event: a storage write failed and the session continues in memory.
pub fn emit_storage_degraded(session_id: &str, operation: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "storage.degraded",
        session_id = %session_id,
        operation = %operation,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_span_create() {
        let _span = SessionSpan::enter("test-session-id");
        emit_turn_logged("test-session-id", 1, "user");
    }
}

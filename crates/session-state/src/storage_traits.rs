//! Storage trait definitions for Session Intel
//!
//! These traits define the persistence seams:
//! - `TurnLog`: append-only raw turn records
//! - `LearningsJournal`: human-readable journal with structured summaries
//! - `AugmentationLog`: learn-mode rewrite decisions
//! - `SessionMeta`: mode flag and the assistant's resume handle
//! - `SessionCatalog`: enumerating stored sessions
//! - `SessionMemory`: dialogue history injected into the assistant
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{
    AugmentationRecord, MemoryItem, SessionId, SessionListing, SessionMode, Summary, Turn,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// TurnSequence: lazy, restartable view over a session's turns
// ---------------------------------------------------------------------------

/// Something that can (re)open an ordered stream of turns.
pub trait TurnSource: Send + Sync + fmt::Debug {
    /// Open a fresh iterator positioned at the first turn.
    fn open(&self) -> StorageResult<Box<dyn Iterator<Item = Turn> + Send>>;
}

#[derive(Debug)]
struct VecSource(Arc<Vec<Turn>>);

impl TurnSource for VecSource {
    fn open(&self) -> StorageResult<Box<dyn Iterator<Item = Turn> + Send>> {
        let turns = Arc::clone(&self.0);
        Ok(Box::new((0..turns.len()).map(move |i| turns[i].clone())))
    }
}

/// Turns of one session in index order.
///
/// Nothing is read until [`TurnSequence::iter`] is called, and each call
/// starts over from the first turn.
#[derive(Debug, Clone)]
pub struct TurnSequence {
    source: Arc<dyn TurnSource>,
}

impl TurnSequence {
    pub fn from_source(source: impl TurnSource + 'static) -> Self {
        TurnSequence {
            source: Arc::new(source),
        }
    }

    pub fn from_vec(turns: Vec<Turn>) -> Self {
        Self::from_source(VecSource(Arc::new(turns)))
    }

    /// Start a new pass over the turns.
    pub fn iter(&self) -> StorageResult<Box<dyn Iterator<Item = Turn> + Send>> {
        self.source.open()
    }

    /// Read every turn into memory.
    pub fn to_vec(&self) -> StorageResult<Vec<Turn>> {
        Ok(self.iter()?.collect())
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Append-only per-session turn log.
///
/// Guarantees:
/// - Indices are strictly increasing and gap-free starting at 1; an append
///   whose index is not `last + 1` fails with `OutOfSequence`.
/// - Records are never updated or deleted.
/// - System turns are rejected with `InvalidTurn`.
#[async_trait]
pub trait TurnLog: Send + Sync {
    /// Persist one turn. Fails with `StorageUnavailable` if the destination
    /// cannot be written.
    async fn append(&self, session_id: &SessionId, turn: &Turn) -> StorageResult<()>;

    /// All turns in index order. `SessionNotFound` if nothing was recorded.
    async fn read_all(&self, session_id: &SessionId) -> StorageResult<TurnSequence>;

    /// Highest recorded index, 0 when the session has no turns.
    async fn last_index(&self, session_id: &SessionId) -> StorageResult<u64>;
}

/// Human-readable learnings journal backed by structured notes and summaries.
///
/// Guarantees:
/// - At most one bullet per turn index, even under concurrent appends.
/// - Summaries always render after every turn bullet, in append order.
/// - A summary that marks a previously resolved gap as open is refused
///   with `GapReverted`.
#[async_trait]
pub trait LearningsJournal: Send + Sync {
    /// Add the bullet for `turn`. Returns `false` if one already existed.
    async fn append_turn_note(&self, session_id: &SessionId, turn: &Turn) -> StorageResult<bool>;

    /// Append a summary section.
    async fn append_summary(&self, session_id: &SessionId, summary: &Summary)
        -> StorageResult<()>;

    /// Full journal document. `SessionNotFound` if no journal exists.
    async fn read(&self, session_id: &SessionId) -> StorageResult<String>;

    /// Structured summaries in chronological order (empty when none).
    async fn summaries(&self, session_id: &SessionId) -> StorageResult<Vec<Summary>>;

    /// Most recent structured summary, if any.
    async fn latest_summary(&self, session_id: &SessionId) -> StorageResult<Option<Summary>> {
        Ok(self.summaries(session_id).await?.pop())
    }
}

/// Learn-mode augmentation decisions, one per turn index.
#[async_trait]
pub trait AugmentationLog: Send + Sync {
    /// Persist a record. `DuplicateAugmentation` if the turn already has one.
    async fn record(&self, session_id: &SessionId, record: &AugmentationRecord)
        -> StorageResult<()>;

    /// All records ordered by turn index (empty when none).
    async fn list(&self, session_id: &SessionId) -> StorageResult<Vec<AugmentationRecord>>;
}

/// Small per-session flags.
#[async_trait]
pub trait SessionMeta: Send + Sync {
    /// Persisted mode, `GapCapture` when none was stored.
    async fn mode(&self, session_id: &SessionId) -> StorageResult<SessionMode>;

    async fn set_mode(&self, session_id: &SessionId, mode: SessionMode) -> StorageResult<()>;

    /// The assistant collaborator's own session handle, for external resume.
    async fn assistant_handle(&self, session_id: &SessionId) -> StorageResult<Option<String>>;

    async fn save_assistant_handle(&self, session_id: &SessionId, handle: &str)
        -> StorageResult<()>;
}

/// Enumerates stored sessions.
#[async_trait]
pub trait SessionCatalog: Send + Sync {
    /// Sessions newest first by last update.
    async fn list_sessions(&self) -> StorageResult<Vec<SessionListing>>;

    /// Whether any artifact exists for the session.
    async fn exists(&self, session_id: &SessionId) -> StorageResult<bool>;
}

/// Every artifact capability of a session store.
pub trait ArtifactStore:
    TurnLog + LearningsJournal + AugmentationLog + SessionMeta + SessionCatalog
{
}

impl<T> ArtifactStore for T where
    T: TurnLog + LearningsJournal + AugmentationLog + SessionMeta + SessionCatalog
{
}

/// Dialogue history scoped by session id.
///
/// Guarantees:
/// - `get_items` returns items in insertion order.
/// - Sessions never observe each other's items.
#[async_trait]
pub trait SessionMemory: Send + Sync {
    async fn add_items(&self, session_id: &SessionId, items: &[MemoryItem]) -> StorageResult<()>;

    /// The last `limit` items (all when `None`), oldest first.
    async fn get_items(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryItem>>;

    /// Remove and return the newest item.
    async fn pop_item(&self, session_id: &SessionId) -> StorageResult<Option<MemoryItem>>;

    async fn clear_session(&self, session_id: &SessionId) -> StorageResult<()>;
}

/// Check the sequencing rule shared by every `TurnLog` backend.
pub fn check_turn_sequence(session_id: &SessionId, turn: &Turn, last: u64) -> StorageResult<()> {
    if turn.is_system() {
        return Err(StorageError::InvalidTurn(
            "system turns are not part of the turn log".to_string(),
        ));
    }
    let expected = last + 1;
    if turn.turn != expected {
        return Err(StorageError::OutOfSequence {
            session_id: session_id.to_string(),
            turn: turn.turn,
            expected,
        });
    }
    Ok(())
}

/// Refuse a summary that reopens a gap an earlier summary resolved.
pub fn check_gap_monotonic(
    session_id: &SessionId,
    earlier: &[Summary],
    next: &Summary,
) -> StorageResult<()> {
    let resolved: std::collections::HashSet<String> = earlier
        .iter()
        .flat_map(|s| s.gaps.iter())
        .filter(|g| g.resolved)
        .map(|g| g.key())
        .collect();

    match next
        .gaps
        .iter()
        .find(|g| !g.resolved && resolved.contains(&g.key()))
    {
        Some(gap) => Err(StorageError::GapReverted {
            session_id: session_id.to_string(),
            gap: gap.description.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Gap;

    #[test]
    fn sequence_is_restartable() {
        let seq = TurnSequence::from_vec(vec![Turn::user(1, "a"), Turn::agent(2, "b")]);
        let first: Vec<u64> = seq.iter().unwrap().map(|t| t.turn).collect();
        let second: Vec<u64> = seq.iter().unwrap().map(|t| t.turn).collect();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(first, second);
    }

    #[test]
    fn sequence_check_rejects_gaps_and_system() {
        let id = SessionId::parse("s").unwrap();
        assert!(check_turn_sequence(&id, &Turn::user(1, "x"), 0).is_ok());
        assert!(matches!(
            check_turn_sequence(&id, &Turn::user(3, "x"), 1),
            Err(StorageError::OutOfSequence { expected: 2, .. })
        ));
        assert!(matches!(
            check_turn_sequence(&id, &Turn::system("preface"), 0),
            Err(StorageError::InvalidTurn(_))
        ));
    }

    #[test]
    fn gap_reopen_is_refused() {
        let id = SessionId::parse("s").unwrap();
        let earlier = vec![Summary::new(vec![], vec![Gap::resolved("Hooks order")], vec![])];
        let reopen = Summary::new(vec![], vec![Gap::open("hooks order.")], vec![]);
        assert!(matches!(
            check_gap_monotonic(&id, &earlier, &reopen),
            Err(StorageError::GapReverted { .. })
        ));
        let fine = Summary::new(vec![], vec![Gap::open("something else")], vec![]);
        assert!(check_gap_monotonic(&id, &earlier, &fine).is_ok());
    }
}

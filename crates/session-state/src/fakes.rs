//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryArtifactStore` and `MemorySessionMemory` that satisfy the
//! trait contracts without touching the filesystem or a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::markdown;
use crate::schema::{
    AugmentationRecord, JournalNote, MemoryItem, SessionId, SessionListing, SessionMode, Summary,
    Turn,
};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SessionState {
    turns: Vec<Turn>,
    notes: BTreeMap<u64, JournalNote>,
    summaries: Vec<Summary>,
    augmentations: Vec<AugmentationRecord>,
    mode: Option<SessionMode>,
    assistant_handle: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn has_journal(&self) -> bool {
        !self.notes.is_empty() || !self.summaries.is_empty()
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// In-memory artifact store backed by a `HashMap<SessionId, SessionState>`.
///
/// `fail_writes` makes every mutating call return `StorageUnavailable`,
/// for exercising degraded paths.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    sessions: Mutex<HashMap<SessionId, SessionState>>,
    fail_writes: Mutex<bool>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    fn check_writable(&self, session_id: &SessionId) -> StorageResult<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(StorageError::unavailable(
                format!("memory://{session_id}"),
                "writes disabled",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TurnLog for MemoryArtifactStore {
    async fn append(&self, session_id: &SessionId, turn: &Turn) -> StorageResult<()> {
        self.check_writable(session_id)?;
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_id.clone()).or_default();
        let last = state.turns.last().map(|t| t.turn).unwrap_or(0);
        check_turn_sequence(session_id, turn, last)?;
        state.turns.push(turn.clone());
        state.touch();
        Ok(())
    }

    async fn read_all(&self, session_id: &SessionId) -> StorageResult<TurnSequence> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(session_id) {
            Some(state) if !state.turns.is_empty() => {
                Ok(TurnSequence::from_vec(state.turns.clone()))
            }
            _ => Err(StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            }),
        }
    }

    async fn last_index(&self, session_id: &SessionId) -> StorageResult<u64> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .and_then(|s| s.turns.last())
            .map(|t| t.turn)
            .unwrap_or(0))
    }
}

#[async_trait]
impl LearningsJournal for MemoryArtifactStore {
    async fn append_turn_note(&self, session_id: &SessionId, turn: &Turn) -> StorageResult<bool> {
        self.check_writable(session_id)?;
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_id.clone()).or_default();
        if state.notes.contains_key(&turn.turn) {
            return Ok(false);
        }
        state.notes.insert(turn.turn, JournalNote::from_turn(turn));
        state.touch();
        Ok(true)
    }

    async fn append_summary(
        &self,
        session_id: &SessionId,
        summary: &Summary,
    ) -> StorageResult<()> {
        self.check_writable(session_id)?;
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_id.clone()).or_default();
        check_gap_monotonic(session_id, &state.summaries, summary)?;
        state.summaries.push(summary.clone());
        state.touch();
        Ok(())
    }

    async fn read(&self, session_id: &SessionId) -> StorageResult<String> {
        let sessions = self.sessions.lock().unwrap();
        let state = sessions
            .get(session_id)
            .filter(|s| s.has_journal())
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let notes: Vec<JournalNote> = state.notes.values().cloned().collect();
        let started_at = notes
            .iter()
            .map(|n| n.recorded_at)
            .chain(state.summaries.iter().map(|s| s.created_at))
            .min()
            .unwrap_or_else(Utc::now);
        Ok(markdown::render_learnings(
            session_id,
            started_at,
            &notes,
            &state.summaries,
        ))
    }

    async fn summaries(&self, session_id: &SessionId) -> StorageResult<Vec<Summary>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .map(|s| s.summaries.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl AugmentationLog for MemoryArtifactStore {
    async fn record(
        &self,
        session_id: &SessionId,
        record: &AugmentationRecord,
    ) -> StorageResult<()> {
        self.check_writable(session_id)?;
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_id.clone()).or_default();
        if state.augmentations.iter().any(|r| r.turn == record.turn) {
            return Err(StorageError::DuplicateAugmentation {
                session_id: session_id.to_string(),
                turn: record.turn,
            });
        }
        state.augmentations.push(record.clone());
        state.augmentations.sort_by_key(|r| r.turn);
        state.touch();
        Ok(())
    }

    async fn list(&self, session_id: &SessionId) -> StorageResult<Vec<AugmentationRecord>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .map(|s| s.augmentations.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SessionMeta for MemoryArtifactStore {
    async fn mode(&self, session_id: &SessionId) -> StorageResult<SessionMode> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .and_then(|s| s.mode)
            .unwrap_or_default())
    }

    async fn set_mode(&self, session_id: &SessionId, mode: SessionMode) -> StorageResult<()> {
        self.check_writable(session_id)?;
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_id.clone()).or_default();
        state.mode = Some(mode);
        state.touch();
        Ok(())
    }

    async fn assistant_handle(&self, session_id: &SessionId) -> StorageResult<Option<String>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .and_then(|s| s.assistant_handle.clone()))
    }

    async fn save_assistant_handle(
        &self,
        session_id: &SessionId,
        handle: &str,
    ) -> StorageResult<()> {
        self.check_writable(session_id)?;
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_id.clone()).or_default();
        state.assistant_handle = Some(handle.trim().to_string());
        Ok(())
    }
}

#[async_trait]
impl SessionCatalog for MemoryArtifactStore {
    async fn list_sessions(&self) -> StorageResult<Vec<SessionListing>> {
        let sessions = self.sessions.lock().unwrap();
        let mut listings: Vec<SessionListing> = sessions
            .iter()
            .filter_map(|(id, state)| {
                Some(SessionListing {
                    session_id: id.clone(),
                    updated_at: state.updated_at?,
                })
            })
            .collect();
        listings.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        Ok(listings)
    }

    async fn exists(&self, session_id: &SessionId) -> StorageResult<bool> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .map(|s| s.updated_at.is_some())
            .unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// MemorySessionMemory
// ---------------------------------------------------------------------------

/// In-memory dialogue history backed by a `HashMap<SessionId, Vec<MemoryItem>>`.
#[derive(Debug, Default)]
pub struct MemorySessionMemory {
    items: Mutex<HashMap<SessionId, Vec<MemoryItem>>>,
}

impl MemorySessionMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionMemory for MemorySessionMemory {
    async fn add_items(&self, session_id: &SessionId, items: &[MemoryItem]) -> StorageResult<()> {
        let mut store = self.items.lock().unwrap();
        store
            .entry(session_id.clone())
            .or_default()
            .extend(items.iter().cloned());
        Ok(())
    }

    async fn get_items(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryItem>> {
        let store = self.items.lock().unwrap();
        let items = store.get(session_id).cloned().unwrap_or_default();
        Ok(match limit {
            Some(n) if n < items.len() => items[items.len() - n..].to_vec(),
            _ => items,
        })
    }

    async fn pop_item(&self, session_id: &SessionId) -> StorageResult<Option<MemoryItem>> {
        let mut store = self.items.lock().unwrap();
        Ok(store.get_mut(session_id).and_then(|items| items.pop()))
    }

    async fn clear_session(&self, session_id: &SessionId) -> StorageResult<()> {
        self.items.lock().unwrap().remove(session_id);
        Ok(())
    }
}

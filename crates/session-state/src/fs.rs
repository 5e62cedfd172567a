//! Flat-file artifact store
//!
//! Layout: `<root>/<session_id>/` holding
//! - `user_actions.jsonl`, `agent_actions.jsonl` (turn log)
//! - `journal_notes.jsonl`, `summaries.jsonl` and the `learnings.md` projection
//! - `augmented_turns.jsonl` and the `augmented_turns.md` projection
//! - `mode.json`, `assistant_session_id.txt`
//!
//! JSONL appends are a single `write_all` of one complete line while holding
//! an exclusive `fs2` lock on the file. Journal writes additionally hold
//! `.journal.lock` across dedupe, append and re-render, so concurrent writers
//! never persist a stale `learnings.md`. Markdown projections are replaced
//! atomically (temp file in the same directory, then rename).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Lines, Write};
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::markdown;
use crate::schema::{
    AugmentationRecord, JournalNote, ModeRecord, Role, SessionId, SessionListing, SessionMode,
    Summary, Turn,
};
use crate::storage_traits::{
    check_gap_monotonic, check_turn_sequence, AugmentationLog, LearningsJournal, SessionCatalog,
    SessionMeta, StorageResult, TurnLog, TurnSequence, TurnSource,
};

pub const USER_ACTIONS: &str = "user_actions.jsonl";
pub const AGENT_ACTIONS: &str = "agent_actions.jsonl";
pub const JOURNAL_NOTES: &str = "journal_notes.jsonl";
pub const SUMMARIES: &str = "summaries.jsonl";
pub const LEARNINGS: &str = "learnings.md";
pub const AUGMENTED_JSONL: &str = "augmented_turns.jsonl";
pub const AUGMENTED_MD: &str = "augmented_turns.md";
pub const MODE: &str = "mode.json";
pub const ASSISTANT_HANDLE: &str = "assistant_session_id.txt";
const JOURNAL_LOCK: &str = ".journal.lock";

const ARTIFACT_FILES: &[&str] = &[
    USER_ACTIONS,
    AGENT_ACTIONS,
    JOURNAL_NOTES,
    SUMMARIES,
    LEARNINGS,
    AUGMENTED_JSONL,
    MODE,
];

/// Filesystem-backed implementation of every artifact trait.
///
/// Assumes at most one writer process per session id; the last-index cache
/// is seeded from disk on first use. File I/O and `fs2` locks run on the
/// blocking pool, never on a runtime worker.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    inner: Arc<FsStore>,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StorageError::unavailable(&root, e))?;
        Ok(Self {
            inner: Arc::new(FsStore {
                root,
                last_turns: Mutex::new(HashMap::new()),
                session_locks: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.inner.session_dir(session_id)
    }

    /// Run `op` against the store on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FsStore) -> StorageResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StorageError::Backend(format!("blocking storage task failed: {e}")))?
    }
}

/// Synchronous half of [`FsArtifactStore`].
#[derive(Debug)]
struct FsStore {
    root: PathBuf,
    last_turns: Mutex<HashMap<SessionId, u64>>,
    session_locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl FsStore {
    fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    fn path(&self, session_id: &SessionId, file: &str) -> PathBuf {
        self.session_dir(session_id).join(file)
    }

    fn ensure_session_dir(&self, session_id: &SessionId) -> StorageResult<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).map_err(|e| StorageError::unavailable(&dir, e))?;
        Ok(dir)
    }

    fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(session_id.clone()).or_default())
    }

    fn turn_file(&self, session_id: &SessionId, role: &Role) -> PathBuf {
        match role {
            Role::User => self.path(session_id, USER_ACTIONS),
            _ => self.path(session_id, AGENT_ACTIONS),
        }
    }

    fn scan_last_index(&self, session_id: &SessionId) -> StorageResult<u64> {
        let user = JsonlTurns::open(self.path(session_id, USER_ACTIONS))?;
        let agent = JsonlTurns::open(self.path(session_id, AGENT_ACTIONS))?;
        Ok(user.chain(agent).map(|t| t.turn).max().unwrap_or(0))
    }

    fn cached_last_index(&self, session_id: &SessionId) -> StorageResult<u64> {
        if let Some(last) = self
            .last_turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
        {
            return Ok(*last);
        }
        let last = self.scan_last_index(session_id)?;
        self.last_turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), last);
        Ok(last)
    }

    fn render_learnings(&self, session_id: &SessionId) -> StorageResult<()> {
        let notes: Vec<JournalNote> = read_jsonl_lenient(&self.path(session_id, JOURNAL_NOTES))?;
        let summaries: Vec<Summary> = match read_jsonl_strict(&self.path(session_id, SUMMARIES)) {
            Ok(s) => s,
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    error = %err,
                    "learnings.md left stale: summaries unreadable"
                );
                return Ok(());
            }
        };

        let started_at = notes
            .iter()
            .map(|n| n.recorded_at)
            .chain(summaries.iter().map(|s| s.created_at))
            .min()
            .unwrap_or_else(Utc::now);

        let doc = markdown::render_learnings(session_id, started_at, &notes, &summaries);
        write_atomic(&self.path(session_id, LEARNINGS), &doc)
    }

    // -- turn log --

    fn append_turn(&self, session_id: &SessionId, turn: &Turn) -> StorageResult<()> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let last = self.cached_last_index(session_id)?;
        check_turn_sequence(session_id, turn, last)?;

        self.ensure_session_dir(session_id)?;
        let path = self.turn_file(session_id, &turn.role);
        let file = open_locked(&path)?;
        append_record(&file, &path, turn)?;

        self.last_turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), turn.turn);
        debug!(session_id = %session_id, turn = turn.turn, role = turn.role.label(), "turn appended");
        Ok(())
    }

    fn read_turns(&self, session_id: &SessionId) -> StorageResult<TurnSequence> {
        let user_path = self.path(session_id, USER_ACTIONS);
        let agent_path = self.path(session_id, AGENT_ACTIONS);
        if !user_path.exists() && !agent_path.exists() {
            return Err(StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        Ok(TurnSequence::from_source(FsTurnSource {
            user_path,
            agent_path,
        }))
    }

    // -- journal --

    fn append_turn_note(&self, session_id: &SessionId, turn: &Turn) -> StorageResult<bool> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.ensure_session_dir(session_id)?;
        let _journal = open_locked(&self.path(session_id, JOURNAL_LOCK))?;
        let path = self.path(session_id, JOURNAL_NOTES);

        let existing: Vec<JournalNote> = read_jsonl_lenient(&path)?;
        if existing.iter().any(|n| n.turn == turn.turn) {
            debug!(session_id = %session_id, turn = turn.turn, "journal note already present");
            return Ok(false);
        }

        let file = open_locked(&path)?;
        append_record(&file, &path, &JournalNote::from_turn(turn))?;
        drop(file);

        self.render_learnings(session_id)?;
        Ok(true)
    }

    fn append_summary(&self, session_id: &SessionId, summary: &Summary) -> StorageResult<()> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.ensure_session_dir(session_id)?;
        let _journal = open_locked(&self.path(session_id, JOURNAL_LOCK))?;
        let path = self.path(session_id, SUMMARIES);

        let earlier: Vec<Summary> = read_jsonl_strict(&path)?;
        check_gap_monotonic(session_id, &earlier, summary)?;
        let file = open_locked(&path)?;
        append_record(&file, &path, summary)?;
        drop(file);

        self.render_learnings(session_id)
    }

    fn read_learnings(&self, session_id: &SessionId) -> StorageResult<String> {
        read_optional(&self.path(session_id, LEARNINGS))?.ok_or_else(|| {
            StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })
    }

    // -- augmentations --

    fn record_augmentation(
        &self,
        session_id: &SessionId,
        record: &AugmentationRecord,
    ) -> StorageResult<()> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.ensure_session_dir(session_id)?;
        let path = self.path(session_id, AUGMENTED_JSONL);
        let file = open_locked(&path)?;

        let mut records: Vec<AugmentationRecord> = read_jsonl_strict(&path)?;
        if records.iter().any(|r| r.turn == record.turn) {
            return Err(StorageError::DuplicateAugmentation {
                session_id: session_id.to_string(),
                turn: record.turn,
            });
        }
        append_record(&file, &path, record)?;

        records.push(record.clone());
        records.sort_by_key(|r| r.turn);
        write_atomic(
            &self.path(session_id, AUGMENTED_MD),
            &markdown::render_augmentations(&records),
        )
    }

    fn list_augmentations(&self, session_id: &SessionId) -> StorageResult<Vec<AugmentationRecord>> {
        let mut records: Vec<AugmentationRecord> =
            read_jsonl_strict(&self.path(session_id, AUGMENTED_JSONL))?;
        records.sort_by_key(|r| r.turn);
        Ok(records)
    }

    // -- session meta --

    fn read_mode(&self, session_id: &SessionId) -> StorageResult<SessionMode> {
        let path = self.path(session_id, MODE);
        match read_optional(&path)? {
            Some(text) => serde_json::from_str::<ModeRecord>(&text)
                .map(|r| r.mode)
                .map_err(|e| StorageError::malformed(&path, e)),
            None => Ok(SessionMode::default()),
        }
    }

    fn write_mode(&self, session_id: &SessionId, mode: SessionMode) -> StorageResult<()> {
        self.ensure_session_dir(session_id)?;
        let record = ModeRecord {
            mode,
            updated_at: Utc::now(),
        };
        let json =
            serde_json::to_string_pretty(&record).map_err(|e| StorageError::Backend(e.to_string()))?;
        write_atomic(&self.path(session_id, MODE), &json)
    }

    fn read_handle(&self, session_id: &SessionId) -> StorageResult<Option<String>> {
        Ok(read_optional(&self.path(session_id, ASSISTANT_HANDLE))?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    fn write_handle(&self, session_id: &SessionId, handle: &str) -> StorageResult<()> {
        self.ensure_session_dir(session_id)?;
        write_atomic(&self.path(session_id, ASSISTANT_HANDLE), handle.trim())
    }

    // -- catalog --

    fn list_session_dirs(&self) -> StorageResult<Vec<SessionListing>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::unavailable(&self.root, e)),
        };

        let mut listings: Vec<SessionListing> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir() && has_artifacts(&entry.path()))
            .filter_map(|entry| {
                let session_id = SessionId::parse(entry.file_name().to_string_lossy()).ok()?;
                let updated_at = dir_updated_at(&entry.path())?;
                Some(SessionListing {
                    session_id,
                    updated_at,
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
}

fn dir_updated_at(dir: &Path) -> Option<DateTime<Utc>> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok()?.metadata().ok()?.modified().ok())
        .max()
        .map(DateTime::<Utc>::from)
}

fn has_artifacts(dir: &Path) -> bool {
    ARTIFACT_FILES.iter().any(|f| dir.join(f).exists())
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

fn open_locked(path: &Path) -> StorageResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::unavailable(path, e))?;
    file.lock_exclusive()
        .map_err(|e| StorageError::unavailable(path, format!("failed to acquire lock: {e}")))?;
    Ok(file)
}

fn append_record<T: Serialize>(file: &File, path: &Path, record: &T) -> StorageResult<()> {
    let mut line =
        serde_json::to_string(record).map_err(|e| StorageError::Backend(e.to_string()))?;
    line.push('\n');
    let mut writer = file;
    writer
        .write_all(line.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| StorageError::unavailable(path, e))
}

fn write_atomic(path: &Path, contents: &str) -> StorageResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::unavailable(path, "no parent directory"))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::unavailable(dir, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| StorageError::unavailable(path, e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::unavailable(path, e.error))?;
    Ok(())
}

fn read_optional(path: &Path) -> StorageResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::unavailable(path, e)),
    }
}

/// Every line must parse; a missing file reads as empty.
fn read_jsonl_strict<T: DeserializeOwned>(path: &Path) -> StorageResult<Vec<T>> {
    let Some(text) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| StorageError::malformed(path, format!("line {}: {e}", i + 1)))
        })
        .collect()
}

/// Malformed lines are skipped with a warning.
fn read_jsonl_lenient<T: DeserializeOwned>(path: &Path) -> StorageResult<Vec<T>> {
    let Some(text) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    Ok(text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str(line) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(path = %path.display(), line = i + 1, error = %e, "skipping malformed record");
                None
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Lazy turn reading
// ---------------------------------------------------------------------------

/// Streams turns from one JSONL file, skipping malformed lines.
struct JsonlTurns {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
}

impl JsonlTurns {
    fn open(path: PathBuf) -> StorageResult<Self> {
        let lines = match File::open(&path) {
            Ok(f) => Some(BufReader::new(f).lines()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(StorageError::unavailable(&path, e)),
        };
        Ok(Self {
            path,
            lines,
            line_no: 0,
        })
    }
}

impl Iterator for JsonlTurns {
    type Item = Turn;

    fn next(&mut self) -> Option<Turn> {
        loop {
            let line = match self.lines.as_mut()?.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "turn log read aborted");
                    self.lines = None;
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Turn>(&line) {
                Ok(turn) if !turn.is_system() => return Some(turn),
                Ok(_) => continue,
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = self.line_no,
                    error = %e,
                    "skipping malformed turn record"
                ),
            }
        }
    }
}

/// Merges the user and agent logs by turn index.
struct MergedTurns {
    user: Peekable<JsonlTurns>,
    agent: Peekable<JsonlTurns>,
}

impl Iterator for MergedTurns {
    type Item = Turn;

    fn next(&mut self) -> Option<Turn> {
        match (self.user.peek(), self.agent.peek()) {
            (Some(u), Some(a)) if a.turn < u.turn => self.agent.next(),
            (Some(_), _) => self.user.next(),
            (None, _) => self.agent.next(),
        }
    }
}

#[derive(Debug)]
struct FsTurnSource {
    user_path: PathBuf,
    agent_path: PathBuf,
}

impl TurnSource for FsTurnSource {
    fn open(&self) -> StorageResult<Box<dyn Iterator<Item = Turn> + Send>> {
        Ok(Box::new(MergedTurns {
            user: JsonlTurns::open(self.user_path.clone())?.peekable(),
            agent: JsonlTurns::open(self.agent_path.clone())?.peekable(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl TurnLog for FsArtifactStore {
    async fn append(&self, session_id: &SessionId, turn: &Turn) -> StorageResult<()> {
        let (id, turn) = (session_id.clone(), turn.clone());
        self.blocking(move |store| store.append_turn(&id, &turn)).await
    }

    async fn read_all(&self, session_id: &SessionId) -> StorageResult<TurnSequence> {
        let id = session_id.clone();
        self.blocking(move |store| store.read_turns(&id)).await
    }

    async fn last_index(&self, session_id: &SessionId) -> StorageResult<u64> {
        let id = session_id.clone();
        self.blocking(move |store| store.cached_last_index(&id)).await
    }
}

#[async_trait]
impl LearningsJournal for FsArtifactStore {
    async fn append_turn_note(&self, session_id: &SessionId, turn: &Turn) -> StorageResult<bool> {
        let (id, turn) = (session_id.clone(), turn.clone());
        self.blocking(move |store| store.append_turn_note(&id, &turn)).await
    }

    async fn append_summary(
        &self,
        session_id: &SessionId,
        summary: &Summary,
    ) -> StorageResult<()> {
        let (id, summary) = (session_id.clone(), summary.clone());
        self.blocking(move |store| store.append_summary(&id, &summary)).await
    }

    async fn read(&self, session_id: &SessionId) -> StorageResult<String> {
        let id = session_id.clone();
        self.blocking(move |store| store.read_learnings(&id)).await
    }

    async fn summaries(&self, session_id: &SessionId) -> StorageResult<Vec<Summary>> {
        let path = self.inner.path(session_id, SUMMARIES);
        self.blocking(move |_| read_jsonl_strict(&path)).await
    }
}

#[async_trait]
impl AugmentationLog for FsArtifactStore {
    async fn record(
        &self,
        session_id: &SessionId,
        record: &AugmentationRecord,
    ) -> StorageResult<()> {
        let (id, record) = (session_id.clone(), record.clone());
        self.blocking(move |store| store.record_augmentation(&id, &record))
            .await
    }

    async fn list(&self, session_id: &SessionId) -> StorageResult<Vec<AugmentationRecord>> {
        let id = session_id.clone();
        self.blocking(move |store| store.list_augmentations(&id)).await
    }
}

#[async_trait]
impl SessionMeta for FsArtifactStore {
    async fn mode(&self, session_id: &SessionId) -> StorageResult<SessionMode> {
        let id = session_id.clone();
        self.blocking(move |store| store.read_mode(&id)).await
    }

    async fn set_mode(&self, session_id: &SessionId, mode: SessionMode) -> StorageResult<()> {
        let id = session_id.clone();
        self.blocking(move |store| store.write_mode(&id, mode)).await
    }

    async fn assistant_handle(&self, session_id: &SessionId) -> StorageResult<Option<String>> {
        let id = session_id.clone();
        self.blocking(move |store| store.read_handle(&id)).await
    }

    async fn save_assistant_handle(
        &self,
        session_id: &SessionId,
        handle: &str,
    ) -> StorageResult<()> {
        let (id, handle) = (session_id.clone(), handle.to_string());
        self.blocking(move |store| store.write_handle(&id, &handle)).await
    }
}

#[async_trait]
impl SessionCatalog for FsArtifactStore {
    async fn list_sessions(&self) -> StorageResult<Vec<SessionListing>> {
        self.blocking(FsStore::list_session_dirs).await
    }

    async fn exists(&self, session_id: &SessionId) -> StorageResult<bool> {
        let dir = self.session_dir(session_id);
        self.blocking(move |_| Ok(has_artifacts(&dir))).await
    }
}

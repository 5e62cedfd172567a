//! Session-State: persistence for Session Intel
//!
//! This crate owns every artifact a session leaves behind: the raw turn log,
//! the learnings journal, augmentation decisions, the mode flag and the
//! dialogue history handed to the assistant.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: append-only records, atomic projections, safe concurrent appends.
//!
//! ## Key Components
//!
//! - `FsArtifactStore`: flat-file store under `<documents_root>/<session_id>/`
//! - `SurrealSessionMemory`: dialogue history in SurrealDB (`sessions.db`)
//! - `markdown`: `learnings.md` / `augmented_turns.md` projections
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
pub mod fs;
pub mod markdown;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_memory;

pub use error::StorageError;
pub use fs::FsArtifactStore;
pub use schema::{
    normalize_gap, AugmentationRecord, Decision, DialogueRole, Gap, JournalNote, MemoryItem,
    MemoryRecord, ModeRecord, Role, SessionId, SessionListing, SessionMode, Summary, Turn,
};
pub use storage_traits::{
    ArtifactStore, AugmentationLog, LearningsJournal, SessionCatalog, SessionMemory, SessionMeta,
    StorageResult, TurnLog, TurnSequence, TurnSource,
};
pub use surreal_memory::SurrealSessionMemory;

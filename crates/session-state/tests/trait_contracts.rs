//! Trait contract tests for TurnLog, LearningsJournal, AugmentationLog,
//! SessionMeta and SessionCatalog.
//!
//! Every contract runs against both the in-memory fake and the flat-file
//! store. Any conforming implementation must pass these.

use chrono::Utc;
use session_state::fakes::MemoryArtifactStore;
use session_state::storage_traits::*;
use session_state::{
    AugmentationRecord, Decision, FsArtifactStore, Gap, SessionId, SessionMode, StorageError,
    Summary, Turn,
};

fn sid(s: &str) -> SessionId {
    SessionId::parse(s).unwrap()
}

fn sample_record(turn: u64) -> AugmentationRecord {
    AugmentationRecord {
        turn,
        original: "how do I stop the double fetch?".into(),
        suggestion: "how do I stop the double fetch? (recall the useEffect lifecycle gap)".into(),
        final_text: "how do I stop the double fetch?".into(),
        justification: vec![],
        suggestion_diff: String::new(),
        final_diff: String::new(),
        decision: Decision::Rejected,
        recorded_at: Utc::now(),
    }
}

// ===========================================================================
// Shared contracts
// ===========================================================================

async fn contract_appended_turns_read_back_in_order(store: &dyn ArtifactStore) {
    let id = sid("order");
    for i in 1..=10u64 {
        let turn = if i % 2 == 1 {
            Turn::user(i, format!("question {i}"))
        } else {
            Turn::agent(i, format!("answer {i}"))
        };
        store.append(&id, &turn).await.unwrap();
    }

    let turns = store.read_all(&id).await.unwrap().to_vec().unwrap();
    let indices: Vec<u64> = turns.iter().map(|t| t.turn).collect();
    assert_eq!(indices, (1..=10).collect::<Vec<_>>());
    assert_eq!(store.last_index(&id).await.unwrap(), 10);
}

async fn contract_first_turn_must_be_one(store: &dyn ArtifactStore) {
    let id = sid("first");
    let err = store.append(&id, &Turn::user(2, "late")).await.unwrap_err();
    assert!(matches!(err, StorageError::OutOfSequence { expected: 1, .. }));
}

async fn contract_system_turns_rejected(store: &dyn ArtifactStore) {
    let err = store
        .append(&sid("sys"), &Turn::system("you are helpful"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidTurn(_)));
}

async fn contract_read_unknown_session(store: &dyn ArtifactStore) {
    let id = sid("ghost");
    assert!(matches!(
        store.read_all(&id).await.unwrap_err(),
        StorageError::SessionNotFound { .. }
    ));
    assert!(matches!(
        store.read(&id).await.unwrap_err(),
        StorageError::SessionNotFound { .. }
    ));
    assert_eq!(store.last_index(&id).await.unwrap(), 0);
    assert!(store.summaries(&id).await.unwrap().is_empty());
    assert!(store.list(&id).await.unwrap().is_empty());
    assert!(!store.exists(&id).await.unwrap());
}

async fn contract_journal_note_is_idempotent(store: &dyn ArtifactStore) {
    let id = sid("notes");
    let turn = Turn::user(1, "What does useEffect cleanup do?");
    assert!(store.append_turn_note(&id, &turn).await.unwrap());
    assert!(!store.append_turn_note(&id, &turn).await.unwrap());

    let doc = store.read(&id).await.unwrap();
    assert_eq!(
        doc.matches("- Turn 1 – **User**: What does useEffect cleanup do?")
            .count(),
        1
    );
}

async fn contract_summaries_are_chronological_and_after_bullets(store: &dyn ArtifactStore) {
    let id = sid("summaries");
    store
        .append_turn_note(&id, &Turn::user(1, "q"))
        .await
        .unwrap();
    let first = Summary::new(vec!["first".into()], vec![Gap::open("lifecycle")], vec![]);
    let second = Summary::new(vec!["second".into()], vec![Gap::resolved("lifecycle")], vec![]);
    store.append_summary(&id, &first).await.unwrap();
    store.append_summary(&id, &second).await.unwrap();
    store
        .append_turn_note(&id, &Turn::agent(2, "a"))
        .await
        .unwrap();

    let all = store.summaries(&id).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].highlights, vec!["first".to_string()]);
    assert_eq!(
        store.latest_summary(&id).await.unwrap().unwrap().highlights,
        vec!["second".to_string()]
    );

    let doc = store.read(&id).await.unwrap();
    let last_bullet = doc.find("- Turn 2").unwrap();
    let first_summary = doc.find("## Session Summary").unwrap();
    assert!(last_bullet < first_summary);
}

async fn contract_resolved_gap_never_reopens(store: &dyn ArtifactStore) {
    let id = sid("monotonic");
    store
        .append_summary(
            &id,
            &Summary::new(vec![], vec![Gap::resolved("Effect ordering")], vec![]),
        )
        .await
        .unwrap();
    let err = store
        .append_summary(
            &id,
            &Summary::new(vec![], vec![Gap::open("effect ordering")], vec![]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::GapReverted { .. }));
    assert_eq!(store.summaries(&id).await.unwrap().len(), 1);
}

async fn contract_one_augmentation_per_turn(store: &dyn ArtifactStore) {
    let id = sid("augment");
    store.record(&id, &sample_record(3)).await.unwrap();
    store.record(&id, &sample_record(1)).await.unwrap();
    let err = store.record(&id, &sample_record(1)).await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicateAugmentation { turn: 1, .. }));

    let turns: Vec<u64> = store.list(&id).await.unwrap().iter().map(|r| r.turn).collect();
    assert_eq!(turns, vec![1, 3]);
}

async fn contract_mode_defaults_and_persists(store: &dyn ArtifactStore) {
    let id = sid("mode");
    assert_eq!(store.mode(&id).await.unwrap(), SessionMode::GapCapture);
    store.set_mode(&id, SessionMode::Learn).await.unwrap();
    assert_eq!(store.mode(&id).await.unwrap(), SessionMode::Learn);
    store.set_mode(&id, SessionMode::GapCapture).await.unwrap();
    assert_eq!(store.mode(&id).await.unwrap(), SessionMode::GapCapture);
}

async fn contract_catalog_lists_written_sessions(store: &dyn ArtifactStore) {
    store.append(&sid("cat-a"), &Turn::user(1, "a")).await.unwrap();
    store.append(&sid("cat-b"), &Turn::user(1, "b")).await.unwrap();

    let listed: Vec<String> = store
        .list_sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.session_id.to_string())
        .collect();
    assert!(listed.contains(&"cat-a".to_string()));
    assert!(listed.contains(&"cat-b".to_string()));
    assert!(store.exists(&sid("cat-a")).await.unwrap());
}

async fn run_all(store: &dyn ArtifactStore) {
    contract_appended_turns_read_back_in_order(store).await;
    contract_first_turn_must_be_one(store).await;
    contract_system_turns_rejected(store).await;
    contract_read_unknown_session(store).await;
    contract_journal_note_is_idempotent(store).await;
    contract_summaries_are_chronological_and_after_bullets(store).await;
    contract_resolved_gap_never_reopens(store).await;
    contract_one_augmentation_per_turn(store).await;
    contract_mode_defaults_and_persists(store).await;
    contract_catalog_lists_written_sessions(store).await;
}

// ===========================================================================
// MemoryArtifactStore
// ===========================================================================

#[tokio::test]
async fn memory_store_satisfies_contracts() {
    let store = MemoryArtifactStore::new();
    run_all(&store).await;
}

#[tokio::test]
async fn memory_store_write_failure_is_storage_unavailable() {
    let store = MemoryArtifactStore::new();
    store.set_fail_writes(true);
    let err = store
        .append(&sid("down"), &Turn::user(1, "q"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::StorageUnavailable { .. }));
}

// ===========================================================================
// FsArtifactStore (mirrors MemoryArtifactStore tests above)
// ===========================================================================

mod fs_store_tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_satisfies_contracts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        run_all(&store).await;
    }

    #[tokio::test]
    async fn jsonl_records_use_flat_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let id = sid("wire");
        store.append(&id, &Turn::user(1, "hello")).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("wire/user_actions.jsonl")).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["turn"], 1);
        assert_eq!(value["content"], "hello");
        assert!(value["timestamp"].is_string());
        assert!(raw.ends_with('\n'));
    }
}

//! Read-only access to stored sessions for listings and detail views.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use session_state::{
    ArtifactStore, AugmentationRecord, SessionId, SessionMode, StorageError, StorageResult,
    Summary, Turn,
};

use crate::recap::SYNOPSIS_CHARS;

const NO_LEARNINGS: &str = "No previous learnings recorded.";

/// One row of a session listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDigest {
    pub session_id: SessionId,
    pub updated_at: DateTime<Utc>,
    pub digest: String,
    pub mode: SessionMode,
}

/// Everything stored for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session_id: SessionId,
    pub mode: SessionMode,
    pub turns: Vec<Turn>,
    pub summaries: Vec<Summary>,
    pub augmentations: Vec<AugmentationRecord>,
    pub journal: Option<String>,
    /// Artifacts that could not be read.
    pub notices: Vec<String>,
}

pub struct ArtifactReader {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactReader {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Sessions newest first, at most `limit` when given.
    pub async fn list_sessions(&self, limit: Option<usize>) -> StorageResult<Vec<SessionDigest>> {
        let listings = self.store.list_sessions().await?;
        let take = limit.unwrap_or(listings.len());

        let mut digests = Vec::with_capacity(take.min(listings.len()));
        for listing in listings.into_iter().take(take) {
            let digest = self.digest(&listing.session_id).await;
            let mode = self
                .store
                .mode(&listing.session_id)
                .await
                .unwrap_or_default();
            digests.push(SessionDigest {
                session_id: listing.session_id,
                updated_at: listing.updated_at,
                digest,
                mode,
            });
        }
        Ok(digests)
    }

    /// First highlight of the latest summary, else the latest user question.
    async fn digest(&self, session_id: &SessionId) -> String {
        if let Ok(Some(summary)) = self.store.latest_summary(session_id).await {
            if let Some(first) = summary.highlights.first() {
                return first.clone();
            }
        }
        let last_question = match self.store.read_all(session_id).await {
            Ok(sequence) => sequence
                .iter()
                .ok()
                .and_then(|turns| turns.filter(Turn::is_user).last()),
            Err(_) => None,
        };
        last_question
            .map(|t| t.synopsis(SYNOPSIS_CHARS))
            .unwrap_or_else(|| NO_LEARNINGS.to_string())
    }

    /// Full detail for one session. Unreadable artifacts become notices.
    pub async fn session_detail(&self, session_id: &SessionId) -> StorageResult<SessionDetail> {
        if !self.store.exists(session_id).await? {
            return Err(StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }

        let mut notices = Vec::new();
        let turns = match self.store.read_all(session_id).await {
            Ok(sequence) => sequence.to_vec()?,
            Err(err) if err.is_missing() => Vec::new(),
            Err(err) => return Err(err),
        };
        let summaries = self
            .store
            .summaries(session_id)
            .await
            .unwrap_or_else(|err| {
                notices.push(format!("summaries: {err}"));
                Vec::new()
            });
        let augmentations = self.store.list(session_id).await.unwrap_or_else(|err| {
            notices.push(format!("augmentations: {err}"));
            Vec::new()
        });
        let journal = match self.store.read(session_id).await {
            Ok(text) => Some(text),
            Err(err) if err.is_missing() => None,
            Err(err) => {
                notices.push(format!("journal: {err}"));
                None
            }
        };
        let mode = self.store.mode(session_id).await.unwrap_or_default();

        Ok(SessionDetail {
            session_id: session_id.clone(),
            mode,
            turns,
            summaries,
            augmentations,
            journal,
            notices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_state::fakes::MemoryArtifactStore;
    use session_state::{LearningsJournal, SessionMeta, TurnLog};

    fn sid(s: &str) -> SessionId {
        SessionId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn digest_prefers_summary_then_question() {
        let store = Arc::new(MemoryArtifactStore::new());
        let (a, b, c) = (sid("a"), sid("b"), sid("c"));

        store.append(&a, &Turn::user(1, "How do refs work?")).await.unwrap();
        store
            .append_summary(&a, &Summary::new(vec!["Learned about refs".into()], vec![], vec![]))
            .await
            .unwrap();
        store.append(&b, &Turn::user(1, "first")).await.unwrap();
        store.append(&b, &Turn::agent(2, "reply")).await.unwrap();
        store.append(&b, &Turn::user(3, "Why is my effect stale?\nctx")).await.unwrap();
        store.set_mode(&c, SessionMode::Learn).await.unwrap();

        let reader = ArtifactReader::new(store.clone());
        let rows = reader.list_sessions(None).await.unwrap();
        let digest_of = |id: &SessionId| {
            rows.iter()
                .find(|r| &r.session_id == id)
                .map(|r| (r.digest.clone(), r.mode))
                .unwrap()
        };
        assert_eq!(digest_of(&a).0, "Learned about refs");
        assert_eq!(digest_of(&b).0, "Why is my effect stale?");
        assert_eq!(digest_of(&c), (NO_LEARNINGS.to_string(), SessionMode::Learn));

        assert_eq!(reader.list_sessions(Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn detail_collects_everything() {
        let store = Arc::new(MemoryArtifactStore::new());
        let id = sid("s1");
        store.append(&id, &Turn::user(1, "q")).await.unwrap();
        store.append_turn_note(&id, &Turn::user(1, "q")).await.unwrap();

        let detail = ArtifactReader::new(store).session_detail(&id).await.unwrap();
        assert_eq!(detail.turns.len(), 1);
        assert!(detail.journal.unwrap().contains("- Turn 1 – **User**: q"));
        assert!(detail.summaries.is_empty());
        assert_eq!(detail.mode, SessionMode::GapCapture);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let reader = ArtifactReader::new(Arc::new(MemoryArtifactStore::new()));
        let err = reader.session_detail(&sid("ghost")).await.unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound { .. }));
    }
}

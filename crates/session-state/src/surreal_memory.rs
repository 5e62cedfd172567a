//! SurrealDB-backed SessionMemory implementation
//!
//! Uses `schema::MemoryRecord` rows keyed by `(session_id, seq)`, converting
//! to `MemoryItem` at the boundary.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::schema::{MemoryItem, MemoryRecord, SessionId};
use crate::storage_traits::{SessionMemory, StorageResult};

const NAMESPACE: &str = "session_intel";
const DATABASE: &str = "main";

/// SurrealDB-backed implementation of [`SessionMemory`].
pub struct SurrealSessionMemory {
    db: Surreal<Any>,
}

#[derive(Debug, Deserialize)]
struct SeqRow {
    seq: u64,
}

impl SurrealSessionMemory {
    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://...`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(url = %url, "SurrealSessionMemory connected");
        Ok(Self { db })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Local persistent store at `<documents_root>/sessions.db`.
    pub async fn open_local(documents_root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(documents_root)
            .map_err(|e| StorageError::unavailable(documents_root, e))?;
        let path = documents_root.join("sessions.db");
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    /// Highest seq stored for the session, 0 when empty.
    async fn last_seq(&self, sid: &str) -> StorageResult<u64> {
        let mut res = self
            .db
            .query("SELECT seq FROM session_memory WHERE session_id = $sid ORDER BY seq DESC LIMIT 1")
            .bind(("sid", sid.to_string()))
            .await?;
        let rows: Vec<SeqRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.seq).unwrap_or(0))
    }
}

#[async_trait]
impl SessionMemory for SurrealSessionMemory {
    async fn add_items(&self, session_id: &SessionId, items: &[MemoryItem]) -> StorageResult<()> {
        let mut seq = self.last_seq(session_id.as_str()).await?;
        for item in items {
            seq += 1;
            let _created: Option<MemoryRecord> = self
                .db
                .create("session_memory")
                .content(MemoryRecord::new(session_id, seq, item))
                .await?;
        }
        debug!(session_id = %session_id, added = items.len(), "session memory items added");
        Ok(())
    }

    async fn get_items(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryItem>> {
        let sid = session_id.as_str().to_string();
        let mut res = match limit {
            Some(n) => {
                self.db
                    .query(
                        "SELECT * FROM session_memory WHERE session_id = $sid \
                         ORDER BY seq DESC LIMIT $limit",
                    )
                    .bind(("sid", sid))
                    .bind(("limit", n as u64))
                    .await?
            }
            None => {
                self.db
                    .query("SELECT * FROM session_memory WHERE session_id = $sid ORDER BY seq ASC")
                    .bind(("sid", sid))
                    .await?
            }
        };

        let mut rows: Vec<MemoryRecord> = res.take(0)?;
        rows.sort_by_key(|r| r.seq);
        Ok(rows.into_iter().map(MemoryRecord::into_item).collect())
    }

    async fn pop_item(&self, session_id: &SessionId) -> StorageResult<Option<MemoryItem>> {
        let sid = session_id.as_str().to_string();
        let mut res = self
            .db
            .query("SELECT * FROM session_memory WHERE session_id = $sid ORDER BY seq DESC LIMIT 1")
            .bind(("sid", sid.clone()))
            .await?;
        let rows: Vec<MemoryRecord> = res.take(0)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        self.db
            .query("DELETE session_memory WHERE session_id = $sid AND seq = $seq")
            .bind(("sid", sid))
            .bind(("seq", row.seq))
            .await?
            .check()?;
        Ok(Some(row.into_item()))
    }

    async fn clear_session(&self, session_id: &SessionId) -> StorageResult<()> {
        self.db
            .query("DELETE session_memory WHERE session_id = $sid")
            .bind(("sid", session_id.as_str().to_string()))
            .await?
            .check()?;
        debug!(session_id = %session_id, "session memory cleared");
        Ok(())
    }
}

//! SurrealDB schema initialization for session memory
//!
//! Safe to run on every connection; `DEFINE` statements are idempotent.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all Session Intel tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing session memory schema");
    init_session_memory_table(db).await?;
    Ok(())
}

/// Initialize `session_memory` table
///
/// Schema:
/// ```text
/// TABLE session_memory {
///   session_id:  STRING (indexed)
///   seq:         INT (1-indexed position within the session)
///   role:        STRING (user | assistant | system)
///   content:     STRING
///   created_at:  DATETIME
/// }
/// ```
///
/// Constraints:
/// - `(session_id, seq)` is unique, so two items never share a position
async fn init_session_memory_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing session_memory table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS session_memory AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_session_seq ON TABLE session_memory COLUMNS session_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_session_id ON TABLE session_memory COLUMNS session_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ session_memory table initialized");
    Ok(())
}

//! Durable context store on SQLite.
//!
//! Each conversation context is stored as one JSON blob keyed by the
//! conversation key. The connection mutex is held across every
//! read-modify-write, which gives the key-scoped atomicity the trait
//! requires.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use async_trait::async_trait;

use crate::config::CompactionConfig;
use crate::models::{ConversationContext, MemorySegment};

use super::{apply_append, apply_commit, apply_segment_update, ContextStore, SegmentUpdate, StoreError};

pub struct SqliteContextStore {
    conn: Mutex<Connection>,
    config: CompactionConfig,
}

impl SqliteContextStore {
    /// Open (or create) the store at the given path.
    pub fn new(db_path: &str, config: CompactionConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Backend(format!("failed to open database: {}", e)))?;
        Self::with_connection(conn, config)
    }

    /// Build the store on an existing connection (":memory:" in tests).
    pub fn with_connection(
        conn: Connection,
        config: CompactionConfig,
    ) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversation_contexts (
                conversation_key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create table: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    fn load(conn: &Connection, key: &str) -> Result<Option<ConversationContext>, StoreError> {
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM conversation_contexts WHERE conversation_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(format!("failed to read context: {}", e)))?;

        match data {
            None => Ok(None),
            Some(blob) => serde_json::from_str(&blob)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt context blob: {}", e))),
        }
    }

    fn save(conn: &Connection, key: &str, context: &ConversationContext) -> Result<(), StoreError> {
        let blob = serde_json::to_string(context)
            .map_err(|e| StoreError::Backend(format!("failed to serialize context: {}", e)))?;
        conn.execute(
            "INSERT OR REPLACE INTO conversation_contexts (conversation_key, data, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, blob, Utc::now().to_rfc3339()],
        )
        .map_err(|e| StoreError::Backend(format!("failed to write context: {}", e)))?;
        Ok(())
    }

    /// Read-modify-write under the connection lock.
    fn mutate<F>(&self, key: &str, f: F) -> Result<ConversationContext, StoreError>
    where
        F: FnOnce(&mut ConversationContext),
    {
        let conn = self.conn.lock();
        let mut context = Self::load(&conn, key)?.unwrap_or_default();
        f(&mut context);
        Self::save(&conn, key, &context)?;
        Ok(context)
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn get(&self, key: &str) -> ConversationContext {
        let conn = self.conn.lock();
        match Self::load(&conn, key) {
            Ok(Some(context)) => context,
            Ok(None) => ConversationContext::new(),
            Err(e) => {
                // get() never fails; a broken row degrades to a fresh context
                log::warn!("[STORE] Failed to load context for {}: {}", key, e);
                ConversationContext::new()
            }
        }
    }

    async fn append_message(
        &self,
        key: &str,
        text: &str,
    ) -> Result<ConversationContext, StoreError> {
        self.mutate(key, |context| apply_append(context, text))
    }

    async fn commit_compaction(
        &self,
        key: &str,
        segment: MemorySegment,
    ) -> Result<ConversationContext, StoreError> {
        let max_segments = self.config.max_segments;
        self.mutate(key, |context| apply_commit(context, segment, max_segments))
    }

    async fn update_segments(
        &self,
        key: &str,
        update: SegmentUpdate,
    ) -> Result<ConversationContext, StoreError> {
        self.mutate(key, |context| apply_segment_update(context, update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp(dir: &tempfile::TempDir) -> SqliteContextStore {
        let path = dir.path().join("contexts.db");
        SqliteContextStore::new(path.to_str().unwrap(), CompactionConfig::default())
            .expect("open store")
    }

    #[tokio::test]
    async fn test_append_and_commit_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);

        for _ in 0..5 {
            store.append_message("c1", "hello there").await.unwrap();
        }
        let context = store.get("c1").await;
        assert_eq!(context.message_count, 5);

        let context = store
            .commit_compaction("c1", MemorySegment::with_summary("summary"))
            .await
            .unwrap();
        assert_eq!(context.message_count, 0);
        assert_eq!(context.total_characters, 0);
        assert_eq!(context.memory_segments.len(), 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contexts.db");

        {
            let store =
                SqliteContextStore::new(path.to_str().unwrap(), CompactionConfig::default())
                    .unwrap();
            store.append_message("c1", "persisted message").await.unwrap();
        }

        let store = SqliteContextStore::new(path.to_str().unwrap(), CompactionConfig::default())
            .unwrap();
        let context = store.get("c1").await;
        assert_eq!(context.message_count, 1);
        assert_eq!(context.recent_messages[0].text, "persisted message");
    }

    #[tokio::test]
    async fn test_get_unknown_key_never_fails() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);
        let context = store.get("missing").await;
        assert_eq!(context.message_count, 0);
        assert!(context.memory_segments.is_empty());
    }
}

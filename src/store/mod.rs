//! Keyed persistence for per-conversation state.
//!
//! The `ContextStore` trait is the single seam every other component mutates
//! conversation state through. Implementations must make each operation an
//! atomic read-modify-write for its conversation key; different keys are
//! fully independent.
//!
//! Two backends:
//! - `InMemoryContextStore` - DashMap-backed, the default for tests and
//!   embedded use
//! - `SqliteContextStore` - durable single-file store (see `sqlite`)

pub mod sqlite;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::config::{defaults, CompactionConfig};
use crate::models::{ConversationContext, MemorySegment, RecentMessage};

pub use sqlite::SqliteContextStore;

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "store backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Bulk segment rewrite used by the memory manager's maintenance paths
/// (store-with-cap, consolidation). Counter deltas land in the context
/// metadata.
#[derive(Debug, Default)]
pub struct SegmentUpdate {
    pub segments: Vec<MemorySegment>,
    /// Segments dropped by cap eviction
    pub evicted: u32,
    /// Consolidation passes applied
    pub consolidations: u32,
}

#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Current context for a key. A key never seen before yields a
    /// zero-valued context; this operation does not fail.
    async fn get(&self, key: &str) -> ConversationContext;

    /// Count an incoming message against the context and append a truncated
    /// entry to the recent-message window. Returns the updated context.
    async fn append_message(&self, key: &str, text: &str)
        -> Result<ConversationContext, StoreError>;

    /// Close a compaction cycle: append the new segment (trimming the live
    /// window), zero the counters, clear recent messages, and stamp
    /// `last_compaction_at`. `created_at` is preserved.
    async fn commit_compaction(
        &self,
        key: &str,
        segment: MemorySegment,
    ) -> Result<ConversationContext, StoreError>;

    /// Replace the stored segment list wholesale. Counters other than the
    /// segment metadata deltas are untouched.
    async fn update_segments(
        &self,
        key: &str,
        update: SegmentUpdate,
    ) -> Result<ConversationContext, StoreError>;
}

/// Shared append mutation so both backends behave identically.
pub(crate) fn apply_append(context: &mut ConversationContext, text: &str) {
    let length = text.chars().count();
    context.message_count += 1;
    context.total_characters += length;

    let preview: String = text.chars().take(defaults::RECENT_MESSAGE_TRUNCATE).collect();
    context.recent_messages.push(RecentMessage {
        text: preview,
        timestamp: Utc::now(),
        length,
    });
    let window = defaults::RECENT_MESSAGE_WINDOW;
    if context.recent_messages.len() > window {
        let excess = context.recent_messages.len() - window;
        context.recent_messages.drain(..excess);
    }
}

/// Shared commit mutation: the single point that closes a compaction cycle.
pub(crate) fn apply_commit(
    context: &mut ConversationContext,
    segment: MemorySegment,
    max_segments: usize,
) {
    context.memory_segments.push(segment);
    if context.memory_segments.len() > max_segments {
        let excess = context.memory_segments.len() - max_segments;
        context.memory_segments.drain(..excess);
        context.removed_segments += excess as u32;
    }
    context.message_count = 0;
    context.total_characters = 0;
    context.recent_messages.clear();
    context.last_compaction_at = Some(Utc::now());
}

pub(crate) fn apply_segment_update(context: &mut ConversationContext, update: SegmentUpdate) {
    context.memory_segments = update.segments;
    context.removed_segments += update.evicted;
    context.consolidations += update.consolidations;
}

/// In-process context store on a concurrent map. Per-key atomicity comes from
/// the DashMap entry lock held across each read-modify-write.
pub struct InMemoryContextStore {
    contexts: DashMap<String, ConversationContext>,
    config: CompactionConfig,
}

impl InMemoryContextStore {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            contexts: DashMap::new(),
            config,
        }
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new(CompactionConfig::default())
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get(&self, key: &str) -> ConversationContext {
        self.contexts
            .get(key)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    async fn append_message(
        &self,
        key: &str,
        text: &str,
    ) -> Result<ConversationContext, StoreError> {
        let mut entry = self.contexts.entry(key.to_string()).or_insert_with(ConversationContext::new);
        apply_append(entry.value_mut(), text);
        Ok(entry.clone())
    }

    async fn commit_compaction(
        &self,
        key: &str,
        segment: MemorySegment,
    ) -> Result<ConversationContext, StoreError> {
        let mut entry = self.contexts.entry(key.to_string()).or_insert_with(ConversationContext::new);
        apply_commit(entry.value_mut(), segment, self.config.max_segments);
        Ok(entry.clone())
    }

    async fn update_segments(
        &self,
        key: &str,
        update: SegmentUpdate,
    ) -> Result<ConversationContext, StoreError> {
        let mut entry = self.contexts.entry(key.to_string()).or_insert_with(ConversationContext::new);
        apply_segment_update(entry.value_mut(), update);
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_unknown_key_is_zero_valued() {
        let store = InMemoryContextStore::default();
        let context = store.get("nope").await;
        assert_eq!(context.message_count, 0);
        assert_eq!(context.total_characters, 0);
        assert!(context.recent_messages.is_empty());
        assert!(context.memory_segments.is_empty());
        assert!(context.last_compaction_at.is_none());
    }

    #[tokio::test]
    async fn test_append_counts_and_windows() {
        let store = InMemoryContextStore::default();
        for i in 0..12 {
            store
                .append_message("c1", &format!("message number {}", i))
                .await
                .unwrap();
        }
        let context = store.get("c1").await;
        assert_eq!(context.message_count, 12);
        // Window keeps only the last 10, chronological
        assert_eq!(context.recent_messages.len(), 10);
        assert_eq!(context.recent_messages[0].text, "message number 2");
        assert_eq!(context.recent_messages[9].text, "message number 11");
    }

    #[tokio::test]
    async fn test_append_truncates_preview_keeps_full_length() {
        let store = InMemoryContextStore::default();
        let long = "x".repeat(450);
        let context = store.append_message("c1", &long).await.unwrap();
        assert_eq!(context.total_characters, 450);
        assert_eq!(context.recent_messages[0].text.chars().count(), 200);
        assert_eq!(context.recent_messages[0].length, 450);
    }

    #[tokio::test]
    async fn test_commit_resets_counters() {
        // Counters reset to exactly zero on commit regardless of prior value
        let store = InMemoryContextStore::default();
        for _ in 0..57 {
            store.append_message("c1", "some message text").await.unwrap();
        }
        let before = store.get("c1").await;
        assert_eq!(before.message_count, 57);
        assert!(before.total_characters > 0);

        let context = store
            .commit_compaction("c1", MemorySegment::with_summary("the summary"))
            .await
            .unwrap();
        assert_eq!(context.message_count, 0);
        assert_eq!(context.total_characters, 0);
        assert!(context.recent_messages.is_empty());
        assert!(context.last_compaction_at.is_some());
        assert_eq!(context.memory_segments.len(), 1);
        assert_eq!(context.created_at, before.created_at);
    }

    #[tokio::test]
    async fn test_commit_trims_segment_window_oldest_first() {
        let store = InMemoryContextStore::default();
        for i in 0..12 {
            store
                .commit_compaction("c1", MemorySegment::with_summary(format!("segment {}", i)))
                .await
                .unwrap();
        }
        let context = store.get("c1").await;
        assert_eq!(context.memory_segments.len(), 10);
        assert_eq!(context.memory_segments[0].summary, "segment 2");
        assert_eq!(context.removed_segments, 2);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = InMemoryContextStore::default();
        store.append_message("a", "hello").await.unwrap();
        store.append_message("b", "world").await.unwrap();
        assert_eq!(store.get("a").await.message_count, 1);
        assert_eq!(store.get("b").await.message_count, 1);
        store
            .commit_compaction("a", MemorySegment::with_summary("s"))
            .await
            .unwrap();
        assert_eq!(store.get("a").await.message_count, 0);
        assert_eq!(store.get("b").await.message_count, 1);
    }
}

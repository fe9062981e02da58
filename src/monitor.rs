//! Message-path entry point: watch context growth and compact when needed.
//!
//! Every inbound message flows through `handle_message` before normal
//! processing. The monitor consults the policy, and either appends the
//! message or runs a compaction cycle and hands the message back for
//! re-dispatch. All handling for one conversation key is serialized on a
//! per-key lock: a message arriving while a compaction is in flight waits
//! for the commit, then is evaluated against the freshly reset context. Its
//! counter increments can therefore never land on state the commit is about
//! to wipe, and at most one compaction runs per key.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::CompactionConfig;
use crate::coordinator::{CompactionCoordinator, CompactionOutcome};
use crate::memory::MemoryManager;
use crate::models::ConversationContext;
use crate::notify::StatusNotifier;
use crate::policy::CompactionPolicy;
use crate::store::{ContextStore, StoreError};
use crate::summarizer::Summarizer;

/// Segments injected into a prompt preamble by `memory_context`
const MEMORY_CONTEXT_LIMIT: usize = 5;

/// What the caller should do with the message it handed in.
#[derive(Debug)]
pub enum MessageDisposition {
    /// Message recorded; proceed with normal processing.
    Proceed { context: ConversationContext },
    /// Context was compacted first. The message was NOT recorded: re-dispatch
    /// `outcome.resume_with` through `handle_message` to process it against
    /// the reset context.
    Compacted { outcome: CompactionOutcome },
}

pub struct ContextMonitor {
    store: Arc<dyn ContextStore>,
    policy: CompactionPolicy,
    coordinator: CompactionCoordinator,
    memory: MemoryManager,
    /// One lock per conversation key; held across the full handle cycle
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ContextMonitor {
    pub fn new(
        store: Arc<dyn ContextStore>,
        summarizer: Arc<dyn Summarizer>,
        notifier: Arc<dyn StatusNotifier>,
        config: CompactionConfig,
    ) -> Self {
        Self {
            policy: CompactionPolicy::new(config.clone()),
            coordinator: CompactionCoordinator::new(
                store.clone(),
                summarizer,
                notifier,
                config.clone(),
            ),
            memory: MemoryManager::new(store.clone(), config),
            store,
            key_locks: DashMap::new(),
        }
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Record a message, compacting the conversation first when a trigger
    /// fires.
    ///
    /// The per-key lock is taken before the policy check and held through
    /// commit, so a message racing an in-flight compaction neither increments
    /// counters the commit will reset nor starts a second compaction - it
    /// waits, then runs against the reset context.
    ///
    /// A compaction failure is not allowed to stall the conversation: the
    /// message is appended anyway and processing proceeds.
    pub async fn handle_message(
        &self,
        key: &str,
        text: &str,
    ) -> Result<MessageDisposition, StoreError> {
        let lock = self
            .key_locks
            .entry(key.to_string())
            .or_insert_with(Default::default)
            .clone();
        let _guard = lock.lock().await;

        let context = self.store.get(key).await;
        let incoming_len = text.chars().count();

        if self.policy.should_compact(&context, incoming_len) {
            let reason = self.policy.reason(&context);
            match self.coordinator.run(key, text, &reason).await {
                Ok(outcome) => return Ok(MessageDisposition::Compacted { outcome }),
                Err(e) => {
                    log::error!(
                        "[MONITOR] Compaction failed for {} ({}), appending message anyway",
                        key,
                        e
                    );
                }
            }
        }

        let context = self.store.append_message(key, text).await?;
        Ok(MessageDisposition::Proceed { context })
    }

    /// Stored-memory preamble for a prompt: the most relevant segments as
    /// bullet lines, or None when nothing is stored.
    pub async fn memory_context(&self, key: &str, query: Option<&str>) -> Option<String> {
        let result = self
            .memory
            .retrieve_relevant(key, query, MEMORY_CONTEXT_LIMIT, true)
            .await;
        if result.segments.is_empty() {
            return None;
        }

        let mut out = String::from("Relevant context from earlier in this conversation:\n");
        for segment in &result.segments {
            out.push_str(&format!(
                "- [{}] {}\n",
                segment.created_at.format("%Y-%m-%d"),
                segment.summary
            ));
            if !segment.key_topics.is_empty() {
                out.push_str(&format!("  topics: {}\n", segment.key_topics.join(", ")));
            }
        }
        Some(out)
    }
}

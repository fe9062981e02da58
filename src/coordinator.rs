//! End-to-end compaction round trip.
//!
//! The coordinator drives one compaction cycle: plan the work, announce it,
//! call the summarizer, parse the reply, commit the new memory segment, and
//! hand the original triggering message back to the caller for re-dispatch.
//! Summarizer failures and unparseable replies degrade to a fallback segment
//! instead of aborting - the conversation must never lose the in-flight
//! message.

use std::sync::Arc;

use serde_json::json;

use crate::config::CompactionConfig;
use crate::models::{ConversationContext, MemorySegment, ParsedSummary, SummaryResult};
use crate::notify::{StatusNotifier, StatusStage};
use crate::request::SummarizationRequestBuilder;
use crate::store::{ContextStore, StoreError};
use crate::summarizer::Summarizer;

/// Messages per estimated new segment in the plan
const MESSAGES_PER_SEGMENT: u32 = 30;
/// Segment count above which the plan is tagged as consolidation work
const CONSOLIDATION_SEGMENT_FLOOR: usize = 8;
/// Message count above which the plan is tagged as summarization work
const SUMMARIZATION_MESSAGE_FLOOR: u32 = 80;
/// Fixed compressed size recorded on fallback segments
const FALLBACK_COMPRESSED_CHARS: usize = 500;

/// Pipeline stage, for logging and for the status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStage {
    Planning,
    Starting,
    Summarizing,
    Parsing,
    Commit,
    CommitFallback,
    Completed,
    Resume,
}

impl std::fmt::Display for CompactionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompactionStage::Planning => "planning",
            CompactionStage::Starting => "starting",
            CompactionStage::Summarizing => "summarizing",
            CompactionStage::Parsing => "parsing",
            CompactionStage::Commit => "commit",
            CompactionStage::CommitFallback => "commit_fallback",
            CompactionStage::Completed => "completed",
            CompactionStage::Resume => "resume",
        };
        write!(f, "{}", name)
    }
}

/// What kind of work this compaction mostly is, chosen by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionType {
    MemoryConsolidation,
    MessageSummarization,
    ContextOptimization,
}

impl std::fmt::Display for CompactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompactionType::MemoryConsolidation => "memory_consolidation",
            CompactionType::MessageSummarization => "message_summarization",
            CompactionType::ContextOptimization => "context_optimization",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct CompactionPlan {
    pub messages_to_keep: u32,
    pub messages_to_summarize: u32,
    pub estimated_new_segments: u32,
    pub target_reduction_percent: u8,
    pub compaction_type: CompactionType,
}

/// Summary of a finished compaction cycle, for observability.
#[derive(Debug, Clone)]
pub struct CompactionReport {
    pub reason: String,
    pub plan: CompactionPlan,
    pub segment_id: String,
    pub reduction_percentage: i64,
    pub segment_count: usize,
    /// Up to 5 preserved key topics
    pub key_topics: Vec<String>,
    /// True when the fallback path was taken
    pub degraded: bool,
}

/// The explicit continuation: the caller re-dispatches `resume_with` into
/// normal processing against the freshly reset context.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub resume_with: String,
    pub report: CompactionReport,
}

pub struct CompactionCoordinator {
    store: Arc<dyn ContextStore>,
    summarizer: Arc<dyn Summarizer>,
    notifier: Arc<dyn StatusNotifier>,
    builder: SummarizationRequestBuilder,
    config: CompactionConfig,
}

impl CompactionCoordinator {
    pub fn new(
        store: Arc<dyn ContextStore>,
        summarizer: Arc<dyn Summarizer>,
        notifier: Arc<dyn StatusNotifier>,
        config: CompactionConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            notifier,
            builder: SummarizationRequestBuilder::new(config.clone()),
            config,
        }
    }

    /// Compute the compaction plan from current stats.
    pub fn plan(context: &ConversationContext, config: &CompactionConfig) -> CompactionPlan {
        let keep = config.keep_recent_messages;
        let messages_to_keep = context.message_count.min(keep);
        let messages_to_summarize = context.message_count.saturating_sub(keep);
        let estimated_new_segments =
            messages_to_summarize.div_ceil(MESSAGES_PER_SEGMENT);

        let target_reduction_percent = if context.total_characters > 40_000 {
            70
        } else if context.total_characters > 30_000 {
            60
        } else {
            50
        };

        let compaction_type = if context.memory_segments.len() > CONSOLIDATION_SEGMENT_FLOOR {
            CompactionType::MemoryConsolidation
        } else if context.message_count > SUMMARIZATION_MESSAGE_FLOOR {
            CompactionType::MessageSummarization
        } else {
            CompactionType::ContextOptimization
        };

        CompactionPlan {
            messages_to_keep,
            messages_to_summarize,
            estimated_new_segments,
            target_reduction_percent,
            compaction_type,
        }
    }

    /// Run one full compaction cycle for a conversation key.
    ///
    /// Only store failures surface as errors; summarizer and parse failures
    /// degrade to a fallback segment and the cycle still completes.
    pub async fn run(
        &self,
        key: &str,
        original_message: &str,
        reason: &str,
    ) -> Result<CompactionOutcome, StoreError> {
        let context = self.store.get(key).await;
        log::info!(
            "[COMPACTION] {} for {}: {} messages, {} characters, {} segments ({})",
            CompactionStage::Planning,
            key,
            context.message_count,
            context.total_characters,
            context.memory_segments.len(),
            reason
        );
        let plan = Self::plan(&context, &self.config);

        self.notifier
            .notify(
                key,
                StatusStage::Starting,
                json!({
                    "reason": reason,
                    "messagesToKeep": plan.messages_to_keep,
                    "messagesToSummarize": plan.messages_to_summarize,
                    "estimatedNewSegments": plan.estimated_new_segments,
                    "targetReductionPercent": plan.target_reduction_percent,
                    "compactionType": plan.compaction_type.to_string(),
                }),
            )
            .await;

        let request = self.builder.build(&context);

        // Emit progress before the multi-second LLM round trip resolves
        self.notifier
            .notify(
                key,
                StatusStage::Summarizing,
                json!({ "timeoutMs": request.options.timeout.as_millis() as u64 }),
            )
            .await;
        log::info!("[COMPACTION] {} for {}", CompactionStage::Summarizing, key);

        let invocation = self
            .summarizer
            .invoke(&request.prompt, &request.options)
            .await;

        let (segment, degraded) = match invocation {
            Ok(raw) => match ParsedSummary::parse(&raw) {
                ParsedSummary::Parsed(result) => {
                    log::info!(
                        "[COMPACTION] {} succeeded for {} ({} chars raw)",
                        CompactionStage::Parsing,
                        key,
                        raw.chars().count()
                    );
                    (Self::segment_from_summary(result, &raw), false)
                }
                ParsedSummary::Fallback { reason } => {
                    log::warn!(
                        "[COMPACTION] {} failed for {} ({}), using fallback segment",
                        CompactionStage::Parsing,
                        key,
                        reason
                    );
                    (Self::fallback_segment(&context), true)
                }
            },
            Err(e) => {
                // Timeout and transport failures take the same non-fatal path
                log::warn!(
                    "[COMPACTION] Summarizer call failed for {} ({}), using fallback segment",
                    key,
                    e
                );
                (Self::fallback_segment(&context), true)
            }
        };

        let stage = if degraded {
            CompactionStage::CommitFallback
        } else {
            CompactionStage::Commit
        };
        let segment_id = segment.id.clone();
        let reduction_percentage = segment.reduction_percentage();
        let key_topics: Vec<String> = segment.key_topics.iter().take(5).cloned().collect();

        let updated = self.store.commit_compaction(key, segment).await?;
        log::info!(
            "[COMPACTION] {} for {}: segment {} ({}% reduction, {} segments stored)",
            stage,
            key,
            segment_id,
            reduction_percentage,
            updated.memory_segments.len()
        );

        self.notifier
            .notify(
                key,
                StatusStage::Completed,
                json!({
                    "reductionPercentage": reduction_percentage,
                    "segmentId": segment_id,
                    "segmentCount": updated.memory_segments.len(),
                    "keyTopics": key_topics,
                    "degraded": degraded,
                }),
            )
            .await;

        log::info!(
            "[COMPACTION] {} for {}: handing original message back to processing",
            CompactionStage::Resume,
            key
        );

        Ok(CompactionOutcome {
            resume_with: original_message.to_string(),
            report: CompactionReport {
                reason: reason.to_string(),
                plan,
                segment_id,
                reduction_percentage,
                segment_count: updated.memory_segments.len(),
                key_topics,
                degraded,
            },
        })
    }

    fn segment_from_summary(result: SummaryResult, raw: &str) -> MemorySegment {
        let mut segment = MemorySegment::with_summary(result.summary.unwrap_or_default());
        segment.key_topics = result.key_topics;
        segment.technical_details = result.technical_details;
        segment.ongoing_projects = result.ongoing_projects;
        segment.action_items = result.action_items;
        segment.important_references = result.important_references;
        segment.timeframe = result
            .timeframe
            .unwrap_or_else(|| "recent conversation".to_string());
        segment.original_character_count = result.character_count.unwrap_or(0);
        segment.compressed_character_count = raw.chars().count();
        segment
    }

    /// Fallback segment when the summarizer reply is unusable. Compaction is
    /// still considered completed; the tag is for observability only.
    fn fallback_segment(context: &ConversationContext) -> MemorySegment {
        let mut segment = MemorySegment::with_summary(format!(
            "Conversation summary ({} messages processed automatically)",
            context.message_count
        ));
        segment.key_topics = vec!["collaborative-work".to_string()];
        segment.timeframe = "recent conversation".to_string();
        segment.original_character_count = context.total_characters;
        segment.compressed_character_count = FALLBACK_COMPRESSED_CHARS;
        segment.error = Some("parsing_failed".to_string());
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelNotifier, StatusStage};
    use crate::store::InMemoryContextStore;
    use crate::summarizer::{MockSummarizer, SummarizerError};

    fn valid_reply() -> String {
        r#"{
            "summary": "Planned the search feature rollout",
            "keyTopics": ["search", "rollout", "indexing", "metrics", "alerts", "extra"],
            "technicalDetails": ["uses inverted index"],
            "ongoingProjects": [{"name": "search", "status": "active", "details": "phase 2"}],
            "actionItems": ["ship behind flag"],
            "importantReferences": ["DESIGN-142"],
            "timeframe": "this week",
            "characterCount": 20000
        }"#
        .to_string()
    }

    async fn seeded_store(messages: u32) -> Arc<InMemoryContextStore> {
        let store = Arc::new(InMemoryContextStore::default());
        for i in 0..messages {
            store
                .append_message("c1", &format!("message {}", i))
                .await
                .unwrap();
        }
        store
    }

    fn coordinator(
        store: Arc<InMemoryContextStore>,
        mock: MockSummarizer,
    ) -> (CompactionCoordinator, tokio::sync::mpsc::UnboundedReceiver<crate::notify::StatusEvent>)
    {
        let (notifier, rx) = ChannelNotifier::new();
        let coordinator = CompactionCoordinator::new(
            store,
            Arc::new(mock),
            Arc::new(notifier),
            CompactionConfig::default(),
        );
        (coordinator, rx)
    }

    #[test]
    fn test_plan_math() {
        let mut context = ConversationContext::new();
        context.message_count = 100;
        context.total_characters = 45_000;
        let plan = CompactionCoordinator::plan(&context, &CompactionConfig::default());
        assert_eq!(plan.messages_to_keep, 20);
        assert_eq!(plan.messages_to_summarize, 80);
        assert_eq!(plan.estimated_new_segments, 3); // ceil(80 / 30)
        assert_eq!(plan.target_reduction_percent, 70);
        assert_eq!(plan.compaction_type, CompactionType::MessageSummarization);
    }

    #[test]
    fn test_plan_tiers_and_type_priority() {
        let mut context = ConversationContext::new();
        context.message_count = 10;
        context.total_characters = 35_000;
        let config = CompactionConfig::default();

        let plan = CompactionCoordinator::plan(&context, &config);
        assert_eq!(plan.messages_to_keep, 10);
        assert_eq!(plan.messages_to_summarize, 0);
        assert_eq!(plan.estimated_new_segments, 0);
        assert_eq!(plan.target_reduction_percent, 60);
        assert_eq!(plan.compaction_type, CompactionType::ContextOptimization);

        // Segment overflow outranks the message floor
        for i in 0..9 {
            context
                .memory_segments
                .push(MemorySegment::with_summary(format!("s{}", i)));
        }
        context.message_count = 90;
        let plan = CompactionCoordinator::plan(&context, &config);
        assert_eq!(plan.compaction_type, CompactionType::MemoryConsolidation);
    }

    #[tokio::test]
    async fn test_successful_round_trip() {
        let store = seeded_store(90).await;
        let mock = MockSummarizer::new(vec![Ok(valid_reply())]);
        let (coordinator, mut rx) = coordinator(store.clone(), mock);

        let outcome = coordinator
            .run("c1", "the triggering message", "Message limit reached (100/100 messages)")
            .await
            .unwrap();

        assert_eq!(outcome.resume_with, "the triggering message");
        assert!(!outcome.report.degraded);
        assert_eq!(outcome.report.segment_count, 1);
        // Topics are capped at 5 in the report
        assert_eq!(outcome.report.key_topics.len(), 5);

        let context = store.get("c1").await;
        assert_eq!(context.message_count, 0);
        assert_eq!(context.total_characters, 0);
        let segment = &context.memory_segments[0];
        assert_eq!(segment.summary, "Planned the search feature rollout");
        assert_eq!(segment.original_character_count, 20_000);
        assert!(segment.error.is_none());

        let stages: Vec<StatusStage> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.stage)
        .collect();
        assert_eq!(
            stages,
            vec![StatusStage::Starting, StatusStage::Summarizing, StatusStage::Completed]
        );
    }

    #[tokio::test]
    async fn test_invalid_json_builds_fallback_segment() {
        // Summarizer replies with non-JSON text
        let store = seeded_store(50).await;
        let mock = MockSummarizer::new(vec![Ok("oops".to_string())]);
        let (coordinator, _rx) = coordinator(store.clone(), mock);

        let outcome = coordinator.run("c1", "hello", "reason").await.unwrap();
        assert!(outcome.report.degraded);

        let context = store.get("c1").await;
        let segment = &context.memory_segments[0];
        assert!(segment.summary.starts_with("Conversation summary ("));
        assert_eq!(segment.key_topics, vec!["collaborative-work"]);
        assert_eq!(segment.compressed_character_count, 500);
        assert_eq!(segment.error.as_deref(), Some("parsing_failed"));
    }

    #[tokio::test]
    async fn test_summarizer_failure_still_commits_and_resumes() {
        // Transport error: fallback committed, original message returned
        let store = seeded_store(30).await;
        let mock = MockSummarizer::new(vec![Err(SummarizerError::Transport(
            "connection refused".to_string(),
        ))]);
        let (coordinator, mut rx) = coordinator(store.clone(), mock);

        let outcome = coordinator.run("c1", "keep me", "reason").await.unwrap();
        assert_eq!(outcome.resume_with, "keep me");
        assert!(outcome.report.degraded);

        let context = store.get("c1").await;
        assert_eq!(context.message_count, 0);
        assert_eq!(context.memory_segments.len(), 1);
        assert_eq!(
            context.memory_segments[0].error.as_deref(),
            Some("parsing_failed")
        );

        // The completed notification still goes out, flagged as degraded
        let mut completed = None;
        while let Ok(event) = rx.try_recv() {
            if event.stage == StatusStage::Completed {
                completed = Some(event);
            }
        }
        let completed = completed.expect("completed notification");
        assert_eq!(completed.payload["degraded"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_timeout_follows_fallback_path() {
        let store = seeded_store(10).await;
        let mock = MockSummarizer::new(vec![Err(SummarizerError::Timeout)]);
        let (coordinator, _rx) = coordinator(store.clone(), mock);

        let outcome = coordinator.run("c1", "msg", "reason").await.unwrap();
        assert!(outcome.report.degraded);
        assert_eq!(store.get("c1").await.memory_segments.len(), 1);
    }
}

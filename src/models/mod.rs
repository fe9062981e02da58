//! Stored data shapes for conversation tracking and memory segments.
//!
//! Everything in here is serde-serializable because the context store
//! persists whole `ConversationContext` values as JSON blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One truncated entry in the rolling window of recent raw messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMessage {
    /// Message text, truncated to the configured preview length (200 chars)
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Character length of the original (untruncated) message
    pub length: usize,
}

/// Per-conversation accumulated state between compactions.
///
/// `message_count` and `total_characters` only grow between compactions and
/// are reset to 0 exactly when a compaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub message_count: u32,
    pub total_characters: usize,
    pub last_compaction_at: Option<DateTime<Utc>>,
    /// Last 10 messages, insertion order = chronological
    pub recent_messages: Vec<RecentMessage>,
    /// Chronological, oldest first
    pub memory_segments: Vec<MemorySegment>,
    pub created_at: DateTime<Utc>,
    /// Segments evicted by the storage cap (oldest-first trims)
    #[serde(default)]
    pub removed_segments: u32,
    /// Number of consolidation passes that have run for this conversation
    #[serde(default)]
    pub consolidations: u32,
}

impl ConversationContext {
    /// Zero-valued context for a conversation key seen for the first time.
    pub fn new() -> Self {
        Self {
            message_count: 0,
            total_characters: 0,
            last_compaction_at: None,
            recent_messages: Vec::new(),
            memory_segments: Vec::new(),
            created_at: Utc::now(),
            removed_segments: 0,
            consolidations: 0,
        }
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A project tracked across memory segments, keyed by `name` when merging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectEntry {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub details: String,
}

/// One stored, structured summary of a chunk of prior conversation.
///
/// Created by the coordinator on a successful summarization parse, or by
/// consolidation merging older segments. Never mutated field-by-field after
/// creation except through the explicit overwrite path in the memory manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySegment {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub summary: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub technical_details: Vec<String>,
    #[serde(default)]
    pub ongoing_projects: Vec<ProjectEntry>,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub important_references: Vec<String>,
    #[serde(default)]
    pub timeframe: String,
    #[serde(default)]
    pub original_character_count: usize,
    #[serde(default)]
    pub compressed_character_count: usize,
    /// "consolidated" when produced by merging older segments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidated_segment_ids: Option<Vec<String>>,
    /// "parsing_failed" when the summarizer reply could not be used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MemorySegment {
    /// Time-derived unique id: millisecond timestamp plus a short uuid suffix
    /// so two segments created in the same millisecond never collide.
    pub fn new_id(at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("seg_{}_{}", at.timestamp_millis(), &suffix[..8])
    }

    /// Bare segment with the given summary; everything else empty.
    pub fn with_summary(summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Self::new_id(now),
            created_at: now,
            updated_at: None,
            summary: summary.into(),
            key_topics: Vec::new(),
            technical_details: Vec::new(),
            ongoing_projects: Vec::new(),
            action_items: Vec::new(),
            important_references: Vec::new(),
            timeframe: String::new(),
            original_character_count: 0,
            compressed_character_count: 0,
            segment_type: None,
            consolidated_segment_ids: None,
            error: None,
        }
    }

    /// Rounded percentage reduction from original to compressed size.
    /// Returns 0 when the original count is unknown (zero).
    pub fn reduction_percentage(&self) -> i64 {
        if self.original_character_count == 0 {
            return 0;
        }
        let original = self.original_character_count as f64;
        let compressed = self.compressed_character_count as f64;
        ((original - compressed) / original * 100.0).round() as i64
    }
}

/// Strongly-typed view of the summarizer's JSON reply. All fields optional —
/// the summarizer is an LLM and its output is untrusted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryResult {
    pub summary: Option<String>,
    pub key_topics: Vec<String>,
    pub technical_details: Vec<String>,
    pub ongoing_projects: Vec<ProjectEntry>,
    pub action_items: Vec<String>,
    pub important_references: Vec<String>,
    pub timeframe: Option<String>,
    pub character_count: Option<usize>,
}

/// Outcome of parsing the summarizer's raw text output.
///
/// Parse failure is an expected condition, not an exception: the coordinator
/// builds a fallback segment from the `Fallback` variant and the conversation
/// resumes normally.
#[derive(Debug)]
pub enum ParsedSummary {
    Parsed(SummaryResult),
    Fallback { reason: String },
}

impl ParsedSummary {
    /// Strict JSON parse of the summarizer reply. A reply that is valid JSON
    /// but missing the `summary` field is treated as a parse failure too.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<SummaryResult>(raw.trim()) {
            Ok(result) => {
                let has_summary = result
                    .summary
                    .as_deref()
                    .map(|s| !s.trim().is_empty())
                    .unwrap_or(false);
                if has_summary {
                    ParsedSummary::Parsed(result)
                } else {
                    ParsedSummary::Fallback {
                        reason: "summary field missing or empty".to_string(),
                    }
                }
            }
            Err(e) => ParsedSummary::Fallback {
                reason: format!("invalid JSON: {}", e),
            },
        }
    }
}

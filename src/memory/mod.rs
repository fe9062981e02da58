//! Memory manager - CRUD and query layer over stored memory segments.
//!
//! This module provides:
//! - Segment storage with duplicate-id protection and a hard cap
//! - Relevance-scored retrieval (case-insensitive substring matching)
//! - Filtered search over terms, timeframes, and content flags
//! - Consolidation of old segments into one (see `consolidation`)
//! - Per-conversation memory statistics
//!
//! Matching is deliberately naive substring containment - fuzzy or semantic
//! search would change observable behavior.

pub mod consolidation;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::CompactionConfig;
use crate::models::MemorySegment;
use crate::store::{ContextStore, SegmentUpdate, StoreError};

/// Recency bonus window for relevance scoring
const RECENCY_BONUS_DAYS: i64 = 7;
/// Segments backfilled into short retrieval results
const RECENT_BACKFILL: usize = 3;
/// Topics reported by statistics
const TOP_TOPIC_COUNT: usize = 10;

#[derive(Debug)]
pub enum MemoryError {
    /// store() without overwrite hit an existing segment id
    DuplicateSegment { id: String },
    Store(StoreError),
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::DuplicateSegment { id } => {
                write!(f, "memory segment '{}' already exists (use overwrite)", id)
            }
            MemoryError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for MemoryError {}

impl From<StoreError> for MemoryError {
    fn from(e: StoreError) -> Self {
        MemoryError::Store(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Relevance,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Today,
    Week,
    Month,
}

impl Timeframe {
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::Today => now - Duration::days(1),
            Timeframe::Week => now - Duration::days(7),
            Timeframe::Month => now - Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub timeframe: Option<Timeframe>,
    pub has_projects: Option<bool>,
    pub has_action_items: Option<bool>,
}

/// Retrieval never fails on empty state; the message says what happened.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub segments: Vec<MemorySegment>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct StoreReceipt {
    pub segment_id: String,
    pub overwritten: bool,
    pub evicted: u32,
}

#[derive(Debug, Clone)]
pub struct ConsolidationOutcome {
    pub consolidated: bool,
    /// Segments absorbed into the merged one
    pub merged_count: usize,
    pub segment_id: Option<String>,
    pub reduction_percentage: i64,
}

#[derive(Debug, Clone)]
pub struct MemoryStatistics {
    pub segment_count: usize,
    pub total_summary_characters: usize,
    pub average_summary_characters: usize,
    /// Top topics by frequency across segments, most frequent first
    pub top_topics: Vec<(String, usize)>,
    pub consolidation_count: u32,
    pub removed_segments: u32,
    pub oldest_segment_age: Option<String>,
    pub newest_segment_age: Option<String>,
}

pub struct MemoryManager {
    store: Arc<dyn ContextStore>,
    config: CompactionConfig,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn ContextStore>, config: CompactionConfig) -> Self {
        Self { store, config }
    }

    /// Insert a segment, or replace one in place when `overwrite` is set.
    /// Inserts beyond the cap evict the oldest segments first.
    pub async fn store(
        &self,
        key: &str,
        segment: MemorySegment,
        overwrite: bool,
    ) -> Result<StoreReceipt, MemoryError> {
        let context = self.store.get(key).await;
        let mut segments = context.memory_segments;
        let segment_id = segment.id.clone();

        if let Some(position) = segments.iter().position(|s| s.id == segment.id) {
            if !overwrite {
                return Err(MemoryError::DuplicateSegment { id: segment_id });
            }
            let mut replacement = segment;
            replacement.updated_at = Some(Utc::now());
            segments[position] = replacement;
            self.store
                .update_segments(key, SegmentUpdate { segments, ..Default::default() })
                .await?;
            log::debug!("[MEMORY] Overwrote segment {} for {}", segment_id, key);
            return Ok(StoreReceipt {
                segment_id,
                overwritten: true,
                evicted: 0,
            });
        }

        segments.push(segment);
        let cap = self.config.memory_segment_cap;
        let evicted = segments.len().saturating_sub(cap);
        if evicted > 0 {
            segments.drain(..evicted);
            log::info!("[MEMORY] Evicted {} oldest segment(s) for {} (cap {})", evicted, key, cap);
        }
        self.store
            .update_segments(
                key,
                SegmentUpdate {
                    segments,
                    evicted: evicted as u32,
                    consolidations: 0,
                },
            )
            .await?;
        Ok(StoreReceipt {
            segment_id,
            overwritten: false,
            evicted: evicted as u32,
        })
    }

    /// Segments relevant to a query, relevance-scored, backfilled with the
    /// most recent segments when the match set is short.
    pub async fn retrieve_relevant(
        &self,
        key: &str,
        query: Option<&str>,
        limit: usize,
        include_recent: bool,
    ) -> RetrievalResult {
        let context = self.store.get(key).await;
        let segments = context.memory_segments;
        if segments.is_empty() {
            return RetrievalResult {
                segments: Vec::new(),
                message: "No stored memory for this conversation".to_string(),
            };
        }
        let total = segments.len();
        let now = Utc::now();

        let mut selected: Vec<MemorySegment> = match query.map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q_lower = q.to_lowercase();
                let mut scored: Vec<(i64, MemorySegment)> = segments
                    .iter()
                    .filter(|s| matches_query(s, &q_lower))
                    .map(|s| (relevance_score(s, &q_lower, now), s.clone()))
                    .collect();
                // Stable sort: ties keep stored (chronological) order
                scored.sort_by(|a, b| b.0.cmp(&a.0));
                scored.into_iter().map(|(_, s)| s).collect()
            }
            _ => segments.clone(),
        };

        if include_recent && selected.len() < limit {
            let start = segments.len().saturating_sub(RECENT_BACKFILL);
            for segment in &segments[start..] {
                if selected.len() >= limit {
                    break;
                }
                if !selected.iter().any(|s| s.id == segment.id) {
                    selected.push(segment.clone());
                }
            }
        }
        selected.truncate(limit);

        let message = format!("Retrieved {} of {} memory segments", selected.len(), total);
        RetrievalResult {
            segments: selected,
            message,
        }
    }

    /// OR-match any term across summary, topics, details, and projects, then
    /// filter and sort.
    pub async fn search(
        &self,
        key: &str,
        terms: &[String],
        filters: &SearchFilters,
        sort_by: SortBy,
    ) -> Vec<MemorySegment> {
        let context = self.store.get(key).await;
        let now = Utc::now();
        let terms_lower: Vec<String> = terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let mut matched: Vec<(i64, MemorySegment)> = context
            .memory_segments
            .iter()
            .filter(|segment| {
                terms_lower.is_empty()
                    || terms_lower.iter().any(|t| matches_query(segment, t))
            })
            .filter(|segment| {
                filters
                    .timeframe
                    .map(|tf| segment.created_at >= tf.cutoff(now))
                    .unwrap_or(true)
            })
            .filter(|segment| {
                filters
                    .has_projects
                    .map(|want| !segment.ongoing_projects.is_empty() == want)
                    .unwrap_or(true)
            })
            .filter(|segment| {
                filters
                    .has_action_items
                    .map(|want| !segment.action_items.is_empty() == want)
                    .unwrap_or(true)
            })
            .map(|segment| {
                let score = terms_lower
                    .iter()
                    .map(|t| relevance_score(segment, t, now))
                    .sum();
                (score, segment.clone())
            })
            .collect();

        match sort_by {
            SortBy::Relevance => matched.sort_by(|a, b| b.0.cmp(&a.0)),
            SortBy::Date => matched.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at)),
        }
        matched.into_iter().map(|(_, s)| s).collect()
    }

    /// Merge the oldest segments into one so at most `max_segments` remain.
    /// No-op when the count is already within bounds.
    pub async fn consolidate(
        &self,
        key: &str,
        max_segments: usize,
    ) -> Result<ConsolidationOutcome, MemoryError> {
        let context = self.store.get(key).await;
        let segments = context.memory_segments;

        if segments.len() <= max_segments {
            return Ok(ConsolidationOutcome {
                consolidated: false,
                merged_count: 0,
                segment_id: None,
                reduction_percentage: 0,
            });
        }

        // The merged segment takes one slot, so the result lands exactly on
        // max_segments
        let merge_count = segments.len() + 1 - max_segments;
        let (old, keep) = segments.split_at(merge_count);
        let merged = consolidation::merge_segments(old);
        let segment_id = merged.id.clone();
        let reduction_percentage = merged.reduction_percentage();

        let mut new_segments = Vec::with_capacity(keep.len() + 1);
        new_segments.push(merged);
        new_segments.extend_from_slice(keep);

        self.store
            .update_segments(
                key,
                SegmentUpdate {
                    segments: new_segments,
                    evicted: 0,
                    consolidations: 1,
                },
            )
            .await?;

        log::info!(
            "[MEMORY] Consolidated {} segments into {} for {} ({}% reduction)",
            merge_count,
            segment_id,
            key,
            reduction_percentage
        );

        Ok(ConsolidationOutcome {
            consolidated: true,
            merged_count: merge_count,
            segment_id: Some(segment_id),
            reduction_percentage,
        })
    }

    pub async fn get_statistics(&self, key: &str) -> MemoryStatistics {
        let context = self.store.get(key).await;
        let segments = &context.memory_segments;
        let now = Utc::now();

        let total_summary_characters: usize =
            segments.iter().map(|s| s.summary.chars().count()).sum();
        let average_summary_characters = if segments.is_empty() {
            0
        } else {
            total_summary_characters / segments.len()
        };

        // Frequency by lowercased topic, reporting first-seen spelling
        let mut counts: HashMap<String, (String, usize)> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for topic in segments.iter().flat_map(|s| s.key_topics.iter()) {
            let lower = topic.to_lowercase();
            match counts.get_mut(&lower) {
                Some(entry) => entry.1 += 1,
                None => {
                    order.push(lower.clone());
                    counts.insert(lower, (topic.clone(), 1));
                }
            }
        }
        let mut top_topics: Vec<(String, usize)> = order
            .into_iter()
            .filter_map(|lower| counts.remove(&lower))
            .collect();
        top_topics.sort_by(|a, b| b.1.cmp(&a.1));
        top_topics.truncate(TOP_TOPIC_COUNT);

        MemoryStatistics {
            segment_count: segments.len(),
            total_summary_characters,
            average_summary_characters,
            top_topics,
            consolidation_count: context.consolidations,
            removed_segments: context.removed_segments,
            oldest_segment_age: segments.first().map(|s| humanize_age(s.created_at, now)),
            newest_segment_age: segments.last().map(|s| humanize_age(s.created_at, now)),
        }
    }
}

/// Case-insensitive substring match across summary, topics, details, and
/// project fields.
fn matches_query(segment: &MemorySegment, query_lower: &str) -> bool {
    segment.summary.to_lowercase().contains(query_lower)
        || segment
            .key_topics
            .iter()
            .any(|t| t.to_lowercase().contains(query_lower))
        || segment
            .technical_details
            .iter()
            .any(|d| d.to_lowercase().contains(query_lower))
        || segment.ongoing_projects.iter().any(|p| {
            p.name.to_lowercase().contains(query_lower)
                || p.status.to_lowercase().contains(query_lower)
                || p.details.to_lowercase().contains(query_lower)
        })
}

/// Relevance: summary match +10, each topic match +5, each detail match +3,
/// plus +2 for segments younger than a week.
fn relevance_score(segment: &MemorySegment, query_lower: &str, now: DateTime<Utc>) -> i64 {
    let mut score = 0;
    if segment.summary.to_lowercase().contains(query_lower) {
        score += 10;
    }
    score += segment
        .key_topics
        .iter()
        .filter(|t| t.to_lowercase().contains(query_lower))
        .count() as i64
        * 5;
    score += segment
        .technical_details
        .iter()
        .filter(|d| d.to_lowercase().contains(query_lower))
        .count() as i64
        * 3;
    if now.signed_duration_since(segment.created_at) < Duration::days(RECENCY_BONUS_DAYS) {
        score += 2;
    }
    score
}

/// "just now", "N minutes ago", "N hours ago", "N days ago"
fn humanize_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{} minute{} ago", minutes, if minutes == 1 { "" } else { "s" });
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" });
    }
    let days = elapsed.num_days();
    format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
}

//! Merging old memory segments into one consolidated segment.

use std::collections::HashSet;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{MemorySegment, ProjectEntry};

/// Sentences kept in the merged summary
const MAX_SUMMARY_SENTENCES: usize = 10;
/// Key topics kept after union + dedup
const MAX_KEY_TOPICS: usize = 20;
/// Technical details kept after union + dedup
const MAX_TECHNICAL_DETAILS: usize = 15;

/// Sentences worth keeping mention concrete work having happened.
static ACTION_VERBS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(implemented|created|discussed|decided|fixed|added|resolved|completed)\b")
        .expect("action verb regex")
});

static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s+|[.!?]+$").expect("sentence boundary regex"));

/// Merge the given segments (oldest first) into one consolidated segment.
pub(crate) fn merge_segments(old: &[MemorySegment]) -> MemorySegment {
    let now = Utc::now();
    let ids: Vec<String> = old.iter().map(|s| s.id.clone()).collect();

    let summary = merged_summary(old);
    let key_topics = dedup_capped(
        old.iter().flat_map(|s| s.key_topics.iter()),
        MAX_KEY_TOPICS,
    );
    let technical_details = dedup_capped(
        old.iter().flat_map(|s| s.technical_details.iter()),
        MAX_TECHNICAL_DETAILS,
    );
    let action_items = dedup_capped(old.iter().flat_map(|s| s.action_items.iter()), usize::MAX);
    let important_references = dedup_capped(
        old.iter().flat_map(|s| s.important_references.iter()),
        usize::MAX,
    );
    let ongoing_projects = merge_projects(old);

    let timeframe = match (old.first(), old.last()) {
        (Some(first), Some(last)) => format!(
            "{} to {}",
            first.created_at.format("%Y-%m-%d"),
            last.created_at.format("%Y-%m-%d")
        ),
        _ => String::new(),
    };

    // Reduction is measured against the space the inputs occupied
    let original_character_count: usize =
        old.iter().map(|s| s.compressed_character_count).sum();
    let compressed_character_count = summary.chars().count()
        + key_topics.iter().map(|t| t.chars().count()).sum::<usize>()
        + technical_details.iter().map(|d| d.chars().count()).sum::<usize>();

    MemorySegment {
        id: MemorySegment::new_id(now),
        created_at: now,
        updated_at: None,
        summary,
        key_topics,
        technical_details,
        ongoing_projects,
        action_items,
        important_references,
        timeframe,
        original_character_count,
        compressed_character_count,
        segment_type: Some("consolidated".to_string()),
        consolidated_segment_ids: Some(ids),
        error: None,
    }
}

/// Pull action-verb sentences out of the concatenated summaries, deduplicated
/// and capped.
fn merged_summary(old: &[MemorySegment]) -> String {
    let mut seen: HashSet<String> = HashSet::new();
    let mut sentences: Vec<String> = Vec::new();

    'outer: for segment in old {
        for sentence in SENTENCE_BOUNDARY.split(&segment.summary) {
            let sentence = sentence.trim();
            if sentence.is_empty() || !ACTION_VERBS.is_match(sentence) {
                continue;
            }
            if seen.insert(sentence.to_lowercase()) {
                sentences.push(sentence.to_string());
                if sentences.len() >= MAX_SUMMARY_SENTENCES {
                    break 'outer;
                }
            }
        }
    }

    if sentences.is_empty() {
        return format!("Consolidated context from {} earlier segments", old.len());
    }
    format!("{}.", sentences.join(". "))
}

/// Case-insensitive dedup preserving first-seen spelling and order.
fn dedup_capped<'a>(items: impl Iterator<Item = &'a String>, cap: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
            if out.len() >= cap {
                break;
            }
        }
    }
    out
}

/// Name-keyed project merge: a later entry's non-empty status/details
/// overwrite earlier ones; first-seen order is kept.
fn merge_projects(old: &[MemorySegment]) -> Vec<ProjectEntry> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: std::collections::HashMap<String, ProjectEntry> =
        std::collections::HashMap::new();

    for segment in old {
        for project in &segment.ongoing_projects {
            let key = project.name.to_lowercase();
            match merged.get_mut(&key) {
                None => {
                    order.push(key.clone());
                    merged.insert(key, project.clone());
                }
                Some(existing) => {
                    if !project.status.trim().is_empty() {
                        existing.status = project.status.clone();
                    }
                    if !project.details.trim().is_empty() {
                        existing.details = project.details.clone();
                    }
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(summary: &str) -> MemorySegment {
        MemorySegment::with_summary(summary)
    }

    #[test]
    fn test_action_sentences_extracted_and_deduped() {
        let mut a = segment("We implemented the parser. The weather was nice.");
        a.compressed_character_count = 100;
        let mut b = segment("We implemented the parser. Then decided to ship Friday.");
        b.compressed_character_count = 100;

        let merged = merge_segments(&[a, b]);
        assert!(merged.summary.contains("implemented the parser"));
        assert!(merged.summary.contains("decided to ship Friday"));
        assert!(!merged.summary.contains("weather"));
        // The duplicate sentence appears once
        assert_eq!(merged.summary.matches("implemented the parser").count(), 1);
    }

    #[test]
    fn test_no_action_sentences_gets_generic_summary() {
        let merged = merge_segments(&[segment("Chit chat."), segment("More chit chat.")]);
        assert_eq!(merged.summary, "Consolidated context from 2 earlier segments");
    }

    #[test]
    fn test_topics_unioned_capped() {
        let mut a = segment("s1");
        a.key_topics = (0..15).map(|i| format!("topic-{}", i)).collect();
        let mut b = segment("s2");
        b.key_topics = (10..30).map(|i| format!("topic-{}", i)).collect();
        b.key_topics.push("TOPIC-0".to_string()); // dup differing only in case

        let merged = merge_segments(&[a, b]);
        assert_eq!(merged.key_topics.len(), 20);
        assert_eq!(merged.key_topics[0], "topic-0");
        assert_eq!(
            merged
                .key_topics
                .iter()
                .filter(|t| t.to_lowercase() == "topic-0")
                .count(),
            1
        );
    }

    #[test]
    fn test_project_merge_latest_non_empty_wins() {
        let mut a = segment("s1");
        a.ongoing_projects = vec![ProjectEntry {
            name: "search".to_string(),
            status: "planning".to_string(),
            details: "initial scoping".to_string(),
        }];
        let mut b = segment("s2");
        b.ongoing_projects = vec![ProjectEntry {
            name: "search".to_string(),
            status: "active".to_string(),
            details: "".to_string(),
        }];

        let merged = merge_segments(&[a, b]);
        assert_eq!(merged.ongoing_projects.len(), 1);
        let project = &merged.ongoing_projects[0];
        assert_eq!(project.status, "active"); // overwritten
        assert_eq!(project.details, "initial scoping"); // empty later value kept earlier one
    }

    #[test]
    fn test_consolidated_metadata() {
        let a = segment("Implemented a thing.");
        let b = segment("Created another thing.");
        let ids = vec![a.id.clone(), b.id.clone()];

        let merged = merge_segments(&[a, b]);
        assert_eq!(merged.segment_type.as_deref(), Some("consolidated"));
        assert_eq!(merged.consolidated_segment_ids.as_ref().unwrap(), &ids);
    }
}

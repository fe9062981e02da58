//! Builds the summarization instruction sent to the external summarizer.
//!
//! The sample sizes are deliberately small (last 3 segments, last 10 raw
//! messages, 100-char previews) so the summarization prompt itself can never
//! re-trigger the overflow it is meant to fix.

use crate::config::CompactionConfig;
use crate::models::ConversationContext;
use crate::summarizer::SummarizeOptions;

/// Existing segments included in the prompt
const SEGMENT_SAMPLE: usize = 3;
/// Raw recent messages included in the prompt
const MESSAGE_SAMPLE: usize = 10;
/// Preview length per sampled message
const MESSAGE_SAMPLE_TRUNCATE: usize = 100;

/// A ready-to-send summarization call: prompt plus single-turn budget.
#[derive(Debug, Clone)]
pub struct SummarizationRequest {
    pub prompt: String,
    pub options: SummarizeOptions,
}

pub struct SummarizationRequestBuilder {
    config: CompactionConfig,
}

impl SummarizationRequestBuilder {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, context: &ConversationContext) -> SummarizationRequest {
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "The conversation has accumulated {} messages ({} characters) since the last compaction.\n\
             Compress this context into a structured summary.\n",
            context.message_count, context.total_characters
        ));

        let segments = &context.memory_segments;
        if !segments.is_empty() {
            prompt.push_str("\nExisting memory segments (most recent):\n");
            let start = segments.len().saturating_sub(SEGMENT_SAMPLE);
            for segment in &segments[start..] {
                prompt.push_str(&format!(
                    "- [{}] {}\n",
                    segment.created_at.format("%Y-%m-%d"),
                    segment.summary
                ));
            }
        }

        if !context.recent_messages.is_empty() {
            prompt.push_str("\nRecent messages:\n");
            let start = context.recent_messages.len().saturating_sub(MESSAGE_SAMPLE);
            for message in &context.recent_messages[start..] {
                let preview: String =
                    message.text.chars().take(MESSAGE_SAMPLE_TRUNCATE).collect();
                prompt.push_str(&format!("- {}\n", preview));
            }
        }

        prompt.push_str(
            "\nRespond with strict JSON only, using exactly these fields:\n\
             {\n\
               \"summary\": \"narrative summary of the conversation\",\n\
               \"keyTopics\": [\"topic\", ...],\n\
               \"technicalDetails\": [\"detail\", ...],\n\
               \"ongoingProjects\": [{\"name\": \"\", \"status\": \"\", \"details\": \"\"}],\n\
               \"actionItems\": [\"item\", ...],\n\
               \"importantReferences\": [\"reference\", ...],\n\
               \"timeframe\": \"human-readable timeframe\",\n\
               \"characterCount\": <characters of conversation covered>\n\
             }\n\
             No prose outside the JSON object.",
        );

        SummarizationRequest {
            prompt,
            options: SummarizeOptions {
                max_turns: 1,
                timeout: self.config.summarizer_timeout,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemorySegment;
    use crate::store::{self};

    fn builder() -> SummarizationRequestBuilder {
        SummarizationRequestBuilder::new(CompactionConfig::default())
    }

    #[test]
    fn test_prompt_counts_and_json_fields() {
        let mut context = ConversationContext::new();
        context.message_count = 42;
        context.total_characters = 9001;

        let request = builder().build(&context);
        assert!(request.prompt.contains("42 messages"));
        assert!(request.prompt.contains("9001 characters"));
        for field in [
            "summary", "keyTopics", "technicalDetails", "ongoingProjects",
            "actionItems", "importantReferences", "timeframe", "characterCount",
        ] {
            assert!(request.prompt.contains(field), "missing field {}", field);
        }
        assert_eq!(request.options.max_turns, 1);
    }

    #[test]
    fn test_samples_are_bounded() {
        let mut context = ConversationContext::new();
        for i in 0..6 {
            context
                .memory_segments
                .push(MemorySegment::with_summary(format!("old segment {}", i)));
        }
        let long = "y".repeat(300);
        for _ in 0..15 {
            store::apply_append(&mut context, &long);
        }

        let request = builder().build(&context);
        // Only the 3 newest segments appear
        assert!(!request.prompt.contains("old segment 2"));
        assert!(request.prompt.contains("old segment 3"));
        assert!(request.prompt.contains("old segment 5"));
        // Message previews are cut to 100 chars
        assert!(!request.prompt.contains(&"y".repeat(101)));
        assert!(request.prompt.contains(&"y".repeat(100)));
    }

    #[test]
    fn test_empty_context_still_builds() {
        let request = builder().build(&ConversationContext::new());
        assert!(request.prompt.contains("0 messages"));
        assert!(!request.prompt.contains("Existing memory segments"));
        assert!(!request.prompt.contains("Recent messages"));
    }
}

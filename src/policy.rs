//! Pure compaction trigger decision.
//!
//! Given current per-conversation stats and the length of an incoming
//! message, decide whether the conversation should be compacted before the
//! message is processed, and produce a human-readable reason for the status
//! channel. No I/O happens here.

use chrono::Utc;

use crate::config::CompactionConfig;
use crate::models::ConversationContext;

pub struct CompactionPolicy {
    config: CompactionConfig,
}

impl CompactionPolicy {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// True when any trigger fires:
    /// 1. accumulated message count has reached the limit,
    /// 2. accumulated characters plus the incoming message reach the limit,
    /// 3. the live segment window has overflowed.
    ///
    /// A recent compaction suppresses triggers 1 and 2 while the message
    /// count is still below the cooldown ratio of the limit. Trigger 3 is
    /// never suppressed: segment overflow is always actionable.
    pub fn should_compact(&self, context: &ConversationContext, incoming_len: usize) -> bool {
        let segments_overflow = context.memory_segments.len() > self.config.max_segments;
        if segments_overflow {
            return true;
        }

        let message_limit = context.message_count >= self.config.max_messages;
        let character_limit =
            context.total_characters + incoming_len >= self.config.max_characters;

        if (message_limit || character_limit) && self.in_cooldown(context) {
            return false;
        }

        message_limit || character_limit
    }

    /// A compaction happened within the minimum interval and the message
    /// count is still below the cooldown ratio of the limit.
    fn in_cooldown(&self, context: &ConversationContext) -> bool {
        let Some(last) = context.last_compaction_at else {
            return false;
        };
        let elapsed = Utc::now().signed_duration_since(last);
        let within_interval = elapsed
            .to_std()
            .map(|e| e < self.config.min_compaction_interval)
            .unwrap_or(true); // negative elapsed means a clock skew; stay conservative

        let ratio_floor =
            (self.config.cooldown_message_ratio * self.config.max_messages as f64) as u32;
        within_interval && context.message_count < ratio_floor
    }

    /// Specific human-readable cause for the status channel.
    pub fn reason(&self, context: &ConversationContext) -> String {
        if context.message_count >= self.config.max_messages {
            return format!(
                "Message limit reached ({}/{} messages)",
                context.message_count, self.config.max_messages
            );
        }
        if context.total_characters >= self.config.max_characters {
            return format!(
                "Character limit reached ({}/{} characters)",
                context.total_characters, self.config.max_characters
            );
        }
        if context.memory_segments.len() > self.config.max_segments {
            return format!(
                "Memory segment limit reached ({} segments)",
                context.memory_segments.len()
            );
        }
        "Context optimization needed".to_string()
    }
}

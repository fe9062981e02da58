use std::env;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const MAX_MESSAGES: &str = "COMPACTION_MAX_MESSAGES";
    pub const MAX_CHARACTERS: &str = "COMPACTION_MAX_CHARACTERS";
    pub const MAX_SEGMENTS: &str = "COMPACTION_MAX_SEGMENTS";
    pub const MIN_INTERVAL_SECS: &str = "COMPACTION_MIN_INTERVAL_SECS";
    pub const COOLDOWN_MESSAGE_RATIO: &str = "COMPACTION_COOLDOWN_MESSAGE_RATIO";
    pub const KEEP_RECENT_MESSAGES: &str = "COMPACTION_KEEP_RECENT_MESSAGES";
    pub const SUMMARIZER_TIMEOUT_SECS: &str = "SUMMARIZER_TIMEOUT_SECS";
    pub const SUMMARIZER_ENDPOINT: &str = "SUMMARIZER_ENDPOINT";
    pub const SUMMARIZER_API_KEY: &str = "SUMMARIZER_API_KEY";
    pub const SUMMARIZER_MODEL: &str = "SUMMARIZER_MODEL";
    pub const MEMORY_SEGMENT_CAP: &str = "MEMORY_SEGMENT_CAP";
}

/// Default values
pub mod defaults {
    /// Compact after this many accumulated messages
    pub const MAX_MESSAGES: u32 = 100;
    /// Compact after this many accumulated characters
    pub const MAX_CHARACTERS: usize = 50_000;
    /// Live segment window kept on the conversation context
    pub const MAX_SEGMENTS: usize = 10;
    /// Cooldown between compactions (30 minutes)
    pub const MIN_INTERVAL_SECS: u64 = 30 * 60;
    /// Cooldown stops suppressing once message_count reaches this fraction
    /// of MAX_MESSAGES
    pub const COOLDOWN_MESSAGE_RATIO: f64 = 0.8;
    /// Messages left untouched by a compaction plan
    pub const KEEP_RECENT_MESSAGES: u32 = 20;
    /// Single-turn budget for the summarization round trip
    pub const SUMMARIZER_TIMEOUT_SECS: u64 = 30;
    /// Hard cap enforced by the memory manager's store path
    pub const MEMORY_SEGMENT_CAP: usize = 15;
    /// Rolling window of raw recent messages
    pub const RECENT_MESSAGE_WINDOW: usize = 10;
    /// Stored preview length for each recent message
    pub const RECENT_MESSAGE_TRUNCATE: usize = 200;
}

/// Tunables for the compaction policy, coordinator, and memory manager.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Message-count trigger threshold
    pub max_messages: u32,
    /// Character-volume trigger threshold
    pub max_characters: usize,
    /// Segment-count trigger threshold (trigger fires strictly above this)
    pub max_segments: usize,
    /// Minimum interval between compactions before cooldown suppression ends
    pub min_compaction_interval: Duration,
    /// Fraction of max_messages above which cooldown no longer suppresses
    pub cooldown_message_ratio: f64,
    /// Messages the compaction plan keeps verbatim
    pub keep_recent_messages: u32,
    /// Timeout for the summarizer round trip
    pub summarizer_timeout: Duration,
    /// Memory manager segment cap (evicts oldest beyond this)
    pub memory_segment_cap: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_messages: defaults::MAX_MESSAGES,
            max_characters: defaults::MAX_CHARACTERS,
            max_segments: defaults::MAX_SEGMENTS,
            min_compaction_interval: Duration::from_secs(defaults::MIN_INTERVAL_SECS),
            cooldown_message_ratio: defaults::COOLDOWN_MESSAGE_RATIO,
            keep_recent_messages: defaults::KEEP_RECENT_MESSAGES,
            summarizer_timeout: Duration::from_secs(defaults::SUMMARIZER_TIMEOUT_SECS),
            memory_segment_cap: defaults::MEMORY_SEGMENT_CAP,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl CompactionConfig {
    pub fn from_env() -> Self {
        Self {
            max_messages: env_parse(env_vars::MAX_MESSAGES, defaults::MAX_MESSAGES),
            max_characters: env_parse(env_vars::MAX_CHARACTERS, defaults::MAX_CHARACTERS),
            max_segments: env_parse(env_vars::MAX_SEGMENTS, defaults::MAX_SEGMENTS),
            min_compaction_interval: Duration::from_secs(env_parse(
                env_vars::MIN_INTERVAL_SECS,
                defaults::MIN_INTERVAL_SECS,
            )),
            cooldown_message_ratio: env_parse(
                env_vars::COOLDOWN_MESSAGE_RATIO,
                defaults::COOLDOWN_MESSAGE_RATIO,
            ),
            keep_recent_messages: env_parse(
                env_vars::KEEP_RECENT_MESSAGES,
                defaults::KEEP_RECENT_MESSAGES,
            ),
            summarizer_timeout: Duration::from_secs(env_parse(
                env_vars::SUMMARIZER_TIMEOUT_SECS,
                defaults::SUMMARIZER_TIMEOUT_SECS,
            )),
            memory_segment_cap: env_parse(
                env_vars::MEMORY_SEGMENT_CAP,
                defaults::MEMORY_SEGMENT_CAP,
            ),
        }
    }

    pub fn with_max_messages(mut self, count: u32) -> Self {
        self.max_messages = count;
        self
    }

    pub fn with_max_characters(mut self, count: usize) -> Self {
        self.max_characters = count;
        self
    }

    pub fn with_max_segments(mut self, count: usize) -> Self {
        self.max_segments = count;
        self
    }

    pub fn with_min_compaction_interval(mut self, interval: Duration) -> Self {
        self.min_compaction_interval = interval;
        self
    }

    pub fn with_cooldown_message_ratio(mut self, ratio: f64) -> Self {
        self.cooldown_message_ratio = ratio;
        self
    }

    pub fn with_keep_recent_messages(mut self, count: u32) -> Self {
        self.keep_recent_messages = count;
        self
    }

    pub fn with_summarizer_timeout(mut self, timeout: Duration) -> Self {
        self.summarizer_timeout = timeout;
        self
    }

    pub fn with_memory_segment_cap(mut self, cap: usize) -> Self {
        self.memory_segment_cap = cap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompactionConfig::default();
        assert_eq!(config.max_messages, 100);
        assert_eq!(config.max_characters, 50_000);
        assert_eq!(config.max_segments, 10);
        assert_eq!(config.min_compaction_interval, Duration::from_secs(1800));
        assert_eq!(config.memory_segment_cap, 15);
    }

    #[test]
    fn test_builder_overrides() {
        let config = CompactionConfig::default()
            .with_max_messages(10)
            .with_cooldown_message_ratio(0.5);
        assert_eq!(config.max_messages, 10);
        assert_eq!(config.cooldown_message_ratio, 0.5);
    }
}

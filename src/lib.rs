//! Bounded conversation context with automatic compaction.
//!
//! Chat conversations accumulate messages without limit; the model context
//! feeding an AI backend cannot. This crate keeps a per-conversation cache of
//! recent activity, watches it against configurable thresholds, and when a
//! threshold is crossed summarizes the backlog into a compact memory segment
//! through an external summarizer, resets the live counters, and hands the
//! triggering message back for normal processing.
//!
//! The usual entry point is [`monitor::ContextMonitor::handle_message`].
//! Storage ([`store::ContextStore`]), summarization
//! ([`summarizer::Summarizer`]), and progress reporting
//! ([`notify::StatusNotifier`]) are trait seams; in-memory, SQLite, OpenAI,
//! and logging implementations ship in the crate.

pub mod config;
pub mod coordinator;
pub mod memory;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod policy;
pub mod request;
pub mod store;
pub mod summarizer;

pub use config::CompactionConfig;
pub use coordinator::{CompactionCoordinator, CompactionOutcome, CompactionPlan, CompactionReport};
pub use memory::{MemoryManager, MemoryStatistics, RetrievalResult, SearchFilters, SortBy};
pub use models::{ConversationContext, MemorySegment, RecentMessage};
pub use monitor::{ContextMonitor, MessageDisposition};
pub use notify::{ChannelNotifier, LogNotifier, StatusNotifier, StatusStage};
pub use policy::CompactionPolicy;
pub use request::{SummarizationRequest, SummarizationRequestBuilder};
pub use store::{ContextStore, InMemoryContextStore, StoreError};
pub use summarizer::{Summarizer, SummarizerError};

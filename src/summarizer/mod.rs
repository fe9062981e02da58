//! Summarizer seam - the external LLM call that turns raw conversation
//! context into structured JSON summary text.
//!
//! The coordinator only sees the `Summarizer` trait. `MockSummarizer` serves
//! tests and the demo binary from a queue of canned replies; `OpenAiSummarizer`
//! talks to any OpenAI-compatible chat-completions endpoint.

pub mod openai;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

pub use openai::OpenAiSummarizer;

#[derive(Debug, Clone)]
pub enum SummarizerError {
    /// The call did not resolve within the configured timeout
    Timeout,
    /// Network or API failure
    Transport(String),
}

impl std::fmt::Display for SummarizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummarizerError::Timeout => write!(f, "summarizer call timed out"),
            SummarizerError::Transport(msg) => write!(f, "summarizer transport error: {}", msg),
        }
    }
}

impl std::error::Error for SummarizerError {}

/// Call parameters for one summarization round trip. Compaction is internal
/// maintenance, so the budget is always a single turn with a hard timeout.
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub max_turns: u32,
    pub timeout: Duration,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            max_turns: 1,
            timeout: Duration::from_secs(crate::config::defaults::SUMMARIZER_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Prompt in, raw reply text out. Errors are recoverable by design: the
    /// coordinator degrades to a fallback segment rather than surfacing them.
    async fn invoke(
        &self,
        prompt: &str,
        options: &SummarizeOptions,
    ) -> Result<String, SummarizerError>;
}

/// Mock summarizer returning pre-configured replies from a queue. Also keeps
/// the prompts it was invoked with, so tests can assert on request content.
#[derive(Clone, Default)]
pub struct MockSummarizer {
    replies: Arc<Mutex<VecDeque<Result<String, SummarizerError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockSummarizer {
    pub fn new(replies: Vec<Result<String, SummarizerError>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue one more reply.
    pub fn push(&self, reply: Result<String, SummarizerError>) {
        self.replies.lock().push_back(reply);
    }

    /// Prompts captured so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn invoke(
        &self,
        prompt: &str,
        _options: &SummarizeOptions,
    ) -> Result<String, SummarizerError> {
        self.prompts.lock().push(prompt.to_string());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("(mock exhausted)".to_string()))
    }
}

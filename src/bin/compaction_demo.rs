//! Scripted walkthrough of a compaction cycle.
//!
//! Feeds a conversation through the monitor with a small message limit and a
//! canned summarizer, so the whole trigger -> summarize -> commit -> resume
//! flow can be watched in the logs. Run with `RUST_LOG=info`.

use std::sync::Arc;

use context_compactor::summarizer::MockSummarizer;
use context_compactor::{
    CompactionConfig, ContextMonitor, InMemoryContextStore, LogNotifier, MessageDisposition,
};

const KEY: &str = "demo-conversation";

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = CompactionConfig::default().with_max_messages(12);
    let summarizer = MockSummarizer::new(vec![Ok(r#"{
        "summary": "Planned and built the ingestion pipeline, then debugged the retry storm",
        "keyTopics": ["ingestion", "retries", "backpressure"],
        "technicalDetails": ["exponential backoff capped at 60s"],
        "ongoingProjects": [{"name": "ingestion", "status": "active", "details": "phase 2"}],
        "actionItems": ["add a dead letter queue"],
        "importantReferences": ["INC-2041"],
        "timeframe": "this afternoon",
        "characterCount": 900
    }"#
    .to_string())]);

    let monitor = ContextMonitor::new(
        Arc::new(InMemoryContextStore::default()),
        Arc::new(summarizer),
        Arc::new(LogNotifier),
        config,
    );

    let script: Vec<String> = (1..=13)
        .map(|i| format!("Message {} about the ingestion pipeline and its retry behavior", i))
        .collect();

    for message in &script {
        match monitor.handle_message(KEY, message).await {
            Ok(MessageDisposition::Proceed { context }) => {
                println!(
                    "recorded: {:<70} ({} messages, {} chars)",
                    message, context.message_count, context.total_characters
                );
            }
            Ok(MessageDisposition::Compacted { outcome }) => {
                let report = &outcome.report;
                println!();
                println!("--- compaction fired ---");
                println!("reason:    {}", report.reason);
                println!("segment:   {} ({}% reduction)", report.segment_id, report.reduction_percentage);
                println!("topics:    {}", report.key_topics.join(", "));
                println!("degraded:  {}", report.degraded);
                println!("------------------------");
                println!();

                // The triggering message was held back; re-dispatch it now
                match monitor.handle_message(KEY, &outcome.resume_with).await {
                    Ok(MessageDisposition::Proceed { context }) => {
                        println!(
                            "resumed:  {:<70} ({} messages)",
                            outcome.resume_with, context.message_count
                        );
                    }
                    other => println!("unexpected resume result: {:?}", other.err()),
                }
            }
            Err(e) => {
                eprintln!("store error: {}", e);
                return;
            }
        }
    }

    if let Some(preamble) = monitor.memory_context(KEY, Some("ingestion")).await {
        println!();
        println!("{}", preamble);
    }

    let stats = monitor.memory().get_statistics(KEY).await;
    println!(
        "memory: {} segment(s), {} summary chars, top topics {:?}",
        stats.segment_count, stats.total_summary_characters, stats.top_topics
    );
}

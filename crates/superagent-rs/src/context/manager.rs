//! The compression core: threshold checks and conversation compression.
//!
//! [`ContextManager`] holds configuration only. Every call works on the
//! slice it is given and returns freshly built output; nothing about a
//! conversation is remembered between calls.

use super::importance::ImportanceClassifier;
use super::summarizer::{SUMMARY_PREFIX, Summarizer, fallback_summary};
use super::tokens;
use crate::config::CompressionConfig;
use crate::{Message, generate_message_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Statistics for one completed compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionInfo {
    pub original_token_count: usize,
    pub new_token_count: usize,
    /// `new / original`. Not clamped: a tiny input can grow.
    pub compression_ratio: f64,
    pub original_message_count: usize,
    pub new_message_count: usize,
    /// Messages carried over verbatim.
    pub preserved_message_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl CompressionInfo {
    /// Info for an empty conversation: all zero, ratio 1.
    pub fn empty() -> Self {
        Self {
            original_token_count: 0,
            new_token_count: 0,
            compression_ratio: 1.0,
            original_message_count: 0,
            new_message_count: 0,
            preserved_message_count: 0,
            timestamp: Utc::now(),
        }
    }

    /// Tokens removed (0 when the output grew).
    pub fn tokens_saved(&self) -> usize {
        self.original_token_count.saturating_sub(self.new_token_count)
    }

    pub fn to_log_string(&self) -> String {
        format!(
            "{} -> {} messages, ~{} -> ~{} tokens (ratio {:.2}, {} preserved)",
            self.original_message_count,
            self.new_message_count,
            self.original_token_count,
            self.new_token_count,
            self.compression_ratio,
            self.preserved_message_count,
        )
    }
}

/// Output of [`ContextManager::compress_conversation`].
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub compressed_messages: Vec<Message>,
    pub compression_info: CompressionInfo,
}

/// Point-in-time view of how full the context is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub estimated_tokens: usize,
    pub message_count: usize,
    pub context_limit: usize,
    pub threshold: usize,
    /// Fraction of `context_limit` in use (0.0 to 1.0+).
    pub usage_pct: f64,
    pub should_compress: bool,
}

impl ContextStats {
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens in {} messages ({:.0}% of {}, compress at {}){}",
            self.estimated_tokens,
            self.message_count,
            self.usage_pct * 100.0,
            self.context_limit,
            self.threshold,
            if self.should_compress {
                " [over threshold]"
            } else {
                ""
            },
        )
    }
}

/// Decides when to compress and performs the compression.
#[derive(Debug, Clone)]
pub struct ContextManager {
    config: CompressionConfig,
    classifier: ImportanceClassifier,
}

impl ContextManager {
    pub fn new(config: CompressionConfig) -> Self {
        let classifier = ImportanceClassifier::from_config(&config);
        Self { config, classifier }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Switch the model whose limits drive the threshold.
    pub fn update_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
    }

    /// Token count above which compression triggers for the current model.
    ///
    /// Known models use the table value; unknown models use
    /// `floor(context_limit * compression_threshold)`.
    pub fn threshold(&self) -> usize {
        tokens::get_compression_threshold(&self.config.model).unwrap_or_else(|| {
            let limit = tokens::get_context_limit(&self.config.model);
            (limit as f64 * self.config.compression_threshold).floor() as usize
        })
    }

    /// Whether `messages` should be compressed now.
    pub fn should_compress(&self, messages: &[Message], force: bool) -> bool {
        if force {
            return true;
        }
        if messages.is_empty() {
            return false;
        }
        let estimated = tokens::estimate_token_count(messages);
        let threshold = self.threshold();
        debug!(
            "Compression check for {}: ~{estimated} tokens vs threshold {threshold}",
            self.config.model
        );
        estimated > threshold
    }

    pub fn stats(&self, messages: &[Message]) -> ContextStats {
        let estimated_tokens = tokens::estimate_token_count(messages);
        let context_limit = tokens::get_context_limit(&self.config.model);
        let threshold = self.threshold();
        ContextStats {
            estimated_tokens,
            message_count: messages.len(),
            context_limit,
            threshold,
            usage_pct: estimated_tokens as f64 / context_limit as f64,
            should_compress: !messages.is_empty() && estimated_tokens > threshold,
        }
    }

    /// Replace the regular messages with one summary message, keeping the
    /// important ones verbatim and in order after it.
    ///
    /// Never fails: a missing or failing summarizer falls back to the
    /// rule-based summary. The input is not modified.
    pub async fn compress_conversation(
        &self,
        messages: &[Message],
        summarizer: Option<&dyn Summarizer>,
    ) -> CompressionOutcome {
        let original_token_count = tokens::estimate_token_count(messages);
        if messages.is_empty() {
            return CompressionOutcome {
                compressed_messages: Vec::new(),
                compression_info: CompressionInfo::empty(),
            };
        }

        let partition = self.classifier.partition(messages);
        debug!(
            "Partitioned {} messages: {} important, {} regular",
            messages.len(),
            partition.important.len(),
            partition.regular.len()
        );

        let mut compressed = Vec::with_capacity(partition.important.len() + 1);
        if !partition.regular.is_empty() {
            let text = summarize_regular(&partition.regular, summarizer).await;
            compressed.push(summary_message(&text));
        }
        compressed.extend(partition.important.iter().map(|m| (*m).clone()));

        let new_token_count = tokens::estimate_token_count(&compressed);
        let compression_ratio = if original_token_count == 0 {
            1.0
        } else {
            new_token_count as f64 / original_token_count as f64
        };

        let compression_info = CompressionInfo {
            original_token_count,
            new_token_count,
            compression_ratio,
            original_message_count: messages.len(),
            new_message_count: compressed.len(),
            preserved_message_count: partition.important.len(),
            timestamp: Utc::now(),
        };
        info!("Compressed conversation: {}", compression_info.to_log_string());

        CompressionOutcome {
            compressed_messages: compressed,
            compression_info,
        }
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

async fn summarize_regular(regular: &[&Message], summarizer: Option<&dyn Summarizer>) -> String {
    if let Some(summarizer) = summarizer {
        let owned: Vec<Message> = regular.iter().map(|m| (*m).clone()).collect();
        match summarizer.summarize(owned).await {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => warn!(
                "Summarizer {} returned a blank summary; using rule-based summary",
                summarizer.label()
            ),
            Err(e) => warn!(
                "Summarizer {} failed: {e}; using rule-based summary",
                summarizer.label()
            ),
        }
    }
    fallback_summary(regular)
}

fn summary_message(text: &str) -> Message {
    Message::assistant_text(format!("{SUMMARY_PREFIX}{text}"))
        .with_id(generate_message_id())
        .with_created_at(Utc::now())
}

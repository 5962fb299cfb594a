//! Summarization: the LLM collaborator boundary and its rule-based fallback.
//!
//! The compression core never summarizes by itself. It hands the regular
//! (non-important) messages to an injected [`Summarizer`] and consumes the
//! returned text. When no summarizer is configured, or the one configured
//! fails, [`fallback_summary`] produces a fixed-template paragraph so the
//! pipeline always has *some* summary.
//!
//! Which backend writes the summary is decided once, from configuration, by
//! [`select_summarizer`]: the [`SummaryProvider`](crate::config::SummaryProvider)
//! tag and [`CompressionMode`] pick an OpenRouter model up front instead of
//! re-inferring a provider from the model name on every call.

use crate::api::retry::{self, RetryConfig};
use crate::config::{CompressionConfig, CompressionMode};
use crate::{ChatMessage, ChatRequest, Message, MessageRole, OpenRouterClient};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Prefix of every synthetic summary message.
pub const SUMMARY_PREFIX: &str = "[Conversation summary]\n\n";

/// Output ceiling for LLM-written summaries.
pub const DEFAULT_SUMMARY_MAX_TOKENS: u32 = 1000;

/// Low temperature keeps summaries close to the source.
pub const DEFAULT_SUMMARY_TEMPERATURE: f32 = 0.1;

/// System prompt for LLM summarization.
const SUMMARIZATION_PROMPT: &str = "\
Summarize the earlier part of a conversation between a user and an AI agent \
that builds presentations, images, audio, and browses the web. The summary \
replaces these messages in the agent's context. Focus on:
- What the user asked for and any preferences they stated
- Which tools ran and what they produced (file paths, URLs, slide titles)
- Errors and failed attempts, with the reason they failed
- Decisions made and work still pending

Rules:
- Only include facts explicitly stated in the messages.
- Preserve file paths, URLs, and error messages verbatim.
- Keep it under 300 words.";

// ── Errors ────────────────────────────────────────────────────────

/// Why a summarizer produced no summary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SummarizeError {
    /// The request never completed (network, TLS, malformed response).
    #[error("summarization request failed: {0}")]
    Request(String),
    /// The provider answered with a non-success status.
    #[error("summarization API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    /// The provider answered with no text.
    #[error("summarizer returned an empty summary")]
    EmptyResponse,
    #[error("{0}")]
    Other(String),
}

impl SummarizeError {
    /// Classify an [`OpenRouterClient::chat`] error string.
    pub fn from_client_error(error: String) -> Self {
        if let Some(rest) = error.strip_prefix("OpenRouter API HTTP ")
            && let Some((status, body)) = rest.split_once(": ")
            && let Ok(status) = status.trim().parse::<u16>()
        {
            return Self::Api {
                status,
                body: body.to_string(),
            };
        }
        Self::Request(error)
    }

    /// Whether retrying the same request might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Request(msg) => retry::is_transient_error(msg),
            Self::EmptyResponse | Self::Other(_) => false,
        }
    }
}

// ── Summarizer trait ──────────────────────────────────────────────

/// Boxed future returned by [`Summarizer::summarize`].
pub type SummaryFuture<'a> = Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send + 'a>>;

/// An LLM-backed (or otherwise) summarizer.
///
/// Implementations must not mutate their input, must bound the length of
/// what they return, and must report provider failures as `Err`. Retrying
/// is the implementation's business; the pipeline calls `summarize` once.
///
/// The messages are handed over by value: the pipeline clones the regular
/// subset exactly once for the call.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, messages: Vec<Message>) -> SummaryFuture<'_>;

    /// Short label for logs.
    fn label(&self) -> String {
        "custom".to_string()
    }
}

/// Type-erased async handler for [`FnSummarizer`].
type ErasedSummaryHandler = Box<
    dyn Fn(Vec<Message>) -> Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send>>
        + Send
        + Sync,
>;

/// A summarizer backed by an async closure.
///
/// ```ignore
/// let summarizer = FnSummarizer::new(|messages| async move {
///     Ok(format!("{} messages about tide pools", messages.len()))
/// });
/// ```
pub struct FnSummarizer {
    handler: ErasedSummaryHandler,
}

impl FnSummarizer {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, SummarizeError>> + Send + 'static,
    {
        let erased = move |messages: Vec<Message>| -> Pin<
            Box<dyn Future<Output = Result<String, SummarizeError>> + Send>,
        > { Box::pin(f(messages)) };
        Self {
            handler: Box::new(erased),
        }
    }
}

impl Summarizer for FnSummarizer {
    fn summarize(&self, messages: Vec<Message>) -> SummaryFuture<'_> {
        (self.handler)(messages)
    }
}

impl fmt::Debug for FnSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSummarizer").finish_non_exhaustive()
    }
}

// ── Request building ──────────────────────────────────────────────

/// Build the (system, user) prompt pair for summarizing `span`.
///
/// At most `max_messages` of the most recent messages are rendered in full;
/// anything older is collapsed into a single omission line. `0` means no
/// cap.
pub fn build_summarization_request(span: &[Message], max_messages: usize) -> (String, String) {
    let skip = if max_messages == 0 {
        0
    } else {
        span.len().saturating_sub(max_messages)
    };

    let mut content = String::new();
    if skip > 0 {
        content.push_str(&format!("[{skip} earlier message(s) omitted]\n\n"));
    }
    for msg in &span[skip..] {
        let text = msg.content.to_plain_text();
        content.push_str(&format!("[{}]: {text}\n\n", msg.role));
    }

    (SUMMARIZATION_PROMPT.to_string(), content)
}

// ── Rule-based fallback ───────────────────────────────────────────

/// Maximum distinct tool names listed in a fallback summary.
const FALLBACK_TOOL_NAMES: usize = 5;

/// Words that mark a message as reporting a new artifact.
const ARTIFACT_KEYWORDS: &[&str] = &["generated", "created"];

/// Produce a summary without an LLM.
///
/// Counts user requests, tool invocations, and messages reporting new
/// artifacts, and renders them into a fixed template. Always succeeds, and
/// its length is bounded regardless of input size.
///
/// The template contains none of the
/// [`IMPORTANT_KEYWORDS`](crate::context::importance::IMPORTANT_KEYWORDS),
/// so an earlier summary is folded into the next one.
pub fn fallback_summary(regular: &[&Message]) -> String {
    let user_requests = regular
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .count();

    let mut tool_calls = 0;
    let mut tool_names = BTreeSet::new();
    for message in regular {
        for name in message.tool_call_names() {
            tool_calls += 1;
            tool_names.insert(name);
        }
    }

    let artifacts = regular
        .iter()
        .filter(|m| {
            let text = m.content.to_plain_text().to_lowercase();
            ARTIFACT_KEYWORDS.iter().any(|k| text.contains(k))
        })
        .count();

    let mut summary = format!(
        "Summary of {} earlier message(s): the user made {user_requests} request(s), \
         {tool_calls} tool call(s) were executed, and {artifacts} message(s) reported \
         new outputs.",
        regular.len(),
    );
    if !tool_names.is_empty() {
        let listed: Vec<&str> = tool_names.iter().take(FALLBACK_TOOL_NAMES).copied().collect();
        summary.push_str(&format!(" Tools used: {}.", listed.join(", ")));
    }
    summary.push_str(" Key results from this period are preserved in the messages that follow.");
    summary
}

// ── OpenRouter summarizer ─────────────────────────────────────────

/// Summarizer that asks a model on OpenRouter for the summary.
pub struct OpenRouterSummarizer {
    client: Arc<OpenRouterClient>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_messages: usize,
    retry: RetryConfig,
}

impl OpenRouterSummarizer {
    /// `model` is a fully qualified OpenRouter id such as
    /// `"google/gemini-2.5-flash"`.
    pub fn new(client: Arc<OpenRouterClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: DEFAULT_SUMMARY_MAX_TOKENS,
            temperature: DEFAULT_SUMMARY_TEMPERATURE,
            max_messages: crate::config::DEFAULT_MAX_MESSAGES,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The request this summarizer would send for `messages`.
    pub fn build_request(&self, messages: &[Message]) -> ChatRequest {
        let (system, user) = build_summarization_request(messages, self.max_messages);
        ChatRequest {
            model: Some(self.model.clone()),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

impl Summarizer for OpenRouterSummarizer {
    fn summarize(&self, messages: Vec<Message>) -> SummaryFuture<'_> {
        Box::pin(async move {
            let request = self.build_request(&messages);
            debug!(
                "Summarizing {} message(s) with {}",
                messages.len(),
                self.model
            );
            let client = &self.client;
            let request = &request;
            let completion = retry::retry_with_backoff(
                &self.retry,
                SummarizeError::is_transient,
                || async move {
                    client
                        .chat(request)
                        .await
                        .map_err(SummarizeError::from_client_error)
                },
            )
            .await?;

            match completion.content {
                Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
                _ => Err(SummarizeError::EmptyResponse),
            }
        })
    }

    fn label(&self) -> String {
        format!("openrouter:{}", self.model)
    }
}

impl fmt::Debug for OpenRouterSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRouterSummarizer")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_messages", &self.max_messages)
            .finish_non_exhaustive()
    }
}

// ── Selection ─────────────────────────────────────────────────────

/// The OpenRouter model that writes summaries under `config`, or `None`
/// when the mode is rule-based only.
pub fn summary_model_for(config: &CompressionConfig) -> Option<String> {
    match config.compression_mode {
        CompressionMode::Lightweight => None,
        CompressionMode::Auto => Some(config.provider.fast_model().to_string()),
        CompressionMode::HighQuality => Some(config.provider.qualify(&config.model)),
    }
}

/// Resolve the summarizer for `config` once, at construction time.
///
/// Returns `None` when the mode needs no LLM or no client is available; the
/// pipeline then relies on [`fallback_summary`].
pub fn select_summarizer(
    config: &CompressionConfig,
    client: Option<Arc<OpenRouterClient>>,
) -> Option<Arc<dyn Summarizer>> {
    let model = summary_model_for(config)?;
    let client = client?;
    debug!(
        "Selected summarizer {model} (mode={}, provider={:?})",
        config.compression_mode, config.provider
    );
    Some(Arc::new(
        OpenRouterSummarizer::new(client, model).with_max_messages(config.max_messages),
    ))
}

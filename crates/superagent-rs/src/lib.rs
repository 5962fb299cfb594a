//! Context-window compression for LLM chat agents.
//!
//! `superagent-rs` keeps a long-running agent conversation under its model's
//! context window. Before each model invocation the agent hands its message
//! history to a [`CompressionMiddleware`](context::middleware::CompressionMiddleware);
//! when the estimated token count crosses the model's threshold, older
//! messages are summarized into a single synthetic message while the
//! messages that matter (recent turns, state-changing tool calls, errors,
//! generated artifacts) are kept verbatim.
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use superagent_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let config = CompressionConfig::new("gemini-2.5-flash")
//!         .with_provider(SummaryProvider::Google)
//!         .with_mode(CompressionMode::Auto);
//!
//!     // `None` without OPENROUTER_KEY: rule-based summaries only.
//!     let client = OpenRouterClient::from_env().map(Arc::new);
//!     let summarizer = select_summarizer(&config, client);
//!
//!     let middleware = CompressionMiddleware::new(config)
//!         .with_summarizer_opt(summarizer)
//!         .with_observer(LoggingObserver);
//!
//!     let history = vec![Message::user("Build me a deck about tide pools.")];
//!     let result = middleware.check_and_compress(history).await;
//!     if let Some(info) = result.compression_info {
//!         println!("{}", info.to_log_string());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Token estimation, importance classification, summarization, [`ContextManager`](context::manager::ContextManager), [`CompressionMiddleware`](context::middleware::CompressionMiddleware), lifecycle events |
//! | [`config`] | [`CompressionConfig`](config::CompressionConfig), compression modes, summary providers |
//! | [`session`] | Caller-owned conversation state stores |
//! | [`api`] | Retry policy for the summarization endpoint |
//!
//! Compression is always best-effort: every failure path ends with the
//! original messages passing through unchanged.

pub mod api;
pub mod config;
pub mod context;
pub mod prelude;
pub mod session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

/// Default chat completions endpoint.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default conversation model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// One structured part of a multi-part message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        result: serde_json::Value,
    },
}

/// Message content: a plain string or a sequence of structured parts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// The plain text, if this is text content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Parts(_) => None,
        }
    }

    /// Flatten into a single readable string (used for transcripts).
    pub fn to_plain_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::ToolCall {
                        tool_name, args, ..
                    } => format!("[tool call] {tool_name}({args})"),
                    ContentPart::ToolResult {
                        tool_name, result, ..
                    } => format!("[tool result] {tool_name}: {result}"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<Content>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            created_at: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, Content::Text(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, Content::Text(content.into()))
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, Content::Text(content.into()))
    }

    /// An assistant message carrying a single tool call.
    pub fn tool_call(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self::new(
            MessageRole::Assistant,
            Content::Parts(vec![ContentPart::ToolCall {
                tool_call_id: call_id.into(),
                tool_name: tool_name.into(),
                args,
            }]),
        )
    }

    /// A tool message carrying a single tool result.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self::new(
            MessageRole::Tool,
            Content::Parts(vec![ContentPart::ToolResult {
                tool_call_id: call_id.into(),
                tool_name: tool_name.into(),
                result,
            }]),
        )
    }

    /// Attach an identifier (builder pattern).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a creation timestamp (builder pattern).
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Names of the tools this message calls, in order.
    pub fn tool_call_names(&self) -> impl Iterator<Item = &str> {
        let parts: &[ContentPart] = match &self.content {
            Content::Parts(parts) => parts,
            Content::Text(_) => &[],
        };
        parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall { tool_name, .. } => Some(tool_name.as_str()),
            _ => None,
        })
    }
}

/// Generate a fresh message identifier.
pub fn generate_message_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates ids minted within the same nanosecond.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg-{ts:x}-{count:04x}")
}

// ── Request types ──────────────────────────────────────────────────

/// A flat `{role, content}` message as sent to the chat completions API.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Chat completion request body. Only the fields summarization needs.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from `OpenRouterClient::chat()`.
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
///
/// OpenRouter fronts every provider the agent talks to (OpenAI, Anthropic,
/// Google, X.ai), so one client covers all summarization backends.
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) referer: String,
    pub(crate) title: String,
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("base_url", &self.base_url)
            .field("referer", &self.referer)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(
            api_key,
            "https://github.com/open-superagent/superagent-rs",
            "superagent-rs",
        )
    }

    /// Create a client from the `OPENROUTER_KEY` environment variable.
    ///
    /// Returns `None` when the variable is unset or empty.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("OPENROUTER_KEY").ok()?;
        if key.trim().is_empty() {
            return None;
        }
        Self::new(key).ok()
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("superagent-rs/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: OPENROUTER_URL.to_string(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Post chat requests to `url` instead of [`OPENROUTER_URL`], e.g. a
    /// proxy or a local OpenAI-compatible server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a chat completion request.
    ///
    /// Error strings follow the `"OpenRouter API HTTP {status}: {body}"` /
    /// `"request failed: ..."` shapes that [`api::retry`] classifies.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        let model_label = body.model.as_deref().unwrap_or("(none)");
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            model_label,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {}: {text}", status.as_u16()));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;

        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        Ok(match choice {
            Some(c) => ChatCompletion {
                content: c.message.content,
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            },
            None => ChatCompletion {
                content: None,
                usage: parsed.usage,
                finish_reason: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_text(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let call = Message::tool_call("c1", "web_search", serde_json::json!({"q": "tides"}));
        assert_eq!(call.role, MessageRole::Assistant);
        assert_eq!(call.tool_call_names().collect::<Vec<_>>(), vec!["web_search"]);

        let result = Message::tool_result("c1", "web_search", serde_json::json!(["a", "b"]));
        assert_eq!(result.role, MessageRole::Tool);
        assert_eq!(result.tool_call_names().count(), 0);
    }

    #[test]
    fn text_content_serializes_as_bare_string() {
        let msg = Message::user("hi").with_id("m1");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "hi");
        assert_eq!(json["id"], "m1");
        assert!(json.get("createdAt").is_none());
    }

    #[test]
    fn parts_content_uses_kebab_case_tags() {
        let raw = r#"{
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Generating slides"},
                {"type": "tool-call", "toolCallId": "c9", "toolName": "slide_generator", "args": {"topic": "tides"}}
            ],
            "createdAt": "2025-06-01T12:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert!(msg.created_at.is_some());
        match &msg.content {
            Content::Parts(parts) => assert_eq!(parts.len(), 2),
            Content::Text(_) => panic!("expected parts"),
        }
        assert_eq!(
            msg.tool_call_names().collect::<Vec<_>>(),
            vec!["slide_generator"]
        );

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["content"][1]["type"], "tool-call");
        assert_eq!(back["content"][1]["toolName"], "slide_generator");
    }

    #[test]
    fn plain_text_flattens_parts() {
        let msg = Message::tool_result("c1", "image_generation", serde_json::json!({"url": "x"}));
        let text = msg.content.to_plain_text();
        assert!(text.starts_with("[tool result] image_generation"));
    }

    #[test]
    fn message_ids_are_unique() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
        assert!(a.starts_with("msg-"));
    }

    #[test]
    fn chat_request_default_skips_zero_fields() {
        let req = ChatRequest {
            model: Some("test-model".into()),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}

//! Token estimation and per-model context limits.
//!
//! Estimation is a character heuristic, not a tokenizer: plain text is
//! counted at ~4 characters per token, structured tool parts at ~3
//! characters per token of their JSON encoding (denser), plus a fixed
//! per-message overhead for role and metadata. It is total: every input
//! yields a value, and an empty list yields 0.

use crate::{Content, ContentPart, Message};

/// Characters per token for plain text.
pub const TEXT_CHARS_PER_TOKEN: usize = 4;

/// Characters per token for JSON-encoded tool calls and results.
pub const STRUCTURED_CHARS_PER_TOKEN: usize = 3;

/// Fixed per-message overhead (role, ids, framing).
pub const MESSAGE_OVERHEAD_TOKENS: usize = 10;

/// Context window assumed for models missing from the table.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Fraction of the context window at which compression triggers.
pub const COMPRESSION_TRIGGER_FRACTION: f64 = 0.95;

/// Static context-window record for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelTokenLimit {
    pub context_window: usize,
    pub max_output: usize,
    pub description: &'static str,
}

const fn limit(context_window: usize, max_output: usize, description: &'static str) -> ModelTokenLimit {
    ModelTokenLimit {
        context_window,
        max_output,
        description,
    }
}

/// Known models, keyed by normalized name.
const MODEL_TOKEN_LIMITS: &[(&str, ModelTokenLimit)] = &[
    ("gemini-2.5-flash", limit(1_048_576, 65_536, "Gemini 2.5 Flash")),
    ("gemini-2.5-pro", limit(1_048_576, 65_536, "Gemini 2.5 Pro")),
    ("gemini-2.0-flash", limit(1_048_576, 8_192, "Gemini 2.0 Flash")),
    ("gpt-4.1", limit(1_047_576, 32_768, "GPT-4.1")),
    ("gpt-4.1-mini", limit(1_047_576, 32_768, "GPT-4.1 mini")),
    ("gpt-4o", limit(128_000, 16_384, "GPT-4o")),
    ("gpt-4o-mini", limit(128_000, 16_384, "GPT-4o mini")),
    ("o3", limit(200_000, 100_000, "OpenAI o3")),
    ("o4-mini", limit(200_000, 100_000, "OpenAI o4-mini")),
    ("claude-opus-4", limit(200_000, 32_000, "Claude Opus 4")),
    ("claude-sonnet-4", limit(200_000, 64_000, "Claude Sonnet 4")),
    ("claude-3-7-sonnet", limit(200_000, 64_000, "Claude 3.7 Sonnet")),
    ("claude-3-5-haiku", limit(200_000, 8_192, "Claude 3.5 Haiku")),
    ("grok-4", limit(256_000, 32_768, "Grok 4")),
    ("grok-3", limit(131_072, 16_384, "Grok 3")),
    ("grok-3-mini", limit(131_072, 16_384, "Grok 3 mini")),
];

/// Known spelling variants and their canonical table keys.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gpt-4-1", "gpt-4.1"),
    ("gpt-4-1-mini", "gpt-4.1-mini"),
    ("gpt4o", "gpt-4o"),
    ("gpt-4o-2024-11-20", "gpt-4o"),
    ("claude-4-sonnet", "claude-sonnet-4"),
    ("claude-sonnet-4-20250514", "claude-sonnet-4"),
    ("claude-4-opus", "claude-opus-4"),
    ("claude-opus-4-20250514", "claude-opus-4"),
    ("claude-3.7-sonnet", "claude-3-7-sonnet"),
    ("claude-3.5-haiku", "claude-3-5-haiku"),
    ("gemini-2-5-flash", "gemini-2.5-flash"),
    ("gemini-2-5-pro", "gemini-2.5-pro"),
    ("grok-3-mini-beta", "grok-3-mini"),
];

/// Estimate the tokens consumed by a list of messages.
pub fn estimate_token_count(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate the tokens consumed by a single message, overhead included.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let content = match &message.content {
        Content::Text(text) => text_tokens(text),
        Content::Parts(parts) => parts.iter().map(part_tokens).sum(),
    };
    content + MESSAGE_OVERHEAD_TOKENS
}

fn text_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(TEXT_CHARS_PER_TOKEN)
}

fn part_tokens(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } => text_tokens(text),
        ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. } => {
            let encoded_len = serde_json::to_string(part).map_or(0, |s| s.chars().count());
            encoded_len.div_ceil(STRUCTURED_CHARS_PER_TOKEN)
        }
    }
}

/// Canonicalize a model identifier for table lookup.
///
/// Lowercases, drops an OpenRouter-style `vendor/` prefix, and maps known
/// spelling variants. Anything else passes through unchanged.
pub fn normalize_model_name(model: &str) -> String {
    let lowered = model.trim().to_lowercase();
    let name = lowered.rsplit('/').next().unwrap_or(lowered.as_str());
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or_else(|| name.to_string(), |(_, canonical)| (*canonical).to_string())
}

/// Look up a model's static token limits.
pub fn get_token_limit(model: &str) -> Option<ModelTokenLimit> {
    let name = normalize_model_name(model);
    MODEL_TOKEN_LIMITS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, limit)| *limit)
}

/// Context window for a model, falling back to [`DEFAULT_CONTEXT_WINDOW`].
pub fn get_context_limit(model: &str) -> usize {
    get_token_limit(model).map_or(DEFAULT_CONTEXT_WINDOW, |l| l.context_window)
}

/// Compression trigger for known models: `floor(window * 0.95)`.
///
/// `None` for unknown models; callers fall back to a ratio of
/// [`get_context_limit`].
pub fn get_compression_threshold(model: &str) -> Option<usize> {
    get_token_limit(model)
        .map(|l| (l.context_window as f64 * COMPRESSION_TRIGGER_FRACTION).floor() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(estimate_token_count(&[]), 0);
    }

    #[test]
    fn text_rounds_up_per_four_chars() {
        // 9 chars -> 3 tokens, plus overhead.
        let messages = vec![Message::user("abcdefghi")];
        assert_eq!(estimate_token_count(&messages), 3 + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn empty_content_costs_only_overhead() {
        let messages = vec![Message::user(""), Message::assistant_text("")];
        assert_eq!(estimate_token_count(&messages), 2 * MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn overhead_is_lower_bound() {
        let messages = vec![
            Message::user("hello there"),
            Message::tool_call("c1", "web_search", serde_json::json!({"q": "rust"})),
            Message::tool_result("c1", "web_search", serde_json::json!({"hits": 3})),
            Message::system(""),
        ];
        assert!(estimate_token_count(&messages) >= MESSAGE_OVERHEAD_TOKENS * messages.len());
    }

    #[test]
    fn structured_parts_use_json_length() {
        let msg = Message::tool_call("c1", "web_search", serde_json::json!({"q": "rust"}));
        let Content::Parts(parts) = &msg.content else {
            panic!("expected parts");
        };
        let json_len = serde_json::to_string(&parts[0]).unwrap().chars().count();
        assert_eq!(
            estimate_message_tokens(&msg),
            json_len.div_ceil(3) + MESSAGE_OVERHEAD_TOKENS
        );
    }

    #[test]
    fn multibyte_text_counts_chars_not_bytes() {
        // 4 chars, 12 bytes.
        let msg = Message::user("日本語字");
        assert_eq!(estimate_message_tokens(&msg), 1 + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn gemini_flash_limits() {
        let limit = get_token_limit("gemini-2.5-flash").unwrap();
        assert_eq!(limit.context_window, 1_048_576);
        assert_eq!(get_compression_threshold("gemini-2.5-flash"), Some(996_147));
    }

    #[test]
    fn unknown_model_falls_back() {
        assert!(get_token_limit("unknown-model-xyz").is_none());
        assert_eq!(get_context_limit("unknown-model-xyz"), 128_000);
        assert_eq!(get_compression_threshold("unknown-model-xyz"), None);
    }

    #[test]
    fn aliases_and_vendor_prefixes_normalize() {
        assert_eq!(normalize_model_name("gpt-4-1"), "gpt-4.1");
        assert_eq!(normalize_model_name("OpenAI/GPT-4-1"), "gpt-4.1");
        assert_eq!(normalize_model_name("anthropic/claude-sonnet-4"), "claude-sonnet-4");
        assert_eq!(normalize_model_name("my-custom-model"), "my-custom-model");
        assert_eq!(get_context_limit("gpt-4-1"), 1_047_576);
    }

    #[test]
    fn every_table_entry_has_positive_window() {
        for (name, limit) in MODEL_TOKEN_LIMITS {
            assert!(limit.context_window > 0, "{name} has zero window");
            assert!(limit.max_output < limit.context_window, "{name}");
            assert_eq!(normalize_model_name(name), *name, "{name} not canonical");
        }
    }
}

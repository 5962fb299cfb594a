//! Importance classification: which messages survive compression verbatim.
//!
//! Once a message is summarized its structured data is gone, so the rules
//! lean toward keeping things. A message is important when any of these
//! holds:
//!
//! 1. It is one of the last [`RECENCY_FLOOR`] messages.
//! 2. It calls a tool on the important-tools allow-list.
//! 3. It is plain text mentioning one of [`IMPORTANT_KEYWORDS`]
//!    (case-insensitive).
//!
//! Everything else is regular and becomes summarization input.

use crate::Message;
use std::collections::HashSet;

/// Number of trailing messages that are always preserved.
pub const RECENCY_FLOOR: usize = 3;

/// Substrings that mark a plain-text message as important.
pub const IMPORTANT_KEYWORDS: &[&str] = &["error", "failed", "generated", "created"];

/// A stable split of a message list into preserved and summarizable subsets.
///
/// Both subsets borrow from the input and keep its order; together they
/// cover every input message exactly once.
#[derive(Debug, Default)]
pub struct Partition<'a> {
    pub important: Vec<&'a Message>,
    pub regular: Vec<&'a Message>,
}

/// Partitions messages by the importance rules.
#[derive(Debug, Clone)]
pub struct ImportanceClassifier {
    important_tools: HashSet<String>,
    preserve_important: bool,
}

impl ImportanceClassifier {
    /// Create a classifier with the given important-tools allow-list.
    pub fn new<I, S>(important_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            important_tools: important_tools.into_iter().map(Into::into).collect(),
            preserve_important: true,
        }
    }

    /// Build from pipeline configuration.
    pub fn from_config(config: &crate::config::CompressionConfig) -> Self {
        Self::new(config.important_tools.iter().cloned())
            .with_preserve_important(config.preserve_important_messages)
    }

    /// When `false`, every message is regular (summarization only).
    pub fn with_preserve_important(mut self, preserve: bool) -> Self {
        self.preserve_important = preserve;
        self
    }

    /// Whether the message at `index` of a `len`-long list is important.
    pub fn is_important(&self, message: &Message, index: usize, len: usize) -> bool {
        if !self.preserve_important {
            return false;
        }
        index + RECENCY_FLOOR >= len
            || self.calls_important_tool(message)
            || mentions_keyword(message)
    }

    fn calls_important_tool(&self, message: &Message) -> bool {
        message
            .tool_call_names()
            .any(|name| self.important_tools.contains(name))
    }

    /// Split `messages` into important and regular subsets.
    pub fn partition<'a>(&self, messages: &'a [Message]) -> Partition<'a> {
        let len = messages.len();
        let mut partition = Partition::default();
        for (index, message) in messages.iter().enumerate() {
            if self.is_important(message, index, len) {
                partition.important.push(message);
            } else {
                partition.regular.push(message);
            }
        }
        partition
    }
}

impl Default for ImportanceClassifier {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_IMPORTANT_TOOLS.iter().copied())
    }
}

fn mentions_keyword(message: &Message) -> bool {
    let Some(text) = message.content.as_text() else {
        return false;
    };
    let lower = text.to_lowercase();
    IMPORTANT_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Content, ContentPart};

    fn chat(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant_text(format!("answer {i}"))
                }
            })
            .collect()
    }

    fn ptrs(msgs: &[&Message]) -> Vec<*const Message> {
        msgs.iter().map(|m| *m as *const Message).collect()
    }

    #[test]
    fn last_three_always_important() {
        let messages = chat(10);
        let partition = ImportanceClassifier::default().partition(&messages);
        assert_eq!(partition.important.len(), 3);
        assert_eq!(
            ptrs(&partition.important),
            messages[7..].iter().map(|m| m as *const Message).collect::<Vec<_>>()
        );
        assert_eq!(partition.regular.len(), 7);
    }

    #[test]
    fn short_lists_are_entirely_important() {
        let messages = chat(2);
        let partition = ImportanceClassifier::default().partition(&messages);
        assert_eq!(partition.important.len(), 2);
        assert!(partition.regular.is_empty());
    }

    #[test]
    fn allow_listed_tool_call_is_important() {
        let mut messages = chat(6);
        messages.insert(
            1,
            Message::tool_call("c1", "slide_generator", serde_json::json!({"topic": "x"})),
        );
        messages.insert(
            2,
            Message::tool_call("c2", "get_weather", serde_json::json!({})),
        );
        let partition = ImportanceClassifier::default().partition(&messages);
        assert!(ptrs(&partition.important).contains(&(&messages[1] as *const Message)));
        assert!(ptrs(&partition.regular).contains(&(&messages[2] as *const Message)));
    }

    #[test]
    fn tool_result_alone_is_not_important() {
        let mut messages = chat(6);
        messages.insert(
            0,
            Message::tool_result("c1", "slide_generator", serde_json::json!("done")),
        );
        let partition = ImportanceClassifier::default().partition(&messages);
        assert!(ptrs(&partition.regular).contains(&(&messages[0] as *const Message)));
    }

    #[test]
    fn keywords_match_case_insensitively_in_plain_text_only() {
        let mut messages = chat(6);
        messages[0] = Message::assistant_text("Image GENERATED at /media/a.png");
        messages[1] = Message::new(
            crate::MessageRole::Assistant,
            Content::Parts(vec![ContentPart::Text {
                text: "the upload failed".into(),
            }]),
        );
        let partition = ImportanceClassifier::default().partition(&messages);
        assert!(ptrs(&partition.important).contains(&(&messages[0] as *const Message)));
        assert!(ptrs(&partition.regular).contains(&(&messages[1] as *const Message)));
    }

    #[test]
    fn custom_allow_list_replaces_default() {
        let messages = vec![
            Message::tool_call("c1", "deploy", serde_json::json!({})),
            Message::tool_call("c2", "slide_generator", serde_json::json!({})),
            Message::user("a"),
            Message::user("b"),
            Message::user("c"),
        ];
        let partition = ImportanceClassifier::new(["deploy"]).partition(&messages);
        assert_eq!(partition.important.len(), 4);
        assert!(std::ptr::eq(partition.regular[0], &messages[1]));
    }

    #[test]
    fn disabled_preservation_makes_everything_regular() {
        let mut messages = chat(8);
        messages[2] = Message::user("Error: something failed");
        let partition = ImportanceClassifier::default()
            .with_preserve_important(false)
            .partition(&messages);
        assert!(partition.important.is_empty());
        assert_eq!(partition.regular.len(), 8);
    }

    #[test]
    fn partition_is_stable_and_exhaustive() {
        let mut messages = chat(30);
        messages[4] = Message::user("that failed");
        messages[11] = Message::tool_call("c", "web_search", serde_json::json!({}));
        messages[20] = Message::assistant_text("Created the deck");
        let partition = ImportanceClassifier::default().partition(&messages);

        let mut seen: Vec<*const Message> = ptrs(&partition.important);
        seen.extend(ptrs(&partition.regular));
        seen.sort();
        let mut all: Vec<*const Message> = messages.iter().map(|m| m as *const Message).collect();
        all.sort();
        assert_eq!(seen, all);

        let important = ptrs(&partition.important);
        assert!(important.windows(2).all(|w| w[0] < w[1]));
        let regular = ptrs(&partition.regular);
        assert!(regular.windows(2).all(|w| w[0] < w[1]));
    }
}

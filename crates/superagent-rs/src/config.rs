//! Configuration for the compression pipeline.
//!
//! [`CompressionConfig`] carries every recognized option with sensible
//! defaults. Build one programmatically with the builder methods, or load it
//! from a JSON file whose keys use the camelCase names agents already send
//! (`compressionThreshold`, `maxMessages`, ...).
//!
//! # Examples
//!
//! ```ignore
//! let config = CompressionConfig::new("claude-sonnet-4")
//!     .with_provider(SummaryProvider::Anthropic)
//!     .with_mode(CompressionMode::HighQuality)
//!     .with_threshold(0.9);
//! ```
//!
//! ```ignore
//! let config = CompressionConfig::from_file("compression.json")?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Tools whose calls materially change downstream state. Messages calling
/// them survive compression verbatim.
pub const DEFAULT_IMPORTANT_TOOLS: &[&str] = &[
    "slide_generator",
    "brave_search",
    "web_search",
    "image_generation",
    "video_generation",
    "audio_generation",
    "minimax_tts",
    "browserbase_session",
];

/// Default compression trigger as a fraction of the context window.
pub const DEFAULT_COMPRESSION_THRESHOLD: f64 = 0.95;

/// Default cap on regular messages rendered into a summarization transcript.
pub const DEFAULT_MAX_MESSAGES: usize = 20;

// ── Errors ────────────────────────────────────────────────────────

/// Failure loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ── Mode ──────────────────────────────────────────────────────────

/// How much effort to spend summarizing.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionMode {
    /// Rule-based summary only; no LLM call.
    Lightweight,
    /// The provider's fast, cheap model writes the summary.
    #[default]
    Auto,
    /// The conversation model itself writes the summary.
    HighQuality,
}

impl FromStr for CompressionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lightweight" => Ok(Self::Lightweight),
            "auto" => Ok(Self::Auto),
            "high-quality" | "high_quality" | "highquality" => Ok(Self::HighQuality),
            other => Err(format!(
                "unknown compression mode '{other}' (expected lightweight, auto, or high-quality)"
            )),
        }
    }
}

impl std::fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lightweight => write!(f, "lightweight"),
            Self::Auto => write!(f, "auto"),
            Self::HighQuality => write!(f, "high-quality"),
        }
    }
}

// ── Provider ──────────────────────────────────────────────────────

/// Summarization backend, carried explicitly alongside the model name.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummaryProvider {
    OpenAi,
    Anthropic,
    #[default]
    Google,
    XAi,
}

impl SummaryProvider {
    /// OpenRouter vendor prefix for this provider.
    pub fn vendor_prefix(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::XAi => "x-ai",
        }
    }

    /// The provider's fast model, fully qualified for OpenRouter.
    pub fn fast_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai/gpt-4.1-mini",
            Self::Anthropic => "anthropic/claude-3-5-haiku",
            Self::Google => "google/gemini-2.5-flash",
            Self::XAi => "x-ai/grok-3-mini",
        }
    }

    /// Qualify a bare model name with this provider's vendor prefix.
    /// Names that already carry a `vendor/` prefix are returned unchanged.
    pub fn qualify(&self, model: &str) -> String {
        if model.contains('/') {
            model.to_string()
        } else {
            format!("{}/{model}", self.vendor_prefix())
        }
    }
}

impl FromStr for SummaryProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            "xai" | "x-ai" | "grok" => Ok(Self::XAi),
            other => Err(format!(
                "unknown provider '{other}' (expected openai, anthropic, google, or xai)"
            )),
        }
    }
}

// ── CompressionConfig ─────────────────────────────────────────────

/// Options recognized by the compression pipeline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionConfig {
    /// Conversation model identifier. Default: `"gemini-2.5-flash"`.
    pub model: String,
    /// Fraction of the context window that triggers compression for models
    /// missing from the token table. Default: `0.95`.
    pub compression_threshold: f64,
    /// Maximum regular messages rendered into a summarization transcript.
    /// Default: `20`.
    pub max_messages: usize,
    /// Keep important messages verbatim. Default: `true`.
    pub preserve_important_messages: bool,
    /// Carried for agents that set it; compression ignores it.
    pub enable_semantic_recall: bool,
    /// Allow `check_and_compress` to compress. Default: `true`.
    pub enable_auto_compression: bool,
    pub compression_mode: CompressionMode,
    pub provider: SummaryProvider,
    /// Tool names whose calls are always preserved.
    pub important_tools: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            max_messages: DEFAULT_MAX_MESSAGES,
            preserve_important_messages: true,
            enable_semantic_recall: false,
            enable_auto_compression: true,
            compression_mode: CompressionMode::default(),
            provider: SummaryProvider::default(),
            important_tools: DEFAULT_IMPORTANT_TOOLS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl CompressionConfig {
    /// Create a config for the given model with defaults everywhere else.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Load a config from a JSON file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn with_threshold(mut self, ratio: f64) -> Self {
        self.compression_threshold = ratio;
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_preserve_important(mut self, preserve: bool) -> Self {
        self.preserve_important_messages = preserve;
        self
    }

    pub fn with_auto_compression(mut self, enabled: bool) -> Self {
        self.enable_auto_compression = enabled;
        self
    }

    pub fn with_mode(mut self, mode: CompressionMode) -> Self {
        self.compression_mode = mode;
        self
    }

    pub fn with_provider(mut self, provider: SummaryProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Add a tool name to the important-tools allow-list.
    pub fn important_tool(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.important_tools.contains(&name) {
            self.important_tools.push(name);
        }
        self
    }

    /// Replace the important-tools allow-list.
    pub fn with_important_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.important_tools = names.into_iter().map(Into::into).collect();
        self
    }
}

//! Convenience re-exports for common `superagent-rs` types.
//!
//! ```ignore
//! use superagent_rs::prelude::*;
//! ```
//!
//! Covers what an agent needs to put compression in front of its model
//! calls. Lower-level pieces (the token table, partition views, the retry
//! policy) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Content, ContentPart, Message, MessageRole, OpenRouterClient};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{CompressionConfig, CompressionMode, SummaryProvider};

// ── Compression ─────────────────────────────────────────────────────
pub use crate::context::{
    CompositeObserver, CompressionEvent, CompressionInfo, CompressionMiddleware,
    CompressionObserver, CompressionResult, ContextManager, ContextStats, FnObserver,
    FnSummarizer, LoggingObserver, NoopObserver, SummarizeError, Summarizer, select_summarizer,
};

// ── Sessions ────────────────────────────────────────────────────────
pub use crate::session::{FileSessionStore, InMemorySessionStore, SessionState, SessionStore};

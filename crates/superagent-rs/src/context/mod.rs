//! Context compression: keep a conversation under the model's window.
//!
//! The pipeline, leaf to root:
//!
//! 1. **[`tokens`]** estimates token usage and knows each model's window.
//! 2. **[`importance`]** splits messages into those kept verbatim and those
//!    that can be summarized.
//! 3. **[`summarizer`]** turns the summarizable messages into text, through
//!    an LLM or a rule-based fallback.
//! 4. **[`manager`]** decides when to compress and assembles the result.
//! 5. **[`middleware`]** is what an agent calls before each model request:
//!    one compression at a time, lifecycle [`events`], and the original
//!    messages back on any failure.

pub mod events;
pub mod importance;
pub mod manager;
pub mod middleware;
pub mod summarizer;
pub mod tokens;

pub use events::{
    CompositeObserver, CompressionEvent, CompressionObserver, FnObserver, LoggingObserver,
    NoopObserver,
};
pub use importance::{ImportanceClassifier, Partition};
pub use manager::{CompressionInfo, CompressionOutcome, ContextManager, ContextStats};
pub use middleware::{CompressionError, CompressionMiddleware, CompressionResult};
pub use summarizer::{
    FnSummarizer, OpenRouterSummarizer, SummarizeError, Summarizer, SummaryFuture,
    fallback_summary, select_summarizer,
};
pub use tokens::{
    ModelTokenLimit, estimate_token_count, get_compression_threshold, get_context_limit,
    get_token_limit,
};

//! HTTP-side policy for the summarization endpoint.
//!
//! - [`retry`]: transient error detection (429, 5xx, network timeouts) and
//!   exponential backoff for the OpenRouter summarizer. The compression core
//!   itself never retries.

pub mod retry;

pub use retry::{RetryConfig, retry_with_backoff};

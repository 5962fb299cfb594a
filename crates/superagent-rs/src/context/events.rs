//! Compression lifecycle events and their observers.
//!
//! [`CompressionMiddleware`](super::middleware::CompressionMiddleware) emits a
//! [`CompressionEvent`] when a compression starts, completes, or fails.
//! Callers implement [`CompressionObserver`] to forward these to a UI,
//! metrics, or a log.
//!
//! | Observer | Use case |
//! |----------|----------|
//! | [`NoopObserver`] | Tests, or when nobody is listening |
//! | [`LoggingObserver`] | Structured logging via `tracing` |
//! | [`FnObserver`] | Quick closures |
//! | [`CompositeObserver`] | Fan out to several observers in order |
//!
//! Observers are fire-and-forget. A panicking observer is caught and logged
//! by [`notify`]; it never aborts compression.

use super::manager::CompressionInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{info, warn};

/// A compression lifecycle notification.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CompressionEvent {
    /// Compression is about to run.
    #[serde(rename = "compression-triggered")]
    Triggered {
        estimated_tokens: usize,
        threshold: usize,
        /// `true` when started via `force_compress`.
        forced: bool,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "compression-completed")]
    Completed {
        info: CompressionInfo,
        timestamp: DateTime<Utc>,
    },
    /// Compression failed; the original messages were kept.
    #[serde(rename = "compression-failed")]
    Failed {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl CompressionEvent {
    pub fn triggered(estimated_tokens: usize, threshold: usize, forced: bool) -> Self {
        Self::Triggered {
            estimated_tokens,
            threshold,
            forced,
            timestamp: Utc::now(),
        }
    }

    pub fn completed(info: CompressionInfo) -> Self {
        Self::Completed {
            info,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Triggered { .. } => "compression-triggered",
            Self::Completed { .. } => "compression-completed",
            Self::Failed { .. } => "compression-failed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Triggered { timestamp, .. }
            | Self::Completed { timestamp, .. }
            | Self::Failed { timestamp, .. } => *timestamp,
        }
    }
}

/// Receiver for compression events. The default implementation ignores
/// everything.
///
/// ```ignore
/// struct Counter(AtomicUsize);
///
/// impl CompressionObserver for Counter {
///     fn on_event(&self, event: &CompressionEvent) {
///         if let CompressionEvent::Completed { .. } = event {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait CompressionObserver: Send + Sync {
    fn on_event(&self, event: &CompressionEvent) {
        let _ = event;
    }
}

pub struct NoopObserver;
impl CompressionObserver for NoopObserver {}

/// An observer backed by a closure.
pub struct FnObserver<F>(F)
where
    F: Fn(&CompressionEvent) + Send + Sync;

impl<F> FnObserver<F>
where
    F: Fn(&CompressionEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> CompressionObserver for FnObserver<F>
where
    F: Fn(&CompressionEvent) + Send + Sync,
{
    fn on_event(&self, event: &CompressionEvent) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner observer, in registration order.
///
/// Each inner observer is isolated: one panicking does not stop the rest.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Box<dyn CompressionObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl CompressionObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Add an observer from an `Option`. `None` is a no-op.
    pub fn with_opt(self, observer: Option<impl CompressionObserver + 'static>) -> Self {
        match observer {
            Some(o) => self.with(o),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl CompressionObserver for CompositeObserver {
    fn on_event(&self, event: &CompressionEvent) {
        for observer in &self.observers {
            notify(observer.as_ref(), event);
        }
    }
}

/// Logs every event through `tracing`.
pub struct LoggingObserver;

impl CompressionObserver for LoggingObserver {
    fn on_event(&self, event: &CompressionEvent) {
        match event {
            CompressionEvent::Triggered {
                estimated_tokens,
                threshold,
                forced,
                ..
            } => {
                info!(
                    "Compression triggered: ~{estimated_tokens} tokens (threshold {threshold}){}",
                    if *forced { ", forced" } else { "" }
                );
            }
            CompressionEvent::Completed { info, .. } => {
                info!("Compression completed: {}", info.to_log_string());
            }
            CompressionEvent::Failed { error, .. } => {
                warn!("Compression failed, keeping original messages: {error}");
            }
        }
    }
}

/// Deliver `event` to `observer`, swallowing and logging any panic.
pub fn notify(observer: &dyn CompressionObserver, event: &CompressionEvent) {
    if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
        warn!("Compression observer panicked on '{}' event", event.kind());
    }
}

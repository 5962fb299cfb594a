//! Agent-facing entry point: compress when needed, never fail.
//!
//! [`CompressionMiddleware`] sits in front of every model call. It asks the
//! [`ContextManager`] whether the conversation is over threshold, runs the
//! compression if so, and reports progress to a [`CompressionObserver`].
//! Whatever goes wrong inside (a panic, an empty result) is logged and the
//! caller gets its original messages back.
//!
//! At most one compression runs per middleware instance. A call that
//! arrives while one is in flight is rejected immediately rather than
//! queued.

use super::events::{CompressionEvent, CompressionObserver, NoopObserver, notify};
use super::manager::{CompressionInfo, CompressionOutcome, ContextManager, ContextStats};
use super::summarizer::Summarizer;
use super::tokens::estimate_token_count;
use crate::Message;
use crate::config::CompressionConfig;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Why a compression attempt was abandoned. Never surfaced to callers of
/// [`CompressionMiddleware`]; it is logged and reported as a failed event.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompressionError {
    #[error("a compression is already in progress")]
    AlreadyInProgress,
    #[error("compression panicked: {0}")]
    Panicked(String),
    #[error("compression produced no messages from {input_len} input message(s)")]
    EmptyResult { input_len: usize },
}

/// What the agent should send to the model next.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub messages: Vec<Message>,
    pub was_compressed: bool,
    pub compression_info: Option<CompressionInfo>,
}

impl CompressionResult {
    /// Hand `messages` back untouched.
    pub fn unchanged(messages: Vec<Message>) -> Self {
        Self {
            messages,
            was_compressed: false,
            compression_info: None,
        }
    }
}

/// Clears the in-flight flag on drop, whatever the exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Compression in front of an agent's model calls.
///
/// ```ignore
/// let middleware = CompressionMiddleware::new(config)
///     .with_summarizer_opt(select_summarizer(&config, client))
///     .with_observer(LoggingObserver);
///
/// let result = middleware.check_and_compress(messages).await;
/// send_to_model(result.messages).await;
/// ```
pub struct CompressionMiddleware {
    manager: RwLock<ContextManager>,
    summarizer: Option<Arc<dyn Summarizer>>,
    observer: Arc<dyn CompressionObserver>,
    is_compressing: AtomicBool,
}

impl CompressionMiddleware {
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            manager: RwLock::new(ContextManager::new(config)),
            summarizer: None,
            observer: Arc::new(NoopObserver),
            is_compressing: AtomicBool::new(false),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Set the summarizer from an `Option`. `None` keeps rule-based
    /// summaries only.
    pub fn with_summarizer_opt(mut self, summarizer: Option<Arc<dyn Summarizer>>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_observer(mut self, observer: impl CompressionObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Share an observer with other components.
    pub fn with_shared_observer(mut self, observer: Arc<dyn CompressionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Compress if auto-compression is on, nothing is in flight, and the
    /// conversation is over threshold. Otherwise `messages` come back as-is.
    pub async fn check_and_compress(&self, messages: Vec<Message>) -> CompressionResult {
        let manager = self.snapshot();
        if !manager.config().enable_auto_compression {
            debug!("Auto-compression disabled; passing {} messages through", messages.len());
            return CompressionResult::unchanged(messages);
        }
        if self.is_compressing() {
            debug!("Skipping check: {}", CompressionError::AlreadyInProgress);
            return CompressionResult::unchanged(messages);
        }
        if !manager.should_compress(&messages, false) {
            return CompressionResult::unchanged(messages);
        }
        self.perform_compression(manager, messages, false).await
    }

    /// Compress regardless of the threshold or the auto-compression flag.
    /// Still rejected while another compression is in flight.
    pub async fn force_compress(&self, messages: Vec<Message>) -> CompressionResult {
        let manager = self.snapshot();
        self.perform_compression(manager, messages, true).await
    }

    async fn perform_compression(
        &self,
        manager: ContextManager,
        messages: Vec<Message>,
        forced: bool,
    ) -> CompressionResult {
        let Some(_guard) = InFlightGuard::acquire(&self.is_compressing) else {
            debug!("Rejected: {}", CompressionError::AlreadyInProgress);
            return CompressionResult::unchanged(messages);
        };

        let estimated = estimate_token_count(&messages);
        self.emit(&CompressionEvent::triggered(
            estimated,
            manager.threshold(),
            forced,
        ));

        match self.run_manager(&manager, &messages).await {
            Ok(outcome) => {
                self.emit(&CompressionEvent::completed(outcome.compression_info.clone()));
                CompressionResult {
                    messages: outcome.compressed_messages,
                    was_compressed: true,
                    compression_info: Some(outcome.compression_info),
                }
            }
            Err(e) => {
                warn!("Compression failed, keeping {} original messages: {e}", messages.len());
                self.emit(&CompressionEvent::failed(e.to_string()));
                CompressionResult::unchanged(messages)
            }
        }
    }

    async fn run_manager(
        &self,
        manager: &ContextManager,
        messages: &[Message],
    ) -> Result<CompressionOutcome, CompressionError> {
        let outcome = AssertUnwindSafe(
            manager.compress_conversation(messages, self.summarizer.as_deref()),
        )
        .catch_unwind()
        .await
        .map_err(|payload| CompressionError::Panicked(panic_message(payload.as_ref())))?;
        validate_outcome(messages.len(), outcome)
    }

    fn emit(&self, event: &CompressionEvent) {
        notify(self.observer.as_ref(), event);
    }

    /// Clone the manager so no lock is held across an await.
    fn snapshot(&self) -> ContextManager {
        self.manager
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch the model; affects the next check.
    pub fn update_model(&self, model: impl Into<String>) {
        self.manager
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .update_model(model);
    }

    pub fn is_compressing(&self) -> bool {
        self.is_compressing.load(Ordering::Acquire)
    }

    pub fn config(&self) -> CompressionConfig {
        self.snapshot().config().clone()
    }

    pub fn stats(&self, messages: &[Message]) -> ContextStats {
        self.snapshot().stats(messages)
    }

    pub fn has_summarizer(&self) -> bool {
        self.summarizer.is_some()
    }
}

fn validate_outcome(
    input_len: usize,
    outcome: CompressionOutcome,
) -> Result<CompressionOutcome, CompressionError> {
    if input_len > 0 && outcome.compressed_messages.is_empty() {
        return Err(CompressionError::EmptyResult { input_len });
    }
    Ok(outcome)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::events::FnObserver;
    use crate::context::manager::CompressionInfo;
    use crate::context::summarizer::{FnSummarizer, SummaryFuture};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Threshold of 12 tokens: anything but trivial input compresses.
    fn eager_config() -> CompressionConfig {
        CompressionConfig::new("unknown-model-xyz").with_threshold(0.0001)
    }

    fn chat(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::user(format!("message number {i} in this chat")))
            .collect()
    }

    fn counting(calls: Arc<AtomicUsize>) -> Arc<dyn Summarizer> {
        Arc::new(FnSummarizer::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("earlier chat".to_string()) }
        }))
    }

    fn recorder() -> (Arc<Mutex<Vec<CompressionEvent>>>, impl CompressionObserver) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let observer = FnObserver::new(move |e: &CompressionEvent| sink.lock().unwrap().push(e.clone()));
        (events, observer)
    }

    struct PanickingSummarizer;

    impl Summarizer for PanickingSummarizer {
        fn summarize(&self, messages: Vec<Message>) -> SummaryFuture<'_> {
            Box::pin(async move {
                let n = messages.len();
                if n > 0 {
                    panic!("summarizer exploded on {n} messages");
                }
                Ok(String::new())
            })
        }
    }

    #[tokio::test]
    async fn below_threshold_returns_same_allocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let middleware = CompressionMiddleware::new(CompressionConfig::default())
            .with_summarizer(counting(calls.clone()));
        let messages = chat(5);
        let ptr = messages.as_ptr();

        let result = middleware.check_and_compress(messages).await;
        assert!(!result.was_compressed);
        assert!(result.compression_info.is_none());
        assert_eq!(result.messages.as_ptr(), ptr);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn over_threshold_compresses_and_reports() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (events, observer) = recorder();
        let middleware = CompressionMiddleware::new(eager_config())
            .with_summarizer(counting(calls.clone()))
            .with_observer(observer);

        let result = middleware.check_and_compress(chat(10)).await;
        assert!(result.was_compressed);
        assert_eq!(result.messages.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!middleware.is_compressing());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CompressionEvent::Triggered { forced: false, threshold: 12, .. }));
        let CompressionEvent::Completed { info, .. } = &events[1] else {
            panic!("expected completed event, got {:?}", events[1]);
        };
        assert_eq!(Some(info), result.compression_info.as_ref());
    }

    #[tokio::test]
    async fn disabled_auto_compression_passes_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let middleware = CompressionMiddleware::new(eager_config().with_auto_compression(false))
            .with_summarizer(counting(calls.clone()));
        let messages = chat(10);
        let ptr = messages.as_ptr();

        let result = middleware.check_and_compress(messages).await;
        assert!(!result.was_compressed);
        assert_eq!(result.messages.as_ptr(), ptr);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let forced = middleware.force_compress(result.messages).await;
        assert!(forced.was_compressed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_bypasses_threshold() {
        let (events, observer) = recorder();
        let middleware = CompressionMiddleware::new(CompressionConfig::default()).with_observer(observer);
        let result = middleware.force_compress(chat(6)).await;
        assert!(result.was_compressed);
        assert_eq!(result.messages.len(), 4);
        assert!(matches!(
            events.lock().unwrap()[0],
            CompressionEvent::Triggered { forced: true, .. }
        ));
    }

    #[tokio::test]
    async fn second_call_during_compression_is_rejected() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let summarizer = {
            let gate = gate.clone();
            let calls = calls.clone();
            FnSummarizer::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok("held".to_string())
                }
            })
        };
        let middleware = CompressionMiddleware::new(eager_config()).with_summarizer(Arc::new(summarizer));

        let second_input = chat(10);
        let second_ptr = second_input.as_ptr();
        let (first, second) = tokio::join!(middleware.check_and_compress(chat(10)), async {
            let result = middleware.check_and_compress(second_input).await;
            gate.notify_one();
            result
        });

        assert!(first.was_compressed);
        assert!(!second.was_compressed);
        assert_eq!(second.messages.as_ptr(), second_ptr);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!middleware.is_compressing());
    }

    #[tokio::test]
    async fn panicking_summarizer_returns_original_messages() {
        let (events, observer) = recorder();
        let middleware = CompressionMiddleware::new(eager_config())
            .with_summarizer(Arc::new(PanickingSummarizer))
            .with_observer(observer);
        let messages = chat(10);
        let ptr = messages.as_ptr();

        let result = middleware.check_and_compress(messages).await;
        assert!(!result.was_compressed);
        assert_eq!(result.messages.as_ptr(), ptr);
        assert!(!middleware.is_compressing(), "guard must release after a panic");

        let events = events.lock().unwrap();
        let CompressionEvent::Failed { error, .. } = &events[1] else {
            panic!("expected failed event, got {:?}", events[1]);
        };
        assert!(error.contains("summarizer exploded"));
    }

    #[tokio::test]
    async fn panicking_observer_does_not_abort_compression() {
        let middleware = CompressionMiddleware::new(eager_config())
            .with_observer(FnObserver::new(|_: &CompressionEvent| panic!("observer bug")));
        let result = middleware.check_and_compress(chat(10)).await;
        assert!(result.was_compressed);
        assert!(!middleware.is_compressing());
    }

    #[tokio::test]
    async fn failing_summarizer_still_compresses() {
        let middleware = CompressionMiddleware::new(eager_config()).with_summarizer(Arc::new(
            FnSummarizer::new(|_| async {
                Err(crate::context::summarizer::SummarizeError::EmptyResponse)
            }),
        ));
        let result = middleware.check_and_compress(chat(10)).await;
        assert!(result.was_compressed);
        assert!(!result.messages.is_empty());
    }

    #[test]
    fn update_model_changes_threshold() {
        let middleware = CompressionMiddleware::new(CompressionConfig::default());
        assert_eq!(middleware.stats(&[]).threshold, 996_147);
        middleware.update_model("claude-sonnet-4");
        assert_eq!(middleware.config().model, "claude-sonnet-4");
        assert_eq!(middleware.stats(&[]).threshold, 190_000);
        assert!(!middleware.has_summarizer());
    }

    #[test]
    fn empty_result_for_nonempty_input_is_rejected() {
        let outcome = CompressionOutcome {
            compressed_messages: Vec::new(),
            compression_info: CompressionInfo::empty(),
        };
        let err = validate_outcome(3, outcome.clone()).unwrap_err();
        assert!(matches!(err, CompressionError::EmptyResult { input_len: 3 }));
        assert!(validate_outcome(0, outcome).is_ok());
    }

    #[test]
    fn guard_is_exclusive_and_releases() {
        let flag = AtomicBool::new(false);
        let guard = InFlightGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(InFlightGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(InFlightGuard::acquire(&flag).is_some());
    }

    #[test]
    fn middleware_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompressionMiddleware>();
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}

//! Scripted provider for tests and offline runs.
//!
//! ```ignore
//! let p = ScriptedProvider::new("primary")
//!     .then(Err(ProviderError::Timeout))
//!     .with_default(Ok("Hello".into()));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ProviderError, TranslationProvider};

/// Arguments of one `translate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

pub struct ScriptedProvider {
    name: String,
    /// Consumed front to back; `default` answers once it is empty.
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    default: Result<String, ProviderError>,
    detection: Result<String, ProviderError>,
    delay: Duration,
    translate_calls: AtomicUsize,
    detect_calls: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    /// Fails every call with a network error until scripted.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            default: Err(ProviderError::Network(format!("{name}: no script"))),
            name,
            script: Mutex::new(VecDeque::new()),
            detection: Err(ProviderError::Network("detection not scripted".into())),
            delay: Duration::ZERO,
            translate_calls: AtomicUsize::new(0),
            detect_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue one outcome for the next unscripted call.
    pub fn then(self, outcome: Result<String, ProviderError>) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    pub fn with_default(mut self, outcome: Result<String, ProviderError>) -> Self {
        self.default = outcome;
        self
    }

    pub fn with_detection(mut self, outcome: Result<String, ProviderError>) -> Self {
        self.detection = outcome;
        self
    }

    /// Simulated network latency applied to every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn translate_calls(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TranslationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(RecordedCall {
            text: text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.default.clone())
    }

    async fn detect_language(&self, _text: &str) -> Result<String, ProviderError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.detection.clone()
    }
}

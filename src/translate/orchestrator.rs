//! Translation orchestrator.
//! validate → resolve source language → pass-through / cache → throttled
//! provider chain in rounds with exponential backoff → cache write.
//! `translate` never fails outward: every outcome is a `TranslationResult`.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cache::{normalize_text, Fingerprint, TranslationCache};
use super::google::{GoogleCloudProvider, GoogleFreeProvider};
use super::language::{self, AUTO};
use super::libre::LibreTranslateProvider;
use super::rate_limit::RateLimiter;
use super::{
    Method, ProviderError, TranslateError, TranslationObserver, TranslationProvider,
    TranslationRequest, TranslationResult,
};
use crate::config::{Settings, SettingsHandle};
use crate::metrics::{metric_names, MetricsRegistry};

/// Longest server-requested pause honoured between rounds.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Remembered provider detections, keyed by blake3 of the normalized text.
const DETECTION_MEMO_SIZE: usize = 256;

/// Delay before round `round` (1-indexed): `base * 2^(round - 2)`, zero for the first.
pub fn backoff_delay(base: Duration, round: u32) -> Duration {
    if round < 2 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(round - 2).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Provider chain in priority order, built from the settings.
/// The authenticated API leads only when enabled and a credential is present.
pub fn provider_chain(
    settings: &Settings,
) -> Result<Vec<Arc<dyn TranslationProvider>>, ProviderError> {
    let timeout = settings.request_timeout();
    let mut chain: Vec<Arc<dyn TranslationProvider>> = Vec::new();

    if settings.use_official_api {
        match settings.credential() {
            Some(key) => chain.push(Arc::new(GoogleCloudProvider::new(key, timeout)?)),
            None => warn!("use_official_api is set but no api_key is configured"),
        }
    }
    chain.push(Arc::new(GoogleFreeProvider::new(timeout)?));
    chain.push(Arc::new(LibreTranslateProvider::new(
        settings.libre_url.clone(),
        settings.libre_api_key.clone(),
        timeout,
    )?));
    Ok(chain)
}

/// Request-scoped copy of the knobs read from settings.
struct Knobs {
    max_text_length: usize,
    max_retry_attempts: u32,
    retry_base_delay: Duration,
    request_timeout: Duration,
    min_interval: Duration,
}

impl Knobs {
    fn snapshot(settings: &SettingsHandle) -> Self {
        let settings = settings.read();
        Self {
            max_text_length: settings.max_text_length,
            max_retry_attempts: settings.max_retry_attempts,
            retry_base_delay: settings.retry_base_delay(),
            request_timeout: settings.request_timeout(),
            min_interval: settings.min_request_interval(),
        }
    }
}

pub struct Orchestrator {
    providers: Vec<Arc<dyn TranslationProvider>>,
    cache: Arc<TranslationCache>,
    limiter: RateLimiter,
    settings: SettingsHandle,
    observers: Vec<Arc<dyn TranslationObserver>>,
    metrics: Option<Arc<MetricsRegistry>>,
    detections: Mutex<LruCache<[u8; 32], String>>,
}

impl Orchestrator {
    pub fn new(
        providers: Vec<Arc<dyn TranslationProvider>>,
        cache: Arc<TranslationCache>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            providers,
            cache,
            limiter: RateLimiter::new(),
            settings,
            observers: Vec::new(),
            metrics: None,
            detections: Mutex::new(LruCache::new(
                NonZeroUsize::new(DETECTION_MEMO_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TranslationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    /// Translate one request and notify observers. Never fails outward.
    pub async fn translate(&self, request: &TranslationRequest) -> TranslationResult {
        let start = Instant::now();
        let result = self.run(request, start).await;

        if let Some(metrics) = &self.metrics {
            metrics.record(metric_names::TRANSLATE_DONE, result.elapsed_ms * 1000.0);
        }
        info!(
            request_id = %request.request_id,
            success = result.success,
            method = ?result.method,
            source = %result.resolved_source_lang,
            target = %result.target_lang,
            elapsed_ms = result.elapsed_ms,
            "translate_done"
        );
        for observer in &self.observers {
            observer.record(request, &result);
        }
        result
    }

    /// Resolve a source tag for `text`: script heuristic first, then the
    /// primary provider's detector. Returns `(resolved, detected)`.
    pub async fn detect_source(&self, text: &str) -> (String, Option<String>) {
        let knobs = Knobs::snapshot(&self.settings);
        self.resolve_source(text, AUTO, &knobs).await
    }

    async fn run(&self, request: &TranslationRequest, start: Instant) -> TranslationResult {
        let knobs = Knobs::snapshot(&self.settings);
        let target = request.target_lang.as_str();
        let text = normalize_text(&request.text);

        if text.is_empty() {
            return failure(request, &request.source_lang, None, TranslateError::EmptyText, start);
        }
        let len = text.chars().count();
        if len > knobs.max_text_length {
            let err = TranslateError::TextTooLong {
                len,
                max: knobs.max_text_length,
            };
            return failure(request, &request.source_lang, None, err, start);
        }

        let (source, detected) = self.resolve_source(&text, &request.source_lang, &knobs).await;

        if source.eq_ignore_ascii_case(target) {
            debug!(request_id = %request.request_id, lang = %source, "pass_through");
            return TranslationResult {
                request_id: request.request_id.clone(),
                success: true,
                translated_text: request.text.clone(),
                resolved_source_lang: source,
                target_lang: target.to_string(),
                detected_lang: detected,
                method: Some(Method::PassThrough),
                error_kind: None,
                error_message: None,
                elapsed_ms: elapsed_ms(start),
            };
        }

        let fp = Fingerprint::compute(&text, &source, target);
        if let Some(entry) = self.cache.lookup(&fp) {
            return TranslationResult {
                request_id: request.request_id.clone(),
                success: true,
                translated_text: entry.translated_text,
                resolved_source_lang: source,
                target_lang: target.to_string(),
                detected_lang: detected,
                method: Some(Method::Cache),
                error_kind: None,
                error_message: None,
                elapsed_ms: elapsed_ms(start),
            };
        }

        match self.run_chain(&request.request_id, &text, &source, target, &knobs).await {
            Ok((provider, translated)) => {
                self.cache.insert(fp, translated.clone());
                TranslationResult {
                    request_id: request.request_id.clone(),
                    success: true,
                    translated_text: translated,
                    resolved_source_lang: source,
                    target_lang: target.to_string(),
                    detected_lang: detected,
                    method: Some(Method::Provider(provider)),
                    error_kind: None,
                    error_message: None,
                    elapsed_ms: elapsed_ms(start),
                }
            }
            Err(err) => failure(request, &source, detected, err, start),
        }
    }

    async fn resolve_source(
        &self,
        text: &str,
        requested: &str,
        knobs: &Knobs,
    ) -> (String, Option<String>) {
        if requested != AUTO {
            return (requested.to_string(), None);
        }

        let guess = language::guess_language(text);
        if guess != AUTO {
            debug!(lang = guess, "source_from_script");
            return (guess.to_string(), Some(guess.to_string()));
        }

        let Some(primary) = self.providers.first() else {
            return (AUTO.to_string(), None);
        };
        let memo_key = *blake3::hash(text.as_bytes()).as_bytes();
        if let Some(tag) = self.detections.lock().get(&memo_key).cloned() {
            return (tag.clone(), Some(tag));
        }

        self.limiter.acquire(knobs.min_interval).await;
        let outcome = tokio::time::timeout(knobs.request_timeout, primary.detect_language(text))
            .await
            .unwrap_or(Err(ProviderError::Timeout));
        match outcome {
            Ok(tag) if !tag.trim().is_empty() => {
                let tag = tag.trim().to_string();
                debug!(provider = primary.name(), lang = %tag, "source_detected");
                self.detections.lock().put(memo_key, tag.clone());
                (tag.clone(), Some(tag))
            }
            Ok(_) => (AUTO.to_string(), None),
            Err(e) => {
                warn!(provider = primary.name(), error = %e, "detection failed, using heuristic");
                (AUTO.to_string(), None)
            }
        }
    }

    /// Rounds over the chain. Returns the winning provider's name and text.
    async fn run_chain(
        &self,
        request_id: &str,
        text: &str,
        source: &str,
        target: &str,
        knobs: &Knobs,
    ) -> Result<(String, String), TranslateError> {
        if self.providers.is_empty() {
            return Err(TranslateError::NoProviders);
        }

        let total_rounds = knobs.max_retry_attempts.saturating_add(1);
        // Providers that failed with a non-transient error sit out later rounds.
        let mut excluded: HashSet<usize> = HashSet::new();
        let mut round_errors: Vec<String> = Vec::new();
        let mut server_wait = Duration::ZERO;
        let mut rounds_run = 0;

        for round in 1..=total_rounds {
            if excluded.len() == self.providers.len() {
                break;
            }
            if round > 1 {
                let delay = backoff_delay(knobs.retry_base_delay, round).max(server_wait);
                info!(request_id, round, delay_ms = delay.as_millis() as u64, "retry_backoff");
                tokio::time::sleep(delay).await;
            }
            rounds_run = round;
            server_wait = Duration::ZERO;
            let mut last_error = String::new();

            for (idx, provider) in self.providers.iter().enumerate() {
                if excluded.contains(&idx) {
                    continue;
                }
                match self.attempt(provider.as_ref(), text, source, target, knobs).await {
                    Ok(translated) => {
                        debug!(request_id, round, provider = provider.name(), "provider_succeeded");
                        return Ok((provider.name().to_string(), translated));
                    }
                    Err(e) => {
                        warn!(request_id, round, provider = provider.name(), error = %e, "provider_failed");
                        if let ProviderError::RateLimited {
                            retry_after: Some(wait),
                        } = &e
                        {
                            server_wait = server_wait.max((*wait).min(MAX_RETRY_AFTER));
                        }
                        if !e.is_retryable() {
                            excluded.insert(idx);
                        }
                        last_error = format!("{}: {e}", provider.name());
                    }
                }
            }
            round_errors.push(format!("round {round}: {last_error}"));
        }

        Err(TranslateError::AllProvidersExhausted {
            rounds: rounds_run,
            message: round_errors.join("; "),
        })
    }

    async fn attempt(
        &self,
        provider: &dyn TranslationProvider,
        text: &str,
        source: &str,
        target: &str,
        knobs: &Knobs,
    ) -> Result<String, ProviderError> {
        self.limiter.acquire(knobs.min_interval).await;
        let call_start = Instant::now();
        let outcome = tokio::time::timeout(
            knobs.request_timeout,
            provider.translate(text, source, target),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout));

        if let Some(metrics) = &self.metrics {
            metrics.record(
                metric_names::PROVIDER_CALL,
                call_start.elapsed().as_micros() as f64,
            );
        }

        match outcome {
            Ok(t) if t.trim().is_empty() => {
                Err(ProviderError::MalformedResponse("empty translation".into()))
            }
            other => other,
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn failure(
    request: &TranslationRequest,
    source: &str,
    detected: Option<String>,
    err: TranslateError,
    start: Instant,
) -> TranslationResult {
    TranslationResult {
        request_id: request.request_id.clone(),
        success: false,
        translated_text: String::new(),
        resolved_source_lang: source.to_string(),
        target_lang: request.target_lang.clone(),
        detected_lang: detected,
        method: None,
        error_kind: Some(err.kind()),
        error_message: Some(err.to_string()),
        elapsed_ms: elapsed_ms(start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::ZERO);
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_saturates() {
        let d = backoff_delay(Duration::from_secs(1), 200);
        assert!(d >= Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn chain_order_follows_settings() {
        let plain = provider_chain(&Settings::default()).unwrap();
        let names: Vec<_> = plain.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, ["google", "libretranslate"]);

        let official = Settings {
            use_official_api: true,
            api_key: Some("k".into()),
            ..Settings::default()
        };
        let names: Vec<_> = provider_chain(&official)
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, ["google-cloud", "google", "libretranslate"]);

        let keyless = Settings {
            use_official_api: true,
            ..Settings::default()
        };
        assert_eq!(provider_chain(&keyless).unwrap().len(), 2);
    }
}

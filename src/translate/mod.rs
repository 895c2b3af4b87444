//! Translation core: request/result types, the provider seam, and the
//! orchestrator that strings heuristic, cache, throttle and providers together.

pub mod cache;
pub mod google;
pub mod language;
pub mod libre;
pub mod mock;
pub mod orchestrator;
pub mod rate_limit;
pub mod sqlite_cache;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One translation ask, usually built from a capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub request_id: String,
    pub text: String,
    /// Language tag or `auto`.
    pub source_lang: String,
    pub target_lang: String,
}

impl TranslationRequest {
    pub fn new(
        text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
        }
    }
}

/// How a successful result was produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Cache,
    Provider(String),
    PassThrough,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Cache => write!(f, "Cache"),
            Method::Provider(name) => write!(f, "Provider({name})"),
            Method::PassThrough => write!(f, "PassThrough"),
        }
    }
}

/// Outcome of one `translate` call. Failure is carried in the value, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub request_id: String,
    pub success: bool,
    pub translated_text: String,
    pub resolved_source_lang: String,
    pub target_lang: String,
    pub detected_lang: Option<String>,
    /// `None` for failures.
    pub method: Option<Method>,
    pub error_kind: Option<TranslateErrorKind>,
    pub error_message: Option<String>,
    pub elapsed_ms: f64,
}

impl TranslationResult {
    pub fn is_cached(&self) -> bool {
        self.method == Some(Method::Cache)
    }
}

/// Failure reported by a single provider attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A 4xx the provider will keep returning for this input.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl ProviderError {
    /// Transient causes: the provider stays eligible for the next round.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Network(_)
                | ProviderError::Timeout
                | ProviderError::MalformedResponse(_)
        )
    }

    /// Map a non-success HTTP status to an error class.
    pub fn from_status(status: reqwest::StatusCode, body: &str, retry_after: Option<Duration>) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status.as_u16() {
            401 | 403 => ProviderError::Unauthorized(format!("{status}: {snippet}")),
            429 => ProviderError::RateLimited { retry_after },
            408 => ProviderError::Timeout,
            s if status.is_server_error() => ProviderError::Network(format!("server error {s}: {snippet}")),
            s => ProviderError::Rejected {
                status: s,
                message: snippet,
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::MalformedResponse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Classification of request-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslateErrorKind {
    Input,
    AllProvidersExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("nothing to translate")]
    EmptyText,

    #[error("text is {len} characters, limit is {max}")]
    TextTooLong { len: usize, max: usize },

    #[error("no translation provider configured")]
    NoProviders,

    #[error("translation failed after {rounds} round(s): {message}")]
    AllProvidersExhausted { rounds: u32, message: String },
}

impl TranslateError {
    pub fn kind(&self) -> TranslateErrorKind {
        match self {
            TranslateError::EmptyText | TranslateError::TextTooLong { .. } => {
                TranslateErrorKind::Input
            }
            TranslateError::NoProviders | TranslateError::AllProvidersExhausted { .. } => {
                TranslateErrorKind::AllProvidersExhausted
            }
        }
    }
}

/// A translation backend. Implementations own their wire format.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Stable name reported in `Method::Provider`.
    fn name(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError>;

    async fn detect_language(&self, text: &str) -> Result<String, ProviderError>;
}

/// Receives every finished `(request, result)` pair. Must return quickly and never panic.
pub trait TranslationObserver: Send + Sync {
    fn record(&self, request: &TranslationRequest, result: &TranslationResult);
}

/// Pooled HTTP client shared by the provider implementations.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(timeout)
        .user_agent(concat!("snaptrans/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Network(e.to_string()))
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Send a request and decode a JSON body, classifying every failure.
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let wait = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status, &body, wait));
    }
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNAUTHORIZED, "bad key", None),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::FORBIDDEN, "", None),
            ProviderError::Unauthorized(_)
        ));
        assert_eq!(
            ProviderError::from_status(
                StatusCode::TOO_MANY_REQUESTS,
                "",
                Some(Duration::from_secs(2))
            ),
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_GATEWAY, "", None),
            ProviderError::Network(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_REQUEST, "nope", None),
            ProviderError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn retryable_classes() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Network("x".into()).is_retryable());
        assert!(ProviderError::MalformedResponse("x".into()).is_retryable());
        assert!(!ProviderError::Unauthorized("x".into()).is_retryable());
        assert!(!ProviderError::Rejected {
            status: 400,
            message: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn method_display() {
        assert_eq!(Method::Provider("google".into()).to_string(), "Provider(google)");
        assert_eq!(Method::PassThrough.to_string(), "PassThrough");
    }

    #[test]
    fn error_kinds() {
        assert_eq!(TranslateError::EmptyText.kind(), TranslateErrorKind::Input);
        assert_eq!(
            TranslateError::AllProvidersExhausted {
                rounds: 3,
                message: String::new()
            }
            .kind(),
            TranslateErrorKind::AllProvidersExhausted
        );
    }
}

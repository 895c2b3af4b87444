//! Google translation backends.
//! `GoogleFreeProvider` speaks to the keyless `translate_a/single` endpoint;
//! `GoogleCloudProvider` to the authenticated Cloud Translation v2 API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::language::AUTO;
use super::{http_client, send_json, ProviderError, TranslationProvider};

const FREE_URL: &str = "https://translate.googleapis.com/translate_a/single";
const CLOUD_URL: &str = "https://translation.googleapis.com/language/translate/v2";

pub struct GoogleFreeProvider {
    http: reqwest::Client,
    base_url: String,
}

impl GoogleFreeProvider {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: FREE_URL.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn query(&self, text: &str, source: &str, target: &str) -> Result<Value, ProviderError> {
        let request = self.http.get(&self.base_url).query(&[
            ("client", "gtx"),
            ("sl", source),
            ("tl", target),
            ("dt", "t"),
            ("q", text),
        ]);
        send_json(request).await
    }
}

/// Pull `(translation, detected source)` out of a `translate_a/single` payload:
/// `[[["Hello","Bonjour",..],..], null, "fr", ..]`.
pub fn parse_free_response(body: &Value) -> Result<(String, Option<String>), ProviderError> {
    let segments = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::MalformedResponse("missing segment array".into()))?;

    let translated: String = segments
        .iter()
        .filter_map(|seg| seg.get(0).and_then(Value::as_str))
        .collect();
    let detected = body.get(2).and_then(Value::as_str).map(str::to_string);

    if translated.trim().is_empty() {
        return Err(ProviderError::MalformedResponse("empty translation".into()));
    }
    Ok((translated, detected))
}

#[async_trait]
impl TranslationProvider for GoogleFreeProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        let body = self.query(text, source_lang, target_lang).await?;
        parse_free_response(&body).map(|(t, _)| t)
    }

    async fn detect_language(&self, text: &str) -> Result<String, ProviderError> {
        let body = self.query(text, AUTO, "en").await?;
        body.get(2)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::MalformedResponse("no detected language".into()))
    }
}

/// Cloud Translation v2, authenticated with an API key.
pub struct GoogleCloudProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleCloudProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Unauthorized("API key cannot be empty".into()));
        }
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            base_url: CLOUD_URL.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl std::fmt::Debug for GoogleCloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleCloudProvider")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .finish()
    }
}

pub fn parse_cloud_translation(body: &Value) -> Result<String, ProviderError> {
    let text = body["data"]["translations"][0]["translatedText"]
        .as_str()
        .ok_or_else(|| {
            ProviderError::MalformedResponse("missing data.translations[0].translatedText".into())
        })?;
    if text.trim().is_empty() {
        return Err(ProviderError::MalformedResponse("empty translation".into()));
    }
    Ok(text.to_string())
}

pub fn parse_cloud_detection(body: &Value) -> Result<String, ProviderError> {
    body["data"]["detections"][0][0]["language"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::MalformedResponse("missing data.detections[0][0].language".into()))
}

#[async_trait]
impl TranslationProvider for GoogleCloudProvider {
    fn name(&self) -> &str {
        "google-cloud"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        let mut body = json!({
            "q": text,
            "target": target_lang,
            "format": "text",
        });
        // Omitting `source` asks the API to detect it.
        if source_lang != AUTO {
            body["source"] = json!(source_lang);
        }
        let request = self
            .http
            .post(&self.base_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body);
        parse_cloud_translation(&send_json(request).await?)
    }

    async fn detect_language(&self, text: &str) -> Result<String, ProviderError> {
        let request = self
            .http
            .post(format!("{}/detect", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "q": text }));
        parse_cloud_detection(&send_json(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_response_joins_segments() {
        let body = json!([
            [["Hello. ", "Bonjour. ", null, null, 10], ["How are you?", "Comment ça va ?", null, null, 3]],
            null,
            "fr"
        ]);
        let (text, detected) = parse_free_response(&body).unwrap();
        assert_eq!(text, "Hello. How are you?");
        assert_eq!(detected.as_deref(), Some("fr"));
    }

    #[test]
    fn free_response_rejects_garbage() {
        assert!(matches!(
            parse_free_response(&json!({"error": "nope"})),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_free_response(&json!([[], null, "fr"])),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn cloud_payloads() {
        let t = json!({"data": {"translations": [{"translatedText": "Hello", "detectedSourceLanguage": "fr"}]}});
        assert_eq!(parse_cloud_translation(&t).unwrap(), "Hello");

        let d = json!({"data": {"detections": [[{"language": "de", "confidence": 0.98}]]}});
        assert_eq!(parse_cloud_detection(&d).unwrap(), "de");

        assert!(parse_cloud_translation(&json!({"data": {}})).is_err());
    }

    #[test]
    fn cloud_requires_key() {
        assert!(matches!(
            GoogleCloudProvider::new("  ", Duration::from_secs(1)),
            Err(ProviderError::Unauthorized(_))
        ));
    }
}

//! LibreTranslate client, used as the fallback backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{http_client, send_json, ProviderError, TranslationProvider};

pub struct LibreTranslateProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LibreTranslateProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn with_key(&self, mut body: Value) -> Value {
        if let Some(key) = &self.api_key {
            body["api_key"] = json!(key);
        }
        body
    }
}

#[derive(Deserialize)]
struct LibreTranslation {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[derive(Deserialize)]
struct LibreDetection {
    language: String,
    #[serde(default)]
    confidence: f64,
}

pub fn parse_translation(body: Value) -> Result<String, ProviderError> {
    let parsed: LibreTranslation = serde_json::from_value(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    if parsed.translated_text.trim().is_empty() {
        return Err(ProviderError::MalformedResponse("empty translation".into()));
    }
    Ok(parsed.translated_text)
}

/// Highest-confidence language from a `/detect` payload.
pub fn parse_detection(body: Value) -> Result<String, ProviderError> {
    let parsed: Vec<LibreDetection> = serde_json::from_value(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    parsed
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|d| d.language)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ProviderError::MalformedResponse("no detections".into()))
}

#[async_trait]
impl TranslationProvider for LibreTranslateProvider {
    fn name(&self) -> &str {
        "libretranslate"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        let body = self.with_key(json!({
            "q": text,
            "source": source_lang,
            "target": target_lang,
            "format": "text",
        }));
        let request = self
            .http
            .post(format!("{}/translate", self.base_url))
            .json(&body);
        parse_translation(send_json(request).await?)
    }

    async fn detect_language(&self, text: &str) -> Result<String, ProviderError> {
        let body = self.with_key(json!({ "q": text }));
        let request = self.http.post(format!("{}/detect", self.base_url)).json(&body);
        parse_detection(send_json(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_payload() {
        assert_eq!(
            parse_translation(json!({"translatedText": "Hello"})).unwrap(),
            "Hello"
        );
        assert!(matches!(
            parse_translation(json!({"translatedText": "  "})),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(parse_translation(json!({"error": "x"})).is_err());
    }

    #[test]
    fn detection_picks_highest_confidence() {
        let body = json!([
            {"language": "es", "confidence": 40.0},
            {"language": "fr", "confidence": 92.0}
        ]);
        assert_eq!(parse_detection(body).unwrap(), "fr");
        assert!(parse_detection(json!([])).is_err());
    }

    #[test]
    fn trailing_slash_and_blank_key_are_normalized() {
        let p = LibreTranslateProvider::new(
            "https://example.org/",
            Some(" ".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(p.base_url, "https://example.org");
        assert!(p.api_key.is_none());
    }
}

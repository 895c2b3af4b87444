//! Usage statistics: totals, per-day counts and language pairs.
//! Kept in memory, persisted as JSON on save.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::translate::sqlite_cache::StoreError;
use crate::translate::{TranslationObserver, TranslationRequest, TranslationResult};

/// Days of per-day counts retained.
pub const DAILY_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub translations: u64,
    pub characters: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageData {
    pub total_translations: u64,
    pub successful_translations: u64,
    pub failed_translations: u64,
    pub total_characters: u64,
    pub first_used: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub daily: BTreeMap<NaiveDate, DailyUsage>,
    /// Keyed `src->tgt`.
    pub language_pairs: HashMap<String, u64>,
    /// Keyed by `Method` display form, plus `Failed`.
    pub methods: HashMap<String, u64>,
}

impl UsageData {
    /// Percentage in `0..=100`; zero when nothing was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total_translations == 0 {
            return 0.0;
        }
        self.successful_translations as f64 / self.total_translations as f64 * 100.0
    }

    /// Ties break alphabetically so the answer is stable.
    pub fn most_used_pair(&self) -> Option<&str> {
        self.language_pairs
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(k, _)| k.as_str())
    }

    pub fn translations_on(&self, day: NaiveDate) -> u64 {
        self.daily.get(&day).map_or(0, |d| d.translations)
    }

    /// Sum over the week starting Sunday that contains `today`.
    pub fn translations_this_week(&self, today: NaiveDate) -> u64 {
        let start = today - ChronoDuration::days(today.weekday().num_days_from_sunday() as i64);
        self.daily.range(start..=today).map(|(_, d)| d.translations).sum()
    }

    pub fn translations_this_month(&self, today: NaiveDate) -> u64 {
        let start = today.with_day(1).unwrap_or(today);
        self.daily.range(start..=today).map(|(_, d)| d.translations).sum()
    }
}

pub struct UsageStatistics {
    data: Mutex<UsageData>,
    path: Option<PathBuf>,
}

impl UsageStatistics {
    /// Statistics that are never written to disk.
    pub fn in_memory() -> Self {
        Self {
            data: Mutex::new(UsageData::default()),
            path: None,
        }
    }

    /// Load from `path`; a missing or unreadable file starts fresh.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "usage statistics unreadable, starting fresh");
                UsageData::default()
            }),
            Err(_) => UsageData::default(),
        };
        Self {
            data: Mutex::new(data),
            path: Some(path.to_path_buf()),
        }
    }

    pub fn snapshot(&self) -> UsageData {
        self.data.lock().clone()
    }

    /// Record one finished translation as of `now`.
    pub fn record_at(&self, now: DateTime<Utc>, request: &TranslationRequest, result: &TranslationResult) {
        let chars = request.text.trim().chars().count() as u64;
        let today = now.with_timezone(&Local).date_naive();
        let mut d = self.data.lock();

        d.total_translations += 1;
        d.total_characters += chars;
        if result.success {
            d.successful_translations += 1;
        } else {
            d.failed_translations += 1;
        }
        d.first_used.get_or_insert(now);
        d.last_used = Some(now);

        let day = d.daily.entry(today).or_default();
        day.translations += 1;
        day.characters += chars;

        let pair = format!("{}->{}", result.resolved_source_lang, result.target_lang);
        *d.language_pairs.entry(pair).or_default() += 1;

        let method = result
            .method
            .as_ref()
            .map_or_else(|| "Failed".to_string(), |m| m.to_string());
        *d.methods.entry(method).or_default() += 1;

        let cutoff = today - ChronoDuration::days(DAILY_WINDOW_DAYS);
        d.daily.retain(|day, _| *day >= cutoff);
    }

    /// Write to the backing file, if any.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.data.lock())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "usage statistics saved");
        Ok(())
    }

    pub fn reset(&self) {
        *self.data.lock() = UsageData::default();
    }
}

impl TranslationObserver for UsageStatistics {
    fn record(&self, request: &TranslationRequest, result: &TranslationResult) {
        self.record_at(Utc::now(), request, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::Method;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn pair(text: &str, src: &str, ok: bool, method: Option<Method>) -> (TranslationRequest, TranslationResult) {
        let req = TranslationRequest::new(text, "auto", "en");
        let res = TranslationResult {
            request_id: req.request_id.clone(),
            success: ok,
            translated_text: if ok { "x".into() } else { String::new() },
            resolved_source_lang: src.into(),
            target_lang: "en".into(),
            detected_lang: None,
            method,
            error_kind: None,
            error_message: None,
            elapsed_ms: 0.0,
        };
        (req, res)
    }

    #[test]
    fn counts_totals_pairs_and_methods() {
        let stats = UsageStatistics::in_memory();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();

        let (r, x) = pair("Bonjour", "fr", true, Some(Method::Provider("google".into())));
        stats.record_at(now, &r, &x);
        let (r, x) = pair("Bonjour", "fr", true, Some(Method::Cache));
        stats.record_at(now, &r, &x);
        let (r, x) = pair("Hola", "es", false, None);
        stats.record_at(now, &r, &x);

        let d = stats.snapshot();
        assert_eq!(d.total_translations, 3);
        assert_eq!(d.successful_translations, 2);
        assert_eq!(d.failed_translations, 1);
        assert_eq!(d.total_characters, 18);
        assert_eq!(d.most_used_pair(), Some("fr->en"));
        assert_eq!(d.methods["Cache"], 1);
        assert_eq!(d.methods["Failed"], 1);
        assert!((d.success_rate() - 66.666).abs() < 0.01);
        let today = now.with_timezone(&Local).date_naive();
        assert_eq!(d.translations_on(today), 3);
        assert_eq!(d.translations_this_month(today), 3);
    }

    #[test]
    fn daily_counts_outside_window_are_dropped() {
        let stats = UsageStatistics::in_memory();
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let new = old + ChronoDuration::days(DAILY_WINDOW_DAYS + 5);
        let (r, x) = pair("a", "fr", true, Some(Method::Cache));
        stats.record_at(old, &r, &x);
        stats.record_at(new, &r, &x);

        let d = stats.snapshot();
        assert_eq!(d.daily.len(), 1);
        assert_eq!(d.total_translations, 2);
    }

    #[test]
    fn persists_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats/usage.json");
        let stats = UsageStatistics::load(&path);
        let (r, x) = pair("a", "fr", true, Some(Method::PassThrough));
        stats.record(&r, &x);
        stats.save().unwrap();

        let reloaded = UsageStatistics::load(&path);
        assert_eq!(reloaded.snapshot(), stats.snapshot());
        assert_eq!(UsageData::default().success_rate(), 0.0);
        assert_eq!(UsageData::default().most_used_pair(), None);
    }
}

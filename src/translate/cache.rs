//! In-memory translation cache with TTL and an LRU bound.
//! Key: blake3 over the length-prefixed (normalized text, source, target) triple.
//! Expiry is judged against the TTL configured *now*, not the one in force at
//! insert time, so shortening the TTL retires existing entries immediately.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sqlite_cache::SqliteCache;
use crate::config::SettingsHandle;

/// Content address of a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash `(normalize_text(text), source_lang, target_lang)`.
    pub fn compute(text: &str, source_lang: &str, target_lang: &str) -> Self {
        let normalized = normalize_text(text);
        let mut hasher = blake3::Hasher::new();
        for part in [normalized.as_str(), source_lang, target_lang] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Trim and unify line endings so cosmetic clipboard differences share a key.
pub fn normalize_text(text: &str) -> String {
    text.trim().replace("\r\n", "\n")
}

/// Wall-clock source in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    #[serde(skip)]
    pub fingerprint: Fingerprint,
    pub translated_text: String,
    pub created_at_ms: i64,
    pub last_accessed_at_ms: i64,
    pub access_count: u64,
    /// TTL in force when the entry was written. Expiry uses the live setting.
    pub ttl_minutes: u64,
}

impl CacheEntry {
    fn is_expired(&self, now_ms: i64, ttl_minutes: u64) -> bool {
        now_ms - self.created_at_ms > ttl_ms(ttl_minutes)
    }
}

fn ttl_ms(ttl_minutes: u64) -> i64 {
    (ttl_minutes as i64).saturating_mul(60_000)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct TranslationCache {
    inner: Mutex<LruCache<Fingerprint, CacheEntry>>,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    pub fn new(settings: SettingsHandle, clock: Arc<dyn Clock>) -> Self {
        let capacity = settings.read().cache_capacity;
        Self {
            inner: Mutex::new(LruCache::new(capacity_of(capacity))),
            settings,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_system_clock(settings: SettingsHandle) -> Self {
        Self::new(settings, Arc::new(SystemClock))
    }

    /// Live entry for `fp`, bumping its access metadata. Expired entries are evicted.
    pub fn lookup(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        let (enabled, ttl_minutes) = {
            let s = self.settings.read();
            (s.cache_enabled, s.cache_ttl_minutes)
        };
        if !enabled {
            return None;
        }

        let now = self.clock.now_ms();
        let mut cache = self.inner.lock();
        match cache.get_mut(fp) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) if !entry.is_expired(now, ttl_minutes) => {
                entry.last_accessed_at_ms = now;
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fp, access_count = entry.access_count, "cache_hit");
                return Some(entry.clone());
            }
            Some(_) => {}
        }

        cache.pop(fp);
        debug!(fingerprint = %fp, "cache_entry_expired");
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Create or overwrite the entry for `fp` with fresh timestamps.
    pub fn insert(&self, fp: Fingerprint, translated_text: String) {
        let (enabled, ttl_minutes, capacity) = {
            let s = self.settings.read();
            (s.cache_enabled, s.cache_ttl_minutes, s.cache_capacity)
        };
        if !enabled {
            return;
        }

        let now = self.clock.now_ms();
        let mut cache = self.inner.lock();
        if cache.cap().get() != capacity.max(1) {
            cache.resize(capacity_of(capacity));
        }
        cache.put(
            fp,
            CacheEntry {
                fingerprint: fp,
                translated_text,
                created_at_ms: now,
                last_accessed_at_ms: now,
                access_count: 1,
                ttl_minutes,
            },
        );
    }

    /// Remove every entry older than the current TTL. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let ttl_minutes = self.settings.read().cache_ttl_minutes;
        let now = self.clock.now_ms();
        let mut cache = self.inner.lock();
        let expired: Vec<Fingerprint> = cache
            .iter()
            .filter(|(_, e)| e.is_expired(now, ttl_minutes))
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), "cache_sweep");
        }
        expired.len()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
        info!("translation cache cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Copy of all entries, least recently used first.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let cache = self.inner.lock();
        cache.iter().rev().map(|(_, e)| e.clone()).collect()
    }

    /// Load persisted entries, skipping the ones already expired. Returns the count loaded.
    pub fn restore(&self, mut entries: Vec<CacheEntry>) -> usize {
        let ttl_minutes = self.settings.read().cache_ttl_minutes;
        let now = self.clock.now_ms();
        entries.sort_by_key(|e| e.last_accessed_at_ms);

        let mut cache = self.inner.lock();
        let mut loaded = 0;
        for entry in entries {
            if entry.is_expired(now, ttl_minutes) {
                continue;
            }
            cache.put(entry.fingerprint, entry);
            loaded += 1;
        }
        loaded
    }
}

fn capacity_of(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

/// Periodic sweep. Persists a fresh snapshot after sweeps that removed entries.
pub fn spawn_sweep_loop(
    cache: Arc<TranslationCache>,
    store: Option<Arc<SqliteCache>>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let interval =
                Duration::from_secs(cache.settings.read().cache_sweep_interval_secs.max(1));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    debug!("cache sweep loop stopped");
                    return;
                }
            }

            let removed = cache.sweep();
            if removed > 0 {
                if let Some(store) = &store {
                    if let Err(e) = store.save_snapshot(&cache.snapshot()) {
                        warn!(error = %e, "cache snapshot after sweep failed");
                    }
                }
            }
        }
    })
}

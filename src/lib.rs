//! snaptrans: select text anywhere, press a hotkey, read the translation.
//! Library: the capture and translate pipeline plus the wiring that starts it.

pub mod cancellation;
pub mod capture;
pub mod config;
pub mod history;
pub mod metrics;
pub mod scheduler;
pub mod state_machine;
pub mod stats;
pub mod translate;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use capture::x11::{XclipClipboard, XdotoolCopy};
use capture::{CaptureController, ClipboardPort, CopyTrigger};
use config::{ConfigError, Settings, SettingsHandle};
use history::{HistoryStore, DEFAULT_HISTORY_LIMIT};
use metrics::MetricsRegistry;
use scheduler::{Pipeline, ResultSink, Scheduler};
use stats::UsageStatistics;
use translate::cache::{spawn_sweep_loop, TranslationCache};
use translate::orchestrator::{provider_chain, Orchestrator};
use translate::sqlite_cache::{SqliteCache, StoreError};
use translate::{ProviderError, TranslationProvider};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("provider setup: {0}")]
    Provider(#[from] ProviderError),
}

/// Long-lived services shared by every command and hotkey press.
pub struct App {
    pub settings: SettingsHandle,
    pub metrics: Arc<MetricsRegistry>,
    pub cache: Arc<TranslationCache>,
    pub cache_store: Option<Arc<SqliteCache>>,
    pub history: Option<Arc<HistoryStore>>,
    pub stats: Arc<UsageStatistics>,
    pub orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
    background: Vec<JoinHandle<()>>,
    hotkeys: Option<JoinHandle<()>>,
}

impl App {
    /// Build with the provider chain derived from `settings`. Needs a tokio runtime.
    pub fn build(settings: Settings) -> Result<Self, AppError> {
        let providers = provider_chain(&settings)?;
        Self::with_providers(settings, providers)
    }

    pub fn with_providers(
        settings: Settings,
        providers: Vec<Arc<dyn TranslationProvider>>,
    ) -> Result<Self, AppError> {
        settings.validate()?;
        let data_dir = settings.resolved_data_dir();
        let settings = config::shared(settings);
        let metrics = Arc::new(MetricsRegistry::new());
        let shutdown = CancellationToken::new();

        let cache = Arc::new(TranslationCache::with_system_clock(settings.clone()));
        let (cache_store, history, stats) = match &data_dir {
            Some(dir) => {
                let store = Arc::new(SqliteCache::open(&dir.join("cache.db"))?);
                match store.load_all() {
                    Ok(rows) => {
                        let restored = cache.restore(rows);
                        info!(restored, "cache restored from disk");
                    }
                    Err(e) => warn!(error = %e, "cache load failed, starting empty"),
                }
                let history = HistoryStore::open(&dir.join("history.db"), DEFAULT_HISTORY_LIMIT)?;
                let stats = UsageStatistics::load(&dir.join("usage_statistics.json"));
                (Some(store), Some(history), Arc::new(stats))
            }
            None => {
                warn!("no data directory; cache, history and statistics are not persisted");
                (None, None, Arc::new(UsageStatistics::in_memory()))
            }
        };

        let mut orchestrator = Orchestrator::new(providers, Arc::clone(&cache), settings.clone())
            .with_metrics(Arc::clone(&metrics))
            .with_observer(Arc::clone(&stats) as Arc<dyn translate::TranslationObserver>);
        if let Some(h) = &history {
            orchestrator = orchestrator.with_observer(Arc::clone(h) as Arc<dyn translate::TranslationObserver>);
        }

        let background = vec![spawn_sweep_loop(
            Arc::clone(&cache),
            cache_store.clone(),
            shutdown.child_token(),
        )];

        info!(
            providers = ?orchestrator.provider_names(),
            cached = cache.len(),
            "snaptrans ready"
        );

        Ok(Self {
            settings,
            metrics,
            cache,
            cache_store,
            history,
            stats,
            orchestrator: Arc::new(orchestrator),
            shutdown,
            background,
            hotkeys: None,
        })
    }

    /// Capture controller on the given clipboard backends.
    pub fn capture_controller(
        &self,
        clipboard: Arc<dyn ClipboardPort>,
        copy: Arc<dyn CopyTrigger>,
    ) -> Arc<CaptureController> {
        Arc::new(
            CaptureController::new(clipboard, copy, self.settings.clone())
                .with_metrics(Arc::clone(&self.metrics)),
        )
    }

    /// Capture controller on xclip + xdotool.
    pub fn system_capture(&self) -> Arc<CaptureController> {
        self.capture_controller(Arc::new(XclipClipboard::new()), Arc::new(XdotoolCopy::new()))
    }

    /// Start the hotkey loop. Results for the newest press go to `sink`.
    pub fn start_hotkeys(
        &mut self,
        capture: Arc<CaptureController>,
        sink: Arc<dyn ResultSink>,
    ) -> Arc<Scheduler> {
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&self.metrics)));
        let pipeline = Arc::new(Pipeline::new(
            capture,
            Arc::clone(&self.orchestrator),
            sink,
            self.settings.clone(),
            Arc::clone(&self.metrics),
        ));
        if let Some(handle) = scheduler.spawn(pipeline, self.shutdown.child_token()) {
            self.hotkeys = Some(handle);
        }
        scheduler
    }

    /// Wait for the hotkey loop to finish. Returns once every `Scheduler` handle
    /// is dropped and in-flight presses have delivered.
    pub async fn drain_hotkeys(&mut self) {
        if let Some(handle) = self.hotkeys.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "hotkey loop failed");
            }
        }
    }

    /// Stop background loops, then persist the cache, history and statistics.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.background.into_iter().chain(self.hotkeys) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task failed");
            }
        }
        if let Some(store) = &self.cache_store {
            if let Err(e) = store.save_snapshot(&self.cache.snapshot()) {
                warn!(error = %e, "cache snapshot on shutdown failed");
            }
        }
        if let Some(history) = &self.history {
            history.close().await;
        }
        if let Err(e) = self.stats.save() {
            warn!(error = %e, "saving usage statistics failed");
        }
        for (stage, t) in self.metrics.summary() {
            info!(
                stage,
                count = t.count,
                p50_us = t.p50_us,
                p95_us = t.p95_us,
                max_us = t.max_us,
                "stage_timing"
            );
        }
        info!("snaptrans stopped");
    }
}

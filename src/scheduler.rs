//! Hotkey pipeline: trigger → capture → translate → deliver → restore.
//! Triggers go through a bounded tokio mpsc queue; each job then runs as its own
//! task so a slow request never blocks the next press. A newer press supersedes
//! older ones through the generation guard: they finish, but are not delivered.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cancellation::{GenerationGuard, TaskGeneration};
use crate::capture::{CaptureController, CaptureResult};
use crate::config::SettingsHandle;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::orchestrator::Orchestrator;
use crate::translate::{TranslationRequest, TranslationResult};

const QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct HotkeyJob {
    pub request_id: String,
    /// Overrides the configured target language for this press.
    pub target_lang: Option<String>,
    pub enqueued_at: Instant,
}

impl HotkeyJob {
    pub fn new(target_lang: Option<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            target_lang,
            enqueued_at: Instant::now(),
        }
    }
}

/// What the overlay is asked to show.
#[derive(Debug, Clone, Serialize)]
pub enum Delivery {
    /// Capture failed; the overlay shows "nothing to translate".
    NothingCaptured {
        request_id: String,
        capture: CaptureResult,
    },
    Translated {
        request_id: String,
        source_text: String,
        result: TranslationResult,
    },
}

/// The result overlay. Called only for the newest request.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, delivery: Delivery);
}

/// Forwards deliveries to a channel; the receiver renders them.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn deliver(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            debug!("result receiver dropped");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered,
    CaptureFailed,
    /// A newer press arrived; nothing was shown.
    Superseded,
}

/// Everything one job needs. Shared by all in-flight jobs.
pub struct Pipeline {
    capture: Arc<CaptureController>,
    orchestrator: Arc<Orchestrator>,
    sink: Arc<dyn ResultSink>,
    settings: SettingsHandle,
    metrics: Arc<MetricsRegistry>,
}

impl Pipeline {
    pub fn new(
        capture: Arc<CaptureController>,
        orchestrator: Arc<Orchestrator>,
        sink: Arc<dyn ResultSink>,
        settings: SettingsHandle,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            capture,
            orchestrator,
            sink,
            settings,
            metrics,
        }
    }

    pub async fn run(&self, job: HotkeyJob, guard: GenerationGuard) -> JobOutcome {
        let capture = self.capture.capture_async().await;

        if !capture.success {
            if !guard.should_continue() {
                return JobOutcome::Superseded;
            }
            self.sink.deliver(Delivery::NothingCaptured {
                request_id: job.request_id,
                capture,
            });
            return JobOutcome::CaptureFailed;
        }

        let (source_lang, target_lang, auto_restore) = {
            let s = self.settings.read();
            (
                s.source_lang.clone(),
                job.target_lang.clone().unwrap_or_else(|| s.target_lang.clone()),
                s.auto_restore_clipboard,
            )
        };
        let request = TranslationRequest {
            request_id: job.request_id.clone(),
            ..TranslationRequest::new(capture.captured_text.clone(), source_lang, target_lang)
        };

        // Runs to completion even if superseded so history/stats still see it.
        let result = self.orchestrator.translate(&request).await;

        if !guard.should_continue() {
            info!(
                request_id = %job.request_id,
                generation = guard.my_generation(),
                "result dropped: superseded"
            );
            return JobOutcome::Superseded;
        }

        let deliver_start = Instant::now();
        self.sink.deliver(Delivery::Translated {
            request_id: job.request_id.clone(),
            source_text: request.text,
            result,
        });
        self.metrics.record(
            metric_names::DELIVER_DONE,
            deliver_start.elapsed().as_micros() as f64,
        );

        if auto_restore {
            if let Err(e) = self
                .capture
                .restore_async(capture.original_clipboard_snapshot)
                .await
            {
                warn!(request_id = %job.request_id, error = %e, "clipboard restore failed");
            }
        }
        JobOutcome::Delivered
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("hotkey queue is full")]
    QueueFull,
    #[error("scheduler has shut down")]
    Closed,
}

pub struct Scheduler {
    tx: mpsc::Sender<HotkeyJob>,
    rx: parking_lot::Mutex<Option<mpsc::Receiver<HotkeyJob>>>,
    generations: Arc<TaskGeneration>,
    metrics: Arc<MetricsRegistry>,
}

impl Scheduler {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        Self {
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
            generations: Arc::new(TaskGeneration::new()),
            metrics,
        }
    }

    /// Enqueue a hotkey press. Never blocks; returns the request id.
    pub fn trigger(&self, target_lang: Option<String>) -> Result<String, SchedulerError> {
        let job = HotkeyJob::new(target_lang);
        let id = job.request_id.clone();
        match self.tx.try_send(job) {
            Ok(()) => Ok(id),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("hotkey queue full, press dropped");
                Err(SchedulerError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SchedulerError::Closed),
        }
    }

    pub fn generations(&self) -> &Arc<TaskGeneration> {
        &self.generations
    }

    /// Start the dispatch loop. Can be called once; later calls return `None`.
    /// The loop ends when the scheduler is dropped (in-flight jobs still deliver)
    /// or when `shutdown` fires (in-flight jobs are superseded).
    pub fn spawn(
        &self,
        pipeline: Arc<Pipeline>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let Some(mut rx) = self.rx.lock().take() else {
            error!("scheduler loop already started");
            return None;
        };
        let generations = Arc::clone(&self.generations);
        let metrics = Arc::clone(&self.metrics);

        Some(tokio::spawn(async move {
            info!("hotkey loop started");
            let mut jobs = tokio::task::JoinSet::new();
            let mut drain = true;
            loop {
                let job = tokio::select! {
                    biased;
                    job = rx.recv() => match job {
                        Some(job) => job,
                        // Every sender is gone: let in-flight jobs deliver.
                        None => break,
                    },
                    _ = shutdown.cancelled() => {
                        drain = false;
                        break;
                    }
                };
                metrics.record(
                    metric_names::QUEUE_WAIT,
                    job.enqueued_at.elapsed().as_micros() as f64,
                );
                let guard = generations.advance();
                debug!(
                    request_id = %job.request_id,
                    generation = guard.my_generation(),
                    "hotkey job dispatched"
                );
                let pipeline = Arc::clone(&pipeline);
                jobs.spawn(async move { pipeline.run(job, guard).await });

                // Reap finished jobs without waiting.
                while jobs.try_join_next().is_some() {}
            }
            if !drain {
                generations.cancel_all();
            }
            while jobs.join_next().await.is_some() {}
            info!("hotkey loop exiting");
        }))
    }
}

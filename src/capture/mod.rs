//! Selection capture via the system clipboard.
//! Snapshot, clear, send a synthetic copy, poll until text appears, restore on failure.
//! The whole handshake is one critical section: the clipboard has no per-request isolation.

pub mod memory;
pub mod x11;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CaptureSettings, SettingsHandle};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::state_machine::{CaptureFsm, CapturePhase};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("required tool not found: {0}")]
    ToolMissing(String),
    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },
}

/// OS text clipboard. Every call may fail transiently; callers retry.
pub trait ClipboardPort: Send + Sync {
    /// `None` when the clipboard holds no text.
    fn get_text(&self) -> Result<Option<String>, ClipboardError>;
    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;
    fn clear(&self) -> Result<(), ClipboardError>;
}

/// Asks the foreground application to copy its selection.
pub trait CopyTrigger: Send + Sync {
    fn send_copy(&self) -> Result<(), ClipboardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureErrorKind {
    ClipboardUnavailable,
    CopyFailed,
    NothingSelected,
    TooLong,
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("clipboard unavailable: {0}")]
    ClipboardUnavailable(ClipboardError),
    #[error("copy keystroke failed: {0}")]
    CopyFailed(ClipboardError),
    #[error("nothing selected (waited {waited_ms} ms)")]
    NothingSelected { waited_ms: u64 },
    #[error("selection too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },
    #[error("capture worker failed: {0}")]
    Internal(String),
}

impl CaptureError {
    pub fn kind(&self) -> CaptureErrorKind {
        match self {
            CaptureError::ClipboardUnavailable(_) => CaptureErrorKind::ClipboardUnavailable,
            CaptureError::CopyFailed(_) => CaptureErrorKind::CopyFailed,
            CaptureError::NothingSelected { .. } => CaptureErrorKind::NothingSelected,
            CaptureError::TooLong { .. } => CaptureErrorKind::TooLong,
            CaptureError::Internal(_) => CaptureErrorKind::Internal,
        }
    }
}

/// Outcome of one capture. Created per hotkey invocation, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub success: bool,
    pub captured_text: String,
    pub original_clipboard_snapshot: Option<String>,
    pub error_kind: Option<CaptureErrorKind>,
    pub error_message: Option<String>,
    /// Phases visited, for diagnostics.
    pub phases: Vec<CapturePhase>,
}

impl CaptureResult {
    fn captured(text: String, snapshot: Option<String>, phases: Vec<CapturePhase>) -> Self {
        Self {
            success: true,
            captured_text: text,
            original_clipboard_snapshot: snapshot,
            error_kind: None,
            error_message: None,
            phases,
        }
    }

    fn failed(err: &CaptureError, snapshot: Option<String>, phases: Vec<CapturePhase>) -> Self {
        Self {
            success: false,
            captured_text: String::new(),
            original_clipboard_snapshot: snapshot,
            error_kind: Some(err.kind()),
            error_message: Some(err.to_string()),
            phases,
        }
    }
}

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
fn with_retries<T>(
    attempts: u32,
    delay: Duration,
    what: &str,
    mut op: impl FnMut() -> Result<T, ClipboardError>,
) -> Result<T, ClipboardError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                debug!(op = what, attempt, error = %e, "clipboard_retry");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Put `snapshot` back on the clipboard; `None` means it was empty before.
fn put_back(
    clipboard: &dyn ClipboardPort,
    snapshot: Option<&str>,
    cfg: &CaptureSettings,
) -> Result<(), ClipboardError> {
    with_retries(cfg.clipboard_retries, cfg.retry_delay(), "restore", || match snapshot {
        Some(text) => clipboard.set_text(text),
        None => clipboard.clear(),
    })
}

/// Restores the snapshot when dropped unless disarmed. Covers early returns and unwinding.
struct RestoreGuard<'a> {
    clipboard: &'a dyn ClipboardPort,
    snapshot: Option<String>,
    cfg: &'a CaptureSettings,
    armed: bool,
}

impl<'a> RestoreGuard<'a> {
    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Restore now and report whether it worked.
    fn restore(mut self) -> bool {
        self.armed = false;
        match put_back(self.clipboard, self.snapshot.as_deref(), self.cfg) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "clipboard restore failed");
                false
            }
        }
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = put_back(self.clipboard, self.snapshot.as_deref(), self.cfg) {
                warn!(error = %e, "clipboard restore failed");
            }
        }
    }
}

/// Clipboard content a successful capture replaced and nobody has put back yet.
/// `None`: nothing owed. `Some(None)`: the clipboard was empty before.
type Owed = Option<Option<String>>;

pub struct CaptureController {
    clipboard: Arc<dyn ClipboardPort>,
    copy: Arc<dyn CopyTrigger>,
    settings: SettingsHandle,
    /// Serializes the handshake and holds the owed snapshot.
    section: Mutex<Owed>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl CaptureController {
    pub fn new(
        clipboard: Arc<dyn ClipboardPort>,
        copy: Arc<dyn CopyTrigger>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            clipboard,
            copy,
            settings,
            section: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Harvest the current selection. Blocks for at most the configured timeout
    /// plus clipboard retries; never panics on clipboard failure.
    pub fn capture(&self) -> CaptureResult {
        let mut owed = self.section.lock();
        let started = Instant::now();
        let (cfg, owe_back) = {
            let s = self.settings.read();
            (s.capture.clone(), s.auto_restore_clipboard)
        };
        let mut fsm = CaptureFsm::new();

        let snapshot = match owed.take() {
            // An earlier selection is still on the clipboard; the user's content is the owed one.
            Some(prior) => {
                debug!(had_content = prior.is_some(), "reusing unrestored snapshot");
                prior
            }
            None => match with_retries(
                cfg.clipboard_retries,
                cfg.retry_delay(),
                "snapshot",
                || self.clipboard.get_text(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    // Nothing was touched yet, so there is nothing to restore.
                    fsm.advance(CapturePhase::Failed);
                    fsm.advance(CapturePhase::Done);
                    let err = CaptureError::ClipboardUnavailable(e);
                    warn!(error = %err, "capture aborted before clearing clipboard");
                    return CaptureResult::failed(&err, None, fsm.history().to_vec());
                }
            },
        };
        fsm.advance(CapturePhase::SnapshotSaved);

        let mut guard = RestoreGuard {
            clipboard: self.clipboard.as_ref(),
            snapshot: snapshot.clone(),
            cfg: &cfg,
            armed: true,
        };

        let outcome = self
            .harvest(&cfg, &mut fsm)
            .and_then(|text| {
                let len = text.chars().count();
                if len > cfg.max_capture_length {
                    Err(CaptureError::TooLong {
                        len,
                        max: cfg.max_capture_length,
                    })
                } else {
                    Ok(text)
                }
            });

        if let Some(m) = &self.metrics {
            m.record(
                metric_names::CAPTURE_DONE,
                started.elapsed().as_micros() as f64,
            );
        }

        match outcome {
            Ok(text) => {
                guard.disarm();
                if owe_back {
                    *owed = Some(snapshot.clone());
                }
                fsm.advance(CapturePhase::Done);
                info!(
                    len = text.chars().count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "selection_captured"
                );
                CaptureResult::captured(text, snapshot, fsm.history().to_vec())
            }
            Err(err) => {
                if guard.restore() {
                    fsm.advance(CapturePhase::Restored);
                }
                fsm.advance(CapturePhase::Done);
                info!(kind = ?err.kind(), error = %err, "capture_failed");
                CaptureResult::failed(&err, snapshot, fsm.history().to_vec())
            }
        }
    }

    fn harvest(&self, cfg: &CaptureSettings, fsm: &mut CaptureFsm) -> Result<String, CaptureError> {
        if let Err(e) = with_retries(cfg.clipboard_retries, cfg.retry_delay(), "clear", || {
            self.clipboard.clear()
        }) {
            fsm.advance(CapturePhase::Failed);
            return Err(CaptureError::ClipboardUnavailable(e));
        }
        fsm.advance(CapturePhase::Cleared);

        if let Err(e) = self.copy.send_copy() {
            fsm.advance(CapturePhase::Failed);
            return Err(CaptureError::CopyFailed(e));
        }
        fsm.advance(CapturePhase::CopySent);
        fsm.advance(CapturePhase::Polling);

        let timeout = cfg.timeout();
        let poll = cfg.poll_interval();
        let started = Instant::now();
        let mut any_read_ok = false;
        let mut last_err = None;

        loop {
            match self.clipboard.get_text() {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    fsm.advance(CapturePhase::Captured);
                    return Ok(text.trim().to_string());
                }
                Ok(_) => any_read_ok = true,
                Err(e) => {
                    debug!(error = %e, "clipboard poll read failed");
                    last_err = Some(e);
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                break;
            }
            std::thread::sleep(poll.min(timeout - elapsed));
        }

        match last_err {
            // Every read failed: the clipboard is broken, not merely empty.
            Some(e) if !any_read_ok => {
                fsm.advance(CapturePhase::Failed);
                Err(CaptureError::ClipboardUnavailable(e))
            }
            _ => {
                fsm.advance(CapturePhase::TimedOut);
                Err(CaptureError::NothingSelected {
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Put a previously captured snapshot back. Caller-invoked after translation.
    /// Settles the owed snapshot only once the write succeeds.
    pub fn restore(&self, snapshot: Option<&str>) -> Result<(), ClipboardError> {
        let mut owed = self.section.lock();
        let cfg = self.settings.read().capture.clone();
        put_back(self.clipboard.as_ref(), snapshot, &cfg)?;
        *owed = None;
        debug!(had_content = snapshot.is_some(), "clipboard_restored");
        Ok(())
    }

    /// Run `capture` on the blocking pool.
    pub async fn capture_async(self: &Arc<Self>) -> CaptureResult {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.capture()).await {
            Ok(result) => result,
            Err(e) => {
                let err = CaptureError::Internal(e.to_string());
                CaptureResult::failed(&err, None, Vec::new())
            }
        }
    }

    pub async fn restore_async(
        self: &Arc<Self>,
        snapshot: Option<String>,
    ) -> Result<(), ClipboardError> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.restore(snapshot.as_deref()))
            .await
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryClipboard, ScriptedCopy};
    use super::*;
    use crate::config::{shared, Settings};
    use pretty_assertions::assert_eq;

    fn fast_settings() -> SettingsHandle {
        let mut s = Settings::default();
        s.capture.poll_interval_ms = 2;
        s.capture.timeout_ms = 200;
        s.capture.clipboard_retry_delay_ms = 1;
        s.capture.max_capture_length = 20;
        shared(s)
    }

    fn controller(clip: &Arc<MemoryClipboard>, copy: ScriptedCopy) -> CaptureController {
        CaptureController::new(clip.clone(), Arc::new(copy), fast_settings())
    }

    #[test]
    fn captures_trimmed_selection() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        let c = controller(&clip, ScriptedCopy::selecting(&clip, "  Bonjour \n"));

        let r = c.capture();
        assert!(r.success);
        assert_eq!(r.captured_text, "Bonjour");
        assert_eq!(r.original_clipboard_snapshot.as_deref(), Some("X"));
        // Not restored automatically on success.
        assert_eq!(clip.current().as_deref(), Some("  Bonjour \n"));
        assert_eq!(
            r.phases,
            vec![
                CapturePhase::Idle,
                CapturePhase::SnapshotSaved,
                CapturePhase::Cleared,
                CapturePhase::CopySent,
                CapturePhase::Polling,
                CapturePhase::Captured,
                CapturePhase::Done,
            ]
        );

        c.restore(r.original_clipboard_snapshot.as_deref()).unwrap();
        assert_eq!(clip.current().as_deref(), Some("X"));
    }

    #[test]
    fn timeout_restores_previous_clipboard() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        let c = controller(&clip, ScriptedCopy::nothing_selected());

        let r = c.capture();
        assert!(!r.success);
        assert_eq!(r.error_kind, Some(CaptureErrorKind::NothingSelected));
        assert_eq!(clip.current().as_deref(), Some("X"));
        assert!(r.phases.contains(&CapturePhase::TimedOut));
        assert!(r.phases.contains(&CapturePhase::Restored));
    }

    #[test]
    fn late_copy_within_timeout_is_captured() {
        let clip = Arc::new(MemoryClipboard::empty());
        let copy = ScriptedCopy::selecting(&clip, "late").with_delay(Duration::from_millis(10));
        let c = controller(&clip, copy);

        let r = c.capture();
        assert!(r.success, "{:?}", r.error_message);
        assert_eq!(r.captured_text, "late");
        assert_eq!(r.original_clipboard_snapshot, None);
    }

    #[test]
    fn oversize_selection_is_rejected_and_restored() {
        let clip = Arc::new(MemoryClipboard::with_text("keep"));
        let long = "a".repeat(21);
        let c = controller(&clip, ScriptedCopy::selecting(&clip, &long));

        let r = c.capture();
        assert!(!r.success);
        assert_eq!(r.error_kind, Some(CaptureErrorKind::TooLong));
        assert_eq!(clip.current().as_deref(), Some("keep"));
    }

    #[test]
    fn transient_snapshot_failures_are_retried() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        clip.fail_next_reads(2);
        let c = controller(&clip, ScriptedCopy::selecting(&clip, "sel"));

        let r = c.capture();
        assert!(r.success);
        assert_eq!(r.original_clipboard_snapshot.as_deref(), Some("X"));
    }

    #[test]
    fn unavailable_clipboard_aborts_without_clearing() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        clip.fail_next_reads(100);
        let c = controller(&clip, ScriptedCopy::selecting(&clip, "sel"));

        let r = c.capture();
        assert!(!r.success);
        assert_eq!(r.error_kind, Some(CaptureErrorKind::ClipboardUnavailable));
        clip.fail_next_reads(0);
        assert_eq!(clip.current().as_deref(), Some("X"));
        assert_eq!(clip.clears(), 0);
    }

    #[test]
    fn copy_failure_restores_snapshot() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        let c = controller(&clip, ScriptedCopy::failing());

        let r = c.capture();
        assert_eq!(r.error_kind, Some(CaptureErrorKind::CopyFailed));
        assert_eq!(clip.current().as_deref(), Some("X"));
    }

    #[test]
    fn empty_prior_clipboard_is_restored_as_empty() {
        let clip = Arc::new(MemoryClipboard::empty());
        let c = controller(&clip, ScriptedCopy::selecting(&clip, &"b".repeat(30)));

        let r = c.capture();
        assert_eq!(r.error_kind, Some(CaptureErrorKind::TooLong));
        assert_eq!(clip.current(), None);
    }

    #[test]
    fn concurrent_captures_do_not_interleave() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        let copy = ScriptedCopy::selecting(&clip, "sel").with_delay(Duration::from_millis(5));
        let c = Arc::new(controller(&clip, copy));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || c.capture())
            })
            .collect();
        for h in handles {
            let r = h.join().unwrap();
            assert!(r.success);
            assert_eq!(r.captured_text, "sel");
            // An interleaved capture would have snapshotted the cleared clipboard.
            assert_eq!(r.original_clipboard_snapshot.as_deref(), Some("X"));
        }
    }

    #[test]
    fn clear_failing_after_retries_is_unavailable_and_restores() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        // Every clear attempt fails; the restore write goes through.
        clip.fail_next_writes(3);
        let copy = Arc::new(ScriptedCopy::selecting(&clip, "sel"));
        let c = CaptureController::new(clip.clone(), copy.clone(), fast_settings());

        let r = c.capture();
        assert!(!r.success);
        assert_eq!(r.error_kind, Some(CaptureErrorKind::ClipboardUnavailable));
        assert_eq!(copy.sent(), 0);
        assert_eq!(clip.clears(), 0);
        assert_eq!(clip.current().as_deref(), Some("X"));
        assert!(r.phases.contains(&CapturePhase::Failed));
        assert!(r.phases.contains(&CapturePhase::Restored));
    }

    #[test]
    fn failed_restore_keeps_primary_error() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        // The clear succeeds, then every restore attempt fails.
        clip.fail_writes_after(1, 100);
        let c = controller(&clip, ScriptedCopy::nothing_selected());

        let r = c.capture();
        assert!(!r.success);
        assert_eq!(r.error_kind, Some(CaptureErrorKind::NothingSelected));
        assert!(r
            .error_message
            .as_deref()
            .is_some_and(|m| m.starts_with("nothing selected")));
        assert_eq!(r.original_clipboard_snapshot.as_deref(), Some("X"));
        assert!(!r.phases.contains(&CapturePhase::Restored));
        assert_eq!(r.phases.last(), Some(&CapturePhase::Done));
    }

    #[test]
    fn unrestored_capture_hands_its_snapshot_to_the_next() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        let c = controller(&clip, ScriptedCopy::selecting(&clip, "sel"));

        let first = c.capture();
        assert_eq!(first.original_clipboard_snapshot.as_deref(), Some("X"));
        // The first selection is still on the clipboard when the second press lands.
        let second = c.capture();
        assert!(second.success);
        assert_eq!(second.original_clipboard_snapshot.as_deref(), Some("X"));

        c.restore(second.original_clipboard_snapshot.as_deref()).unwrap();
        assert_eq!(clip.current().as_deref(), Some("X"));

        // Settled: a later capture snapshots the clipboard afresh.
        clip.put(Some("Y".into()));
        let third = c.capture();
        assert_eq!(third.original_clipboard_snapshot.as_deref(), Some("Y"));
    }

    #[test]
    fn nothing_is_owed_when_auto_restore_is_off() {
        let clip = Arc::new(MemoryClipboard::with_text("X"));
        let settings = fast_settings();
        settings.write().auto_restore_clipboard = false;
        let c = CaptureController::new(
            clip.clone(),
            Arc::new(ScriptedCopy::selecting(&clip, "sel")),
            settings,
        );

        assert!(c.capture().success);
        let second = c.capture();
        assert_eq!(second.original_clipboard_snapshot.as_deref(), Some("sel"));
    }
}

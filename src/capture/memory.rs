//! In-process clipboard and copy trigger for tests and headless runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{ClipboardError, ClipboardPort, CopyTrigger};

#[derive(Default)]
pub struct MemoryClipboard {
    content: Mutex<Option<String>>,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
    passing_writes: AtomicUsize,
    clears: AtomicUsize,
}

impl MemoryClipboard {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let clip = Self::default();
        clip.put(Some(text.to_string()));
        clip
    }

    /// Current content, bypassing fault injection.
    pub fn current(&self) -> Option<String> {
        self.content.lock().clone()
    }

    /// Replace the content, bypassing fault injection. Models another application writing.
    pub fn put(&self, text: Option<String>) {
        *self.content.lock() = text;
    }

    /// Make the next `n` reads fail. `0` heals the clipboard.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` writes (set or clear) fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes_after(0, n);
    }

    /// Let `ok` more writes through, then fail the `n` after them.
    pub fn fail_writes_after(&self, ok: usize, n: usize) {
        self.passing_writes.store(ok, Ordering::SeqCst);
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Successful `clear` calls so far.
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn write_fault(&self) -> bool {
        !Self::take_fault(&self.passing_writes) && Self::take_fault(&self.failing_writes)
    }
}

impl ClipboardPort for MemoryClipboard {
    fn get_text(&self) -> Result<Option<String>, ClipboardError> {
        if Self::take_fault(&self.failing_reads) {
            return Err(ClipboardError::Unavailable("injected read failure".into()));
        }
        Ok(self.current())
    }

    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        if self.write_fault() {
            return Err(ClipboardError::Unavailable("injected write failure".into()));
        }
        self.put(Some(text.to_string()));
        Ok(())
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        if self.write_fault() {
            return Err(ClipboardError::Unavailable("injected write failure".into()));
        }
        self.put(None);
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plays the foreground application: on copy, writes a fixed selection (or nothing).
pub struct ScriptedCopy {
    target: Option<Arc<MemoryClipboard>>,
    selection: Option<String>,
    delay: Duration,
    fail: bool,
    sent: AtomicUsize,
}

impl ScriptedCopy {
    pub fn selecting(clipboard: &Arc<MemoryClipboard>, selection: &str) -> Self {
        Self {
            target: Some(Arc::clone(clipboard)),
            selection: Some(selection.to_string()),
            delay: Duration::ZERO,
            fail: false,
            sent: AtomicUsize::new(0),
        }
    }

    /// The application has no selection and never writes.
    pub fn nothing_selected() -> Self {
        Self {
            target: None,
            selection: None,
            delay: Duration::ZERO,
            fail: false,
            sent: AtomicUsize::new(0),
        }
    }

    /// The keystroke itself cannot be delivered.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::nothing_selected()
        }
    }

    /// Application response time; the write lands on a background thread.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl CopyTrigger for ScriptedCopy {
    fn send_copy(&self) -> Result<(), ClipboardError> {
        if self.fail {
            return Err(ClipboardError::Tool {
                tool: "copy",
                message: "injected failure".into(),
            });
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        let (Some(target), Some(selection)) = (&self.target, &self.selection) else {
            return Ok(());
        };
        if self.delay.is_zero() {
            target.put(Some(selection.clone()));
        } else {
            let target = Arc::clone(target);
            let selection = selection.clone();
            let delay = self.delay;
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                target.put(Some(selection));
            });
        }
        Ok(())
    }
}

//! Phases of the clipboard capture handshake:
//! Idle → SnapshotSaved → Cleared → CopySent → Polling → {Captured | TimedOut} → Restored? → Done.
//! `Failed` is entered from any active phase when a clipboard or input step gives up.

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CapturePhase {
    Idle,
    SnapshotSaved,
    Cleared,
    CopySent,
    Polling,
    Captured,
    TimedOut,
    Failed,
    Restored,
    Done,
}

impl std::fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl CapturePhase {
    /// Returns whether moving from `self` to `next` is valid.
    pub fn can_transition_to(self, next: CapturePhase) -> bool {
        use CapturePhase::*;
        matches!(
            (self, next),
            (Idle, SnapshotSaved)
                | (SnapshotSaved, Cleared)
                | (Cleared, CopySent)
                | (CopySent, Polling)
                | (Polling, Captured)
                | (Polling, TimedOut)
                | (Idle | SnapshotSaved | Cleared | CopySent | Polling, Failed)
                // oversize captures are rejected after the fact and restored
                | (Captured | TimedOut | Failed, Restored)
                | (Captured | TimedOut | Failed | Restored, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == CapturePhase::Done
    }
}

/// Per-invocation phase tracker. Each capture owns one; no sharing.
#[derive(Debug)]
pub struct CaptureFsm {
    phase: CapturePhase,
    history: Vec<CapturePhase>,
}

impl CaptureFsm {
    pub fn new() -> Self {
        Self {
            phase: CapturePhase::Idle,
            history: vec![CapturePhase::Idle],
        }
    }

    pub fn current(&self) -> CapturePhase {
        self.phase
    }

    /// Phases visited so far, in order.
    pub fn history(&self) -> &[CapturePhase] {
        &self.history
    }

    /// Attempt a transition. Invalid moves are logged and leave the phase unchanged.
    pub fn advance(&mut self, next: CapturePhase) -> bool {
        if !self.phase.can_transition_to(next) {
            warn!(from = %self.phase, to = %next, "invalid capture transition");
            return false;
        }
        debug!(from = %self.phase, to = %next, "capture_phase");
        self.phase = next;
        self.history.push(next);
        true
    }
}

impl Default for CaptureFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::CapturePhase::*;
    use super::*;

    #[test]
    fn happy_path() {
        let mut fsm = CaptureFsm::new();
        for p in [SnapshotSaved, Cleared, CopySent, Polling, Captured, Done] {
            assert!(fsm.advance(p));
        }
        assert!(fsm.current().is_terminal());
        assert_eq!(fsm.history().len(), 7);
    }

    #[test]
    fn timeout_path_restores() {
        let mut fsm = CaptureFsm::new();
        for p in [SnapshotSaved, Cleared, CopySent, Polling, TimedOut, Restored, Done] {
            assert!(fsm.advance(p));
        }
    }

    #[test]
    fn rejects_skipping_phases() {
        let mut fsm = CaptureFsm::new();
        assert!(!fsm.advance(Polling));
        assert_eq!(fsm.current(), Idle);
        assert!(!Done.can_transition_to(Idle));
        assert!(!Captured.can_transition_to(Polling));
    }
}

//! Generation guard for hotkey requests.
//! Each new hotkey press advances the generation and cancels the previous token,
//! so a superseded request can finish its work but never deliver its result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub struct TaskGeneration {
    current_token: Mutex<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self {
            current_token: Mutex::new(CancellationToken::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel the in-flight request (if any) and issue a guard for a new one.
    pub fn advance(&self) -> GenerationGuard {
        let mut token_guard = self.current_token.lock();
        token_guard.cancel();
        let token = CancellationToken::new();
        *token_guard = token.clone();
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationGuard {
            generation: Arc::clone(&self.generation),
            my_generation: gen,
            token,
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cancel the in-flight request without starting a new one.
    pub fn cancel_all(&self) {
        self.current_token.lock().cancel();
    }
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked by a request before it delivers anything user-visible.
#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_generation_supersedes_older() {
        let gens = TaskGeneration::new();
        let first = gens.advance();
        assert!(first.should_continue());

        let second = gens.advance();
        assert!(!first.is_current());
        assert!(first.is_cancelled());
        assert!(second.should_continue());
        assert_eq!(second.my_generation(), 2);
        assert_eq!(gens.current_generation(), 2);
    }

    #[test]
    fn cancel_all_stops_current() {
        let gens = TaskGeneration::new();
        let g = gens.advance();
        gens.cancel_all();
        assert!(g.is_current());
        assert!(!g.should_continue());
    }
}

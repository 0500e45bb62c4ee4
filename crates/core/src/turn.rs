//! Turn tokens and the session turn sequence
//!
//! Cancellation in the pipeline is cooperative: every reply/synthesis attempt
//! is stamped with a [`TurnToken`] at creation, and every stage checks the
//! token against the session's [`TurnSequence`] at its boundaries. Advancing
//! the sequence invalidates all outstanding tokens at once; stale results are
//! dropped wherever they surface, even if a slow provider delivers them late.

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle identifying one reply-generation/synthesis attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnToken {
    turn: u64,
}

impl TurnToken {
    /// The turn identifier this token was stamped with
    pub fn turn(&self) -> u64 {
        self.turn
    }
}

/// Monotonically increasing turn identifier for one session.
///
/// Shared by all stages of a session; never reset.
#[derive(Debug, Default)]
pub struct TurnSequence {
    current: AtomicU64,
}

impl TurnSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current turn identifier
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Mint a token stamped with the current turn identifier
    pub fn mint(&self) -> TurnToken {
        TurnToken {
            turn: self.current(),
        }
    }

    /// Advance to the next turn, invalidating every outstanding token.
    /// Returns the new current turn identifier.
    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a token was minted before the current turn
    pub fn is_stale(&self, token: TurnToken) -> bool {
        token.turn < self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_invalidates_tokens() {
        let seq = TurnSequence::new();
        let t0 = seq.mint();
        assert!(!seq.is_stale(t0));

        seq.advance();
        assert!(seq.is_stale(t0));

        let t1 = seq.mint();
        assert!(!seq.is_stale(t1));
        assert_eq!(t1.turn(), 1);
    }

    #[test]
    fn test_tokens_compare_by_turn() {
        let seq = TurnSequence::new();
        let a = seq.mint();
        let b = seq.mint();
        assert_eq!(a, b);
        seq.advance();
        assert_ne!(seq.mint(), a);
    }
}

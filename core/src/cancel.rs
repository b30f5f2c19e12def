//! Cooperative cancellation signal for long-running proof-of-work.
//!
//! Replaces the shared-boolean-flag pattern (spec.md §9 REDESIGN FLAGS)
//! with a small token type: one-shot `set`, idempotent `is_set`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        assert!(!CancelToken::new().is_set());
    }

    #[test]
    fn set_is_observable_from_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.set();
        assert!(token.is_set());
    }
}

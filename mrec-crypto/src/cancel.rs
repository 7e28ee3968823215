//! Cooperative cancellation.
//!
//! A [`CancelToken`] is an atomic flag shared between the caller and a
//! long-running operation. The operation polls it at its natural
//! boundaries (chunk boundaries in the streaming codec, primality
//! rounds in key derivation) and stops cleanly when it is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_visible_through_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}

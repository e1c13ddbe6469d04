//! Process-wide shutdown signalling
//!
//! Loops check the flag between iterations and exit cleanly; background
//! metric recording is suppressed once the flag is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cooperative shutdown flag
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every loop to exit at its next check
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_set());

        let clone = shutdown.clone();
        clone.trigger();
        assert!(shutdown.is_set());
    }
}

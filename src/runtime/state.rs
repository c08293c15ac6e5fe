//! Host-side state shared with a supervisor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reset-requested flag.
///
/// Scripts raise it through `ESP32.reset()`; a supervisor holding a clone
/// polls it from any thread and restarts the environment. Raising the flag
/// does not stop the running script.
#[derive(Debug, Clone, Default)]
pub struct ResetSignal(Arc<AtomicBool>);

impl ResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let signal = ResetSignal::new();
        let supervisor = signal.clone();
        assert!(!supervisor.is_requested());

        signal.request();
        assert!(supervisor.is_requested());
        assert!(supervisor.take());
        assert!(!signal.is_requested());
        assert!(!supervisor.take());
    }

    #[test]
    fn test_visible_across_threads() {
        let signal = ResetSignal::new();
        let remote = signal.clone();
        std::thread::spawn(move || remote.request()).join().unwrap();
        assert!(signal.is_requested());
    }
}

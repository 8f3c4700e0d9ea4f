use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation token threaded through the pipeline.
///
/// Set once (usually from a ctrl-c handler) and checked before each
/// query and each channel. Never preemptive: in-flight browser work
/// runs to completion before the request is honored.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_shared_between_clones() {
        let flag = ShutdownFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_requested());
        flag.request();
        assert!(observer.is_requested());
    }
}

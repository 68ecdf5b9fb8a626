use std::sync::atomic::{AtomicBool, Ordering};

/// Whether sandboxes from the previous shim generation can still exist.
///
/// Owned by whatever runs the migration; the coordinator only asks.
pub trait LegacyCleanup: Send + Sync {
    fn done(&self) -> bool;
}

/// Settable [`LegacyCleanup`] flag.
#[derive(Debug, Default)]
pub struct LegacyCleanupFlag(AtomicBool);

impl LegacyCleanupFlag {
    #[must_use]
    pub fn new(done: bool) -> Self {
        Self(AtomicBool::new(done))
    }

    pub fn mark_done(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl LegacyCleanup for LegacyCleanupFlag {
    fn done(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

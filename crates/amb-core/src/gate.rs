use std::sync::atomic::{AtomicBool, Ordering};

use crate::moderation::AdminGrant;

/// Process-wide speed-dating mode.
///
/// Starts inactive. Only an admin can toggle it; the free-text handler reads
/// it to decide whether non-command messages are accepted.
#[derive(Debug, Default)]
pub struct SessionGate {
    active: AtomicBool,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the previous state.
    pub fn open(&self, grant: &AdminGrant) -> bool {
        tracing::info!(by = %grant.handle(), "speed dating session opened");
        self.active.swap(true, Ordering::SeqCst)
    }

    /// Returns the previous state.
    pub fn close(&self, grant: &AdminGrant) -> bool {
        tracing::info!(by = %grant.handle(), "speed dating session closed");
        self.active.swap(false, Ordering::SeqCst)
    }
}

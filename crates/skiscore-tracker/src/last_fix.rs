//! Most recent fix, readable from any thread.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::LocationFix;

/// Shared holder for the latest fix seen by the engine.
///
/// The emergency export reads this on demand instead of subscribing to
/// snapshots. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct LastKnownFix {
    inner: Arc<RwLock<Option<LocationFix>>>,
}

impl LastKnownFix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time read; `None` until the first fix arrives.
    pub fn get(&self) -> Option<LocationFix> {
        *self.inner.read()
    }

    pub(crate) fn set(&self, fix: LocationFix) {
        *self.inner.write() = Some(fix);
    }
}

//! Session persistence seam.

use skiscore_core::DatabaseError;

use crate::types::SessionRecord;

/// Accepts finished sessions for persistence.
///
/// Implementations may block; the engine calls `insert` from a blocking
/// worker and never waits on it while stopping. Retrying transient
/// failures is the store's job, not the engine's.
pub trait SessionStore: Send + Sync {
    /// Persist a record, returning its storage id.
    ///
    /// # Errors
    /// Returns a `DatabaseError` if the record could not be written.
    fn insert(&self, record: &SessionRecord) -> Result<i64, DatabaseError>;
}

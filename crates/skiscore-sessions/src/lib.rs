//! Local history of finished ski sessions.
//!
//! `SqliteSessionStore` implements the tracker's `SessionStore` seam and adds
//! the read side used by the history views: listing and season totals.

pub mod retry;
pub mod session_store;

pub use retry::{with_retry, RetryConfig, RetryDecision};
pub use session_store::{SeasonSummary, SqliteSessionStore, StoredSession};

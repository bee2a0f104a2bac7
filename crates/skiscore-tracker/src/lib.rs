//! GPS ski-run tracking for SkiScore
//!
//! Turns a stream of location fixes into live run statistics, telling
//! downhill skiing apart from chairlift rides, and hands a finished
//! session record to a store when tracking stops.

pub mod distance;
pub mod engine;
pub mod error;
pub mod export;
pub mod last_fix;
pub mod session;
pub mod source;
pub mod store;
pub mod types;

pub use engine::{TrackerEvent, TrackingEngine};
pub use error::TrackerError;
pub use export::emergency_message;
pub use last_fix::LastKnownFix;
pub use session::{FixOutcome, SessionState};
pub use source::{ForwardingSource, LocationRequest, LocationSource, ReplaySource};
pub use store::SessionStore;
pub use types::*;

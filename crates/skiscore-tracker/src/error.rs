//! Tracker-specific error types.

use skiscore_core::{AppError, LocationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The location source refused the subscription; needs user action.
    #[error("Location unavailable: {0}")]
    LocationUnavailable(#[from] LocationError),

    /// The session task ended before answering.
    #[error("Tracking session ended unexpectedly")]
    EngineStopped,
}

impl TrackerError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::LocationUnavailable(e) => e.user_message(),
            Self::EngineStopped => "Tracking stopped unexpectedly. Please start a new session.",
        }
    }
}

impl From<TrackerError> for AppError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::LocationUnavailable(e) => AppError::Location(e),
            other => AppError::Other(anyhow::Error::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_error_converts() {
        let err: TrackerError = LocationError::PermissionDenied.into();
        assert!(matches!(
            err,
            TrackerError::LocationUnavailable(LocationError::PermissionDenied)
        ));
        assert!(err.user_message().contains("permission"));
    }

    #[test]
    fn test_display_keeps_context() {
        let err = TrackerError::LocationUnavailable(LocationError::Other("no fix provider".into()));
        assert!(err.to_string().contains("no fix provider"));
    }

    #[test]
    fn test_app_error_keeps_location_message() {
        let app: AppError = TrackerError::LocationUnavailable(LocationError::ServiceUnavailable).into();
        assert!(matches!(app, AppError::Location(LocationError::ServiceUnavailable)));
        assert_eq!(app.user_message(), LocationError::ServiceUnavailable.user_message());

        let app: AppError = TrackerError::EngineStopped.into();
        assert!(matches!(app, AppError::Other(_)));
        assert!(app.to_string().contains("ended unexpectedly"));
    }
}

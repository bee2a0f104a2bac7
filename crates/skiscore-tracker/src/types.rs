use serde::{Deserialize, Serialize};

/// A single position report from the location source.
///
/// Altitude and speed are optional because not every positioning chip
/// reports them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Milliseconds (wall clock or monotonic, consistent within a session)
    pub timestamp_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Doppler speed from the chip, meters/second
    #[serde(default)]
    pub reported_speed: Option<f64>,
    /// Horizontal accuracy radius, meters
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl LocationFix {
    pub fn new(timestamp_ms: i64, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp_ms,
            latitude,
            longitude,
            altitude: None,
            reported_speed: None,
            accuracy: None,
        }
    }

    pub fn with_altitude(mut self, meters: f64) -> Self {
        self.altitude = Some(meters);
        self
    }

    pub fn with_reported_speed(mut self, meters_per_second: f64) -> Self {
        self.reported_speed = Some(meters_per_second);
        self
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy = Some(meters);
        self
    }

    /// Altitude with a missing reading treated as sea level.
    pub fn altitude_or_zero(&self) -> f64 {
        self.altitude.unwrap_or(0.0)
    }
}

/// Live statistics delivered to the UI about once per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub instant_speed_kmh: f64,
    pub distance_km: f64,
    pub elapsed_ms: u64,
    pub max_speed_kmh: f64,
    pub avg_speed_kmh: f64,
    pub is_riding_lift: bool,
    pub altitude_m: f64,
}

/// Summary of a finished session, created once when tracking stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session start, milliseconds since the Unix epoch
    pub start_timestamp_ms: i64,
    pub duration_ms: u64,
    pub max_speed_kmh: f64,
    /// Average while descending; lift rides and stops excluded
    pub avg_speed_kmh: f64,
    pub total_distance_km: f64,
    pub last_altitude_m: f64,
}

/// Format a duration as `HH:MM:SS`, the way the stopwatch and diary show it.
pub fn format_elapsed(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

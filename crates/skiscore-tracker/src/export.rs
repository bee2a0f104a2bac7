//! Emergency export of the last known position.

use crate::types::LocationFix;

/// Plain-text distress message for sharing through any messaging app.
///
/// Falls back to a position-less message when no fix has been received.
pub fn emergency_message(fix: Option<&LocationFix>) -> String {
    match fix {
        Some(fix) => format!(
            "EMERGENCY: I need help. My position: https://maps.google.com/?q={:.6},{:.6} - Altitude: {:.0}m.",
            fix.latitude,
            fix.longitude,
            fix.altitude_or_zero()
        ),
        None => "EMERGENCY: I need help on the ski slopes. GPS position currently unavailable."
            .to_string(),
    }
}

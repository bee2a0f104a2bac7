//! Per-session fix processing.
//!
//! `SessionState` holds the running statistics of one tracking session and
//! folds every incoming fix into them: lift detection first, then the
//! instantaneous speed, then distance and descent aggregates. It knows
//! nothing about wall-clock time; the engine supplies elapsed time when it
//! asks for a snapshot or the final record.

use crate::distance::distance_meters;
use crate::types::{LocationFix, SessionRecord, TrackingSnapshot};

/// Minimum climb between two fixes for the pair to count as ascending.
pub const ASCENT_MIN_DELTA_METERS: f64 = 2.0;

/// Consecutive ascending fixes needed before the skier is considered on a lift.
pub const ASCENT_THRESHOLD_COUNT: u32 = 3;

/// Below this the chip's Doppler speed is noise; derive speed from positions.
pub const MIN_REPORTED_SPEED_MPS: f64 = 0.3;

/// Steps this short are GPS jitter.
pub const MIN_STEP_METERS: f64 = 0.5;

/// Anything this fast is a position jump, not skiing.
pub const MAX_PLAUSIBLE_SPEED_KMH: f64 = 200.0;

/// Samples at or below this speed are standing still and stay out of the average.
pub const STATIONARY_SPEED_KMH: f64 = 2.0;

const MPS_TO_KMH: f64 = 3.6;

/// What happened to a fix inside [`SessionState::process_fix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// First fix of the session, only used as the baseline.
    Baseline,
    /// Distance and descent statistics were updated.
    Accepted,
    /// Dropped by the jitter/jump filter.
    Rejected,
    /// Skipped because the skier is riding a lift.
    OnLift,
    /// Timestamp did not advance past the previous fix.
    OutOfOrder,
}

/// Running statistics for one tracking session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    last_fix: Option<LocationFix>,
    cumulative_distance_m: f64,
    max_speed_kmh: f64,
    speed_sample_sum: f64,
    speed_sample_count: u32,
    consecutive_ascent_count: u32,
    is_riding_lift: bool,
    last_instant_speed_kmh: f64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fix into the session.
    ///
    /// The fix always becomes the new baseline, whatever the outcome.
    pub fn process_fix(&mut self, fix: LocationFix) -> FixOutcome {
        let outcome = match self.last_fix {
            None => {
                self.last_instant_speed_kmh = instant_speed_kmh(None, &fix);
                FixOutcome::Baseline
            }
            Some(prev) => {
                self.classify_lift(&prev, &fix);

                let speed_kmh = instant_speed_kmh(Some(&prev), &fix);
                self.last_instant_speed_kmh = speed_kmh;

                if self.is_riding_lift {
                    FixOutcome::OnLift
                } else if fix.timestamp_ms <= prev.timestamp_ms {
                    FixOutcome::OutOfOrder
                } else {
                    self.accumulate(&prev, &fix, speed_kmh)
                }
            }
        };

        tracing::debug!(
            outcome = ?outcome,
            speed_kmh = self.last_instant_speed_kmh,
            riding_lift = self.is_riding_lift,
            "Processed fix"
        );

        self.last_fix = Some(fix);
        outcome
    }

    /// A single non-ascending step cancels lift status immediately.
    fn classify_lift(&mut self, prev: &LocationFix, fix: &LocationFix) {
        let altitude_delta = fix.altitude_or_zero() - prev.altitude_or_zero();

        if altitude_delta > ASCENT_MIN_DELTA_METERS {
            self.consecutive_ascent_count = self.consecutive_ascent_count.saturating_add(1);
        } else {
            self.consecutive_ascent_count = 0;
            self.is_riding_lift = false;
        }

        if self.consecutive_ascent_count >= ASCENT_THRESHOLD_COUNT {
            self.is_riding_lift = true;
        }
    }

    fn accumulate(&mut self, prev: &LocationFix, fix: &LocationFix, speed_kmh: f64) -> FixOutcome {
        let delta_m = distance_meters(prev, fix);

        if !(delta_m > MIN_STEP_METERS && speed_kmh < MAX_PLAUSIBLE_SPEED_KMH) {
            tracing::debug!(delta_m, speed_kmh, "Rejected noisy fix");
            return FixOutcome::Rejected;
        }

        self.cumulative_distance_m += delta_m;

        if speed_kmh > STATIONARY_SPEED_KMH {
            self.speed_sample_sum += speed_kmh;
            self.speed_sample_count += 1;
        }

        if speed_kmh > self.max_speed_kmh {
            self.max_speed_kmh = speed_kmh;
        }

        FixOutcome::Accepted
    }

    pub fn last_fix(&self) -> Option<&LocationFix> {
        self.last_fix.as_ref()
    }

    pub fn is_riding_lift(&self) -> bool {
        self.is_riding_lift
    }

    pub fn consecutive_ascent_count(&self) -> u32 {
        self.consecutive_ascent_count
    }

    pub fn distance_meters(&self) -> f64 {
        self.cumulative_distance_m
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    pub fn instant_speed_kmh(&self) -> f64 {
        self.last_instant_speed_kmh
    }

    pub fn speed_sample_count(&self) -> u32 {
        self.speed_sample_count
    }

    /// Mean descent speed, zero before the first moving sample.
    pub fn avg_speed_kmh(&self) -> f64 {
        if self.speed_sample_count > 0 {
            self.speed_sample_sum / f64::from(self.speed_sample_count)
        } else {
            0.0
        }
    }

    fn last_altitude_m(&self) -> f64 {
        self.last_fix.map(|f| f.altitude_or_zero()).unwrap_or(0.0)
    }

    pub fn snapshot(&self, elapsed_ms: u64) -> TrackingSnapshot {
        TrackingSnapshot {
            instant_speed_kmh: self.last_instant_speed_kmh,
            distance_km: self.cumulative_distance_m / 1000.0,
            elapsed_ms,
            max_speed_kmh: self.max_speed_kmh,
            avg_speed_kmh: self.avg_speed_kmh(),
            is_riding_lift: self.is_riding_lift,
            altitude_m: self.last_altitude_m(),
        }
    }

    pub fn to_record(&self, start_timestamp_ms: i64, duration_ms: u64) -> SessionRecord {
        SessionRecord {
            start_timestamp_ms,
            duration_ms,
            max_speed_kmh: self.max_speed_kmh,
            avg_speed_kmh: self.avg_speed_kmh(),
            total_distance_km: self.cumulative_distance_m / 1000.0,
            last_altitude_m: self.last_altitude_m(),
        }
    }
}

/// Chip speed when trustworthy, otherwise distance over time from the previous fix.
fn instant_speed_kmh(prev: Option<&LocationFix>, fix: &LocationFix) -> f64 {
    if let Some(reported) = fix.reported_speed {
        if reported >= MIN_REPORTED_SPEED_MPS && reported.is_finite() {
            return reported * MPS_TO_KMH;
        }
    }

    let Some(prev) = prev else {
        return 0.0;
    };

    // An overflowing gap is as unusable as a negative one
    let elapsed_ms = match fix.timestamp_ms.checked_sub(prev.timestamp_ms) {
        Some(ms) if ms > 0 => ms,
        _ => return 0.0,
    };

    let speed = distance_meters(prev, fix) / (elapsed_ms as f64 / 1000.0) * MPS_TO_KMH;
    if speed.is_finite() {
        speed
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METERS_PER_DEGREE: f64 = 6_371_008.8 * std::f64::consts::PI / 180.0;
    const BASE_LAT: f64 = 46.5;
    const BASE_LON: f64 = 11.7;

    /// A fix `north_m` meters north of the base point.
    fn fix_at(t_ms: i64, north_m: f64, altitude: f64) -> LocationFix {
        LocationFix::new(t_ms, BASE_LAT + north_m / METERS_PER_DEGREE, BASE_LON)
            .with_altitude(altitude)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn first_fix_is_baseline() {
        let mut state = SessionState::new();
        assert_eq!(state.process_fix(fix_at(0, 0.0, 1000.0)), FixOutcome::Baseline);
        assert_eq!(state.distance_meters(), 0.0);
        assert_eq!(state.instant_speed_kmh(), 0.0);
        assert!(state.last_fix().is_some());
    }

    #[test]
    fn reported_speed_preferred() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        let outcome = state.process_fix(fix_at(3000, 50.0, 1000.0).with_reported_speed(5.0));

        assert_eq!(outcome, FixOutcome::Accepted);
        assert!(approx(state.instant_speed_kmh(), 18.0));
        assert!((state.distance_meters() - 50.0).abs() < 1e-3);
        assert!(!state.is_riding_lift());
    }

    #[test]
    fn slow_reported_speed_falls_back_to_derived() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        // 20 m in 2 s = 10 m/s = 36 km/h; the chip's 0.2 m/s is ignored
        state.process_fix(fix_at(2000, 20.0, 999.0).with_reported_speed(0.2));
        assert!((state.instant_speed_kmh() - 36.0).abs() < 1e-3);
    }

    #[test]
    fn lift_detected_on_third_ascent() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        state.process_fix(fix_at(3000, 0.0, 1003.0));
        assert!(!state.is_riding_lift());
        state.process_fix(fix_at(6000, 0.0, 1006.0));
        assert!(!state.is_riding_lift());
        state.process_fix(fix_at(9000, 0.0, 1009.0));
        assert!(state.is_riding_lift());
        assert_eq!(state.consecutive_ascent_count(), 3);

        state.process_fix(fix_at(12000, 0.0, 1012.0));
        assert!(state.is_riding_lift());

        // One flat sample cancels immediately
        state.process_fix(fix_at(15000, 0.0, 1013.0));
        assert!(!state.is_riding_lift());
        assert_eq!(state.consecutive_ascent_count(), 0);
    }

    #[test]
    fn ascent_of_exactly_threshold_does_not_count() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        for i in 1..=5 {
            state.process_fix(fix_at(i * 3000, 0.0, 1000.0 + 2.0 * i as f64));
        }
        assert!(!state.is_riding_lift());
        assert_eq!(state.consecutive_ascent_count(), 0);
    }

    #[test]
    fn strictly_descending_never_lift() {
        let mut state = SessionState::new();
        for i in 0..50 {
            state.process_fix(fix_at(i * 2000, i as f64 * 15.0, 2500.0 - i as f64 * 7.5));
            assert!(!state.is_riding_lift());
        }
    }

    #[test]
    fn no_distance_while_riding_lift() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        state.process_fix(fix_at(3000, 30.0, 990.0));
        let before = state.distance_meters();

        // Vertical climb in place until the lift is detected
        for i in 1..=3 {
            state.process_fix(fix_at(3000 + i * 3000, 30.0, 990.0 + 3.0 * i as f64));
        }
        assert!(state.is_riding_lift());
        assert_eq!(state.distance_meters(), before);

        // Moving along the lift line does not add distance or speed samples
        let samples = state.speed_sample_count();
        let max = state.max_speed_kmh();
        for i in 4..=8 {
            let outcome =
                state.process_fix(fix_at(3000 + i * 3000, 30.0 + 20.0 * i as f64, 990.0 + 3.0 * i as f64));
            assert_eq!(outcome, FixOutcome::OnLift);
        }
        assert_eq!(state.distance_meters(), before);
        assert_eq!(state.speed_sample_count(), samples);
        assert_eq!(state.max_speed_kmh(), max);
        // Instant speed still tracks the lift
        assert!(state.instant_speed_kmh() > 0.0);
    }

    #[test]
    fn jitter_rejected_but_becomes_baseline() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        let outcome = state.process_fix(fix_at(3000, 0.3, 1000.0));

        assert_eq!(outcome, FixOutcome::Rejected);
        assert_eq!(state.distance_meters(), 0.0);
        assert_eq!(state.speed_sample_count(), 0);
        let baseline = state.last_fix().map(|f| f.timestamp_ms);
        assert_eq!(baseline, Some(3000));
    }

    #[test]
    fn gps_jump_rejected() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        state.process_fix(fix_at(2000, 20.0, 998.0));
        let distance = state.distance_meters();
        let max = state.max_speed_kmh();
        let samples = state.speed_sample_count();

        // 500 m in 3 s = 600 km/h
        let outcome = state.process_fix(fix_at(5000, 520.0, 996.0));
        assert_eq!(outcome, FixOutcome::Rejected);
        assert_eq!(state.distance_meters(), distance);
        assert_eq!(state.max_speed_kmh(), max);
        assert_eq!(state.speed_sample_count(), samples);

        // Next delta is measured from the rejected fix
        state.process_fix(fix_at(8000, 540.0, 994.0));
        assert!((state.distance_meters() - distance - 20.0).abs() < 1e-3);
    }

    #[test]
    fn stationary_samples_excluded_from_average() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        // 1 m in 3 s = 1.2 km/h: counts for distance, not for the average
        let outcome = state.process_fix(fix_at(3000, 1.0, 1000.0));
        assert_eq!(outcome, FixOutcome::Accepted);
        assert!((state.distance_meters() - 1.0).abs() < 1e-3);
        assert_eq!(state.speed_sample_count(), 0);
        assert_eq!(state.avg_speed_kmh(), 0.0);
    }

    #[test]
    fn average_and_max_over_descent() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        for (i, kmh) in [10.0, 20.0, 30.0].iter().enumerate() {
            let t = (i as i64 + 1) * 1000;
            state.process_fix(
                fix_at(t, (i as f64 + 1.0) * 10.0, 1000.0 - i as f64).with_reported_speed(kmh / 3.6),
            );
        }
        assert!(approx(state.avg_speed_kmh(), 20.0));
        assert!(approx(state.max_speed_kmh(), 30.0));
        assert_eq!(state.speed_sample_count(), 3);
    }

    #[test]
    fn out_of_order_fix_updates_nothing_but_baseline() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(5000, 0.0, 1000.0));
        let outcome = state.process_fix(fix_at(5000, 40.0, 999.0));
        assert_eq!(outcome, FixOutcome::OutOfOrder);
        assert_eq!(state.instant_speed_kmh(), 0.0);
        assert_eq!(state.distance_meters(), 0.0);

        let outcome = state.process_fix(fix_at(4000, 80.0, 998.0));
        assert_eq!(outcome, FixOutcome::OutOfOrder);
        assert_eq!(state.distance_meters(), 0.0);
        assert_eq!(state.last_fix().map(|f| f.timestamp_ms), Some(4000));
    }

    #[test]
    fn distance_and_max_monotonic() {
        let mut state = SessionState::new();
        let mut prev_distance = 0.0;
        let mut prev_max = 0.0;
        let mut north = 0.0;
        let mut altitude = 2000.0;
        // Mix of descents, jitter, jumps and climbs
        let steps = [12.0, 0.2, 30.0, 800.0, 5.0, 0.0, 25.0, 18.0, 2.0, 40.0];
        let climbs = [-3.0, 0.0, 4.0, 4.0, 4.0, 4.0, -6.0, 3.0, -1.0, -8.0];
        for (i, (step, climb)) in steps.iter().zip(climbs.iter()).cycle().take(60).enumerate() {
            north += step;
            altitude += climb;
            state.process_fix(fix_at(i as i64 * 2500, north, altitude));
            assert!(state.distance_meters() >= prev_distance);
            assert!(state.max_speed_kmh() >= prev_max);
            prev_distance = state.distance_meters();
            prev_max = state.max_speed_kmh();
        }
    }

    #[test]
    fn missing_altitude_reads_as_zero() {
        let mut state = SessionState::new();
        state.process_fix(LocationFix::new(0, BASE_LAT, BASE_LON));
        state.process_fix(LocationFix::new(3000, BASE_LAT, BASE_LON).with_altitude(10.0));
        assert_eq!(state.consecutive_ascent_count(), 1);
        assert_eq!(state.snapshot(0).altitude_m, 10.0);
    }

    #[test]
    fn snapshot_and_record_reflect_state() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1500.0));
        state.process_fix(fix_at(2000, 30.0, 1490.0));

        let snapshot = state.snapshot(2500);
        assert_eq!(snapshot.elapsed_ms, 2500);
        assert!((snapshot.distance_km - 0.03).abs() < 1e-6);
        assert_eq!(snapshot.altitude_m, 1490.0);
        assert!(!snapshot.is_riding_lift);
        assert!((snapshot.instant_speed_kmh - 54.0).abs() < 1e-3);

        let record = state.to_record(1_700_000_000_000, 2500);
        assert_eq!(record.start_timestamp_ms, 1_700_000_000_000);
        assert_eq!(record.duration_ms, 2500);
        assert_eq!(record.total_distance_km, snapshot.distance_km);
        assert_eq!(record.max_speed_kmh, snapshot.max_speed_kmh);
        assert_eq!(record.last_altitude_m, 1490.0);
    }

    #[test]
    fn non_finite_position_resolves_to_zero_speed() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(0, 0.0, 1000.0));
        let outcome = state.process_fix(LocationFix::new(3000, f64::NAN, BASE_LON));
        assert_eq!(outcome, FixOutcome::Rejected);
        assert_eq!(state.instant_speed_kmh(), 0.0);
        assert_eq!(state.distance_meters(), 0.0);
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let mut state = SessionState::new();
        state.process_fix(fix_at(i64::MAX, 0.0, 1000.0));

        let outcome = state.process_fix(fix_at(i64::MIN, 30.0, 990.0));
        assert_eq!(outcome, FixOutcome::OutOfOrder);
        assert_eq!(state.instant_speed_kmh(), 0.0);
        assert_eq!(state.distance_meters(), 0.0);

        // Forward jump across the whole range still leaves sane state
        let outcome = state.process_fix(fix_at(i64::MAX, 60.0, 980.0));
        assert_eq!(outcome, FixOutcome::Accepted);
        assert_eq!(state.instant_speed_kmh(), 0.0);
        assert!((state.distance_meters() - 30.0).abs() < 1e-3);
        assert_eq!(state.max_speed_kmh(), 0.0);
    }
}

//! Location sources feeding the tracking engine.
//!
//! A source pushes fixes into an engine-owned channel from its own task or
//! thread. Two implementations live here: `ForwardingSource`, for hosts
//! that receive fixes through platform callbacks, and `ReplaySource`, which
//! plays back a recorded track.

use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use skiscore_core::{LocationError, TrackingConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::LocationFix;

/// Delivery settings requested from a location source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRequest {
    pub interval: Duration,
    pub min_interval: Duration,
    pub max_delay: Duration,
    pub high_accuracy: bool,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for LocationRequest {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.update_interval_ms),
            min_interval: Duration::from_millis(config.min_update_interval_ms),
            max_delay: Duration::from_millis(config.max_update_delay_ms),
            high_accuracy: config.high_accuracy,
        }
    }
}

/// Producer of location fixes.
pub trait LocationSource: Send + Sync {
    /// Start delivering fixes into `sink`.
    ///
    /// # Errors
    /// Returns a `LocationError` when positioning is unavailable or the
    /// permission was not granted.
    fn subscribe(
        &self,
        request: &LocationRequest,
        sink: mpsc::Sender<LocationFix>,
    ) -> Result<(), LocationError>;

    /// Stop delivering fixes. Safe to call when not subscribed.
    fn unsubscribe(&self);
}

/// Source driven by the host: platform callbacks call [`forward`](Self::forward).
#[derive(Debug, Default)]
pub struct ForwardingSource {
    sink: Mutex<Option<mpsc::Sender<LocationFix>>>,
    request: Mutex<Option<LocationRequest>>,
    unavailable: Mutex<Option<LocationError>>,
}

impl ForwardingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent subscriptions fail, e.g. after the permission was revoked.
    pub fn set_unavailable(&self, reason: LocationError) {
        *self.unavailable.lock() = Some(reason);
    }

    pub fn set_available(&self) {
        *self.unavailable.lock() = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Settings of the current subscription, if any.
    pub fn active_request(&self) -> Option<LocationRequest> {
        *self.request.lock()
    }

    /// Hand a fix to the engine without blocking the caller.
    ///
    /// Returns `false` if nobody is subscribed or the engine's buffer is full.
    pub fn forward(&self, fix: LocationFix) -> bool {
        let guard = self.sink.lock();
        let Some(sink) = guard.as_ref() else {
            return false;
        };

        match sink.try_send(fix) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Fix buffer full, dropping fix at {}", fix.timestamp_ms);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl LocationSource for ForwardingSource {
    fn subscribe(
        &self,
        request: &LocationRequest,
        sink: mpsc::Sender<LocationFix>,
    ) -> Result<(), LocationError> {
        if let Some(reason) = self.unavailable.lock().clone() {
            return Err(reason);
        }

        *self.sink.lock() = Some(sink);
        *self.request.lock() = Some(*request);
        Ok(())
    }

    fn unsubscribe(&self) {
        *self.sink.lock() = None;
        *self.request.lock() = None;
    }
}

#[derive(Debug)]
struct Playback {
    cancel: CancellationToken,
    done: CancellationToken,
}

/// Plays a recorded track back in (optionally accelerated) real time.
#[derive(Debug)]
pub struct ReplaySource {
    fixes: Vec<LocationFix>,
    speedup: f64,
    playback: Mutex<Option<Playback>>,
}

impl ReplaySource {
    pub fn new(fixes: Vec<LocationFix>) -> Self {
        Self {
            fixes,
            speedup: 1.0,
            playback: Mutex::new(None),
        }
    }

    /// Compress the gaps between fixes by `factor`; non-positive factors are ignored.
    pub fn with_speedup(mut self, factor: f64) -> Self {
        if factor > 0.0 && factor.is_finite() {
            self.speedup = factor;
        }
        self
    }

    /// Parse one JSON fix per line; blank lines and `#` comments are skipped.
    pub fn from_json_lines<R: BufRead>(reader: R) -> anyhow::Result<Self> {
        let mut fixes = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line.context("Failed to read track")?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fix: LocationFix = serde_json::from_str(line)
                .with_context(|| format!("Invalid fix on line {}", index + 1))?;
            fixes.push(fix);
        }

        tracing::debug!("Loaded {} fixes for replay", fixes.len());
        Ok(Self::new(fixes))
    }

    /// Load a JSON-lines track from disk.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open track {}", path.display()))?;
        Self::from_json_lines(std::io::BufReader::new(file))
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Resolves once the current playback has delivered every fix or was cancelled.
    pub async fn finished(&self) {
        let done = self.playback.lock().as_ref().map(|p| p.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
    }
}

impl LocationSource for ReplaySource {
    fn subscribe(
        &self,
        _request: &LocationRequest,
        sink: mpsc::Sender<LocationFix>,
    ) -> Result<(), LocationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| LocationError::ServiceUnavailable)?;

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        if let Some(previous) = self.playback.lock().replace(Playback {
            cancel: cancel.clone(),
            done: done.clone(),
        }) {
            previous.cancel.cancel();
        }

        let fixes = self.fixes.clone();
        let speedup = self.speedup;

        runtime.spawn(async move {
            let mut previous: Option<i64> = None;

            for fix in fixes {
                if let Some(prev) = previous {
                    let delay = replay_delay(prev, fix.timestamp_ms, speedup);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = sink.send(fix) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                previous = Some(fix.timestamp_ms);
            }

            tracing::debug!("Replay finished");
            done.cancel();
        });

        Ok(())
    }

    fn unsubscribe(&self) {
        if let Some(playback) = self.playback.lock().take() {
            playback.cancel.cancel();
        }
    }
}

/// Wall-clock wait between two recorded fixes at the given speed-up.
///
/// Gaps too large to represent wait forever; playback then ends by cancellation.
fn replay_delay(prev_ms: i64, next_ms: i64, speedup: f64) -> Duration {
    let gap_ms = next_ms.saturating_sub(prev_ms).max(0) as f64 / speedup;
    Duration::try_from_secs_f64(gap_ms / 1000.0).unwrap_or(Duration::MAX)
}

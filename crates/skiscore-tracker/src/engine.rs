//! Tracking engine: session lifecycle and snapshot broadcasting.
//!
//! While tracking, a single session task owns the `SessionState`. Location
//! fixes, the snapshot ticker, and control commands all arrive at that task,
//! so fix processing and snapshot reads never race. Snapshots and
//! persistence notices go out to subscribers over a broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use skiscore_core::TrackingConfig;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::TrackerError;
use crate::export::emergency_message;
use crate::last_fix::LastKnownFix;
use crate::session::SessionState;
use crate::source::{LocationRequest, LocationSource};
use crate::store::SessionStore;
use crate::types::{LocationFix, SessionRecord, TrackingSnapshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Messages delivered to UI observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Periodic statistics, plus one final flush on stop
    Snapshot(TrackingSnapshot),
    /// The session store accepted the finished session
    SessionSaved { id: i64 },
    /// The finished session could not be stored; tracking is unaffected
    PersistFailed { message: String },
}

enum Command {
    Stop(oneshot::Sender<SessionRecord>),
    Snapshot(oneshot::Sender<TrackingSnapshot>),
}

struct ActiveSession {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Ski-run tracking engine.
///
/// `Idle` until [`start`](Self::start), `Tracking` until [`stop`](Self::stop).
pub struct TrackingEngine {
    source: Arc<dyn LocationSource>,
    store: Arc<dyn SessionStore>,
    config: TrackingConfig,
    last_fix: LastKnownFix,
    events: broadcast::Sender<TrackerEvent>,
    active: Mutex<Option<ActiveSession>>,
}

impl TrackingEngine {
    pub fn new(
        source: Arc<dyn LocationSource>,
        store: Arc<dyn SessionStore>,
        config: TrackingConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            source,
            store,
            config,
            last_fix: LastKnownFix::new(),
            events,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to snapshots and persistence notices.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Most recent fix from any session, for the emergency export.
    pub fn last_known_fix(&self) -> Option<LocationFix> {
        self.last_fix.get()
    }

    /// Distress message built from the last known fix.
    pub fn emergency_message(&self) -> String {
        emergency_message(self.last_fix.get().as_ref())
    }

    /// Shareable handle onto the last known fix.
    pub fn last_fix_handle(&self) -> LastKnownFix {
        self.last_fix.clone()
    }

    pub async fn is_tracking(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Begin a new session. Does nothing if one is already running.
    ///
    /// # Errors
    /// Returns `TrackerError::LocationUnavailable` if the location source
    /// refuses the subscription; the engine stays idle.
    pub async fn start(&self) -> Result<(), TrackerError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            tracing::debug!("Tracking already active, ignoring start");
            return Ok(());
        }

        let (fix_tx, fix_rx) = mpsc::channel(self.config.fix_buffer.max(1));
        let request = LocationRequest::from(&self.config);

        if let Err(e) = self.source.subscribe(&request, fix_tx) {
            tracing::error!("Location source unavailable: {}", e);
            return Err(TrackerError::LocationUnavailable(e));
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let session = SessionTask {
            state: SessionState::new(),
            started_at: Instant::now(),
            start_timestamp_ms: chrono::Utc::now().timestamp_millis(),
            snapshot_interval: Duration::from_millis(self.config.snapshot_interval_ms.max(1)),
            fixes: fix_rx,
            commands: command_rx,
            events: self.events.clone(),
            last_fix: self.last_fix.clone(),
        };

        tracing::info!(
            interval_ms = self.config.update_interval_ms,
            high_accuracy = self.config.high_accuracy,
            "Tracking started"
        );

        *active = Some(ActiveSession {
            commands: command_tx,
            task: tokio::spawn(session.run()),
        });

        Ok(())
    }

    /// End the session, returning its record. `Ok(None)` when already idle.
    ///
    /// Emits one final snapshot and hands the record to the session store
    /// in the background; persistence is not awaited.
    ///
    /// # Errors
    /// Returns `TrackerError::EngineStopped` if the session task vanished
    /// before producing a record.
    pub async fn stop(&self) -> Result<Option<SessionRecord>, TrackerError> {
        let mut active = self.active.lock().await;
        let Some(session) = active.take() else {
            tracing::debug!("Stop requested while idle");
            return Ok(None);
        };

        self.source.unsubscribe();

        let (reply_tx, reply_rx) = oneshot::channel();
        session
            .commands
            .send(Command::Stop(reply_tx))
            .await
            .map_err(|_| TrackerError::EngineStopped)?;
        let record = reply_rx.await.map_err(|_| TrackerError::EngineStopped)?;

        if let Err(e) = session.task.await {
            tracing::warn!("Session task ended abnormally: {}", e);
        }

        tracing::info!(
            duration_ms = record.duration_ms,
            distance_km = record.total_distance_km,
            max_speed_kmh = record.max_speed_kmh,
            avg_speed_kmh = record.avg_speed_kmh,
            "Tracking stopped"
        );

        self.persist(record);
        Ok(Some(record))
    }

    /// Current statistics on demand, outside the broadcast cadence.
    pub async fn snapshot(&self) -> Option<TrackingSnapshot> {
        let commands = self.active.lock().await.as_ref()?.commands.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        commands.send(Command::Snapshot(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    fn persist(&self, record: SessionRecord) {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || match store.insert(&record) {
            Ok(id) => {
                tracing::info!("Saved session {}", id);
                let _ = events.send(TrackerEvent::SessionSaved { id });
            }
            Err(e) => {
                tracing::warn!("Failed to save session: {}", e);
                let _ = events.send(TrackerEvent::PersistFailed {
                    message: e.user_message().to_string(),
                });
            }
        });
    }
}

/// Exclusive owner of one session's state.
struct SessionTask {
    state: SessionState,
    started_at: Instant,
    start_timestamp_ms: i64,
    snapshot_interval: Duration,
    fixes: mpsc::Receiver<LocationFix>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<TrackerEvent>,
    last_fix: LastKnownFix,
}

impl SessionTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.snapshot_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut source_open = true;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Stop(reply)) => {
                        let record = self.finish();
                        let _ = reply.send(record);
                        break;
                    }
                    Some(Command::Snapshot(reply)) => {
                        self.drain_pending();
                        let _ = reply.send(self.snapshot());
                    }
                    // Engine dropped without stopping
                    None => break,
                },
                fix = self.fixes.recv(), if source_open => match fix {
                    Some(fix) => self.on_fix(fix),
                    None => {
                        tracing::debug!("Location source closed");
                        source_open = false;
                    }
                },
                _ = ticker.tick() => {
                    let snapshot = self.snapshot();
                    self.emit(snapshot);
                }
            }
        }
    }

    fn on_fix(&mut self, fix: LocationFix) {
        self.last_fix.set(fix);
        self.state.process_fix(fix);
    }

    /// Fixes delivered before a command must be counted before answering it.
    fn drain_pending(&mut self) {
        while let Ok(fix) = self.fixes.try_recv() {
            self.on_fix(fix);
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn snapshot(&self) -> TrackingSnapshot {
        self.state.snapshot(self.elapsed_ms())
    }

    fn emit(&self, snapshot: TrackingSnapshot) {
        // No receivers is fine; the UI may be in the background
        let _ = self.events.send(TrackerEvent::Snapshot(snapshot));
    }

    /// Account for fixes already delivered, flush a final snapshot, build the record.
    fn finish(&mut self) -> SessionRecord {
        self.drain_pending();

        let elapsed_ms = self.elapsed_ms();
        self.emit(self.state.snapshot(elapsed_ms));
        self.state.to_record(self.start_timestamp_ms, elapsed_ms)
    }
}

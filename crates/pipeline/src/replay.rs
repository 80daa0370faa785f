//! Session Replay
//!
//! Re-publishes a stored session at a chosen speed. Each replay runs in its
//! own task with a fresh evaluator and the alert configs that were enabled
//! when it started, so alerts fire the same way they did live. Pause and
//! cancel are observed at the delay between readings.

use crate::alerts::AlertBook;
use crate::sinks::{ArchiveRecord, SinkDispatcher};
use crate::wire::StreamMessage;
use alerting::{AlertConfig, AlertEvaluator, AlertEvent};
use broadcast_hub::BroadcastHub;
use serde::{Deserialize, Serialize};
use session_store::{SessionStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use telemetry_core::{Reading, Session, SessionId, SessionKind};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Replay errors
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Invalid replay speed: {0} (must be finite and greater than zero)")]
    InvalidSpeed(f64),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session {0} is already being replayed")]
    Conflict(SessionId),

    #[error("No active replay for session {0}")]
    NotActive(SessionId),

    #[error(transparent)]
    Store(StoreError),

    #[error("Replay task failed: {0}")]
    Aborted(String),
}

impl From<StoreError> for ReplayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownSession(id) => ReplayError::UnknownSession(id),
            other => ReplayError::Store(other),
        }
    }
}

/// Replay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayState {
    Pending,
    Running,
    Paused,
    Finished,
    Cancelled,
}

impl ReplayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayState::Finished | ReplayState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Cancel,
}

/// What a replay did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub source: SessionId,
    pub replay_session: SessionId,
    pub readings_sent: usize,
    pub alerts: Vec<AlertEvent>,
    pub final_state: ReplayState,
}

/// Status of an active replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStatus {
    pub source: SessionId,
    pub replay_session: SessionId,
    pub speed: f64,
    pub state: ReplayState,
}

struct ActiveReplay {
    replay_session: SessionId,
    speed: f64,
    control: Arc<watch::Sender<Control>>,
    state: watch::Receiver<ReplayState>,
}

type ActiveMap = Arc<Mutex<HashMap<SessionId, ActiveReplay>>>;

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<SessionId, ActiveReplay>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to one running replay
pub struct ReplayHandle {
    source: SessionId,
    replay_session: SessionId,
    speed: f64,
    control: Arc<watch::Sender<Control>>,
    state: watch::Receiver<ReplayState>,
    task: JoinHandle<ReplayReport>,
}

impl ReplayHandle {
    pub fn source(&self) -> SessionId {
        self.source
    }

    pub fn replay_session(&self) -> SessionId {
        self.replay_session
    }

    pub fn state(&self) -> ReplayState {
        *self.state.borrow()
    }

    /// Status of this replay; stays available after the task has finished
    pub fn status(&self) -> ReplayStatus {
        ReplayStatus {
            source: self.source,
            replay_session: self.replay_session,
            speed: self.speed,
            state: self.state(),
        }
    }

    pub fn pause(&self) {
        self.control.send_replace(Control::Pause);
    }

    pub fn resume(&self) {
        self.control.send_replace(Control::Run);
    }

    pub fn cancel(&self) {
        self.control.send_replace(Control::Cancel);
    }

    /// Wait for the replay to end
    pub async fn wait(self) -> Result<ReplayReport, ReplayError> {
        self.task
            .await
            .map_err(|e| ReplayError::Aborted(e.to_string()))
    }
}

/// Starts and tracks replays; at most one per source session
#[derive(Clone)]
pub struct ReplayController {
    store: Arc<SessionStore>,
    hub: BroadcastHub<StreamMessage>,
    alerts: AlertBook,
    sinks: SinkDispatcher,
    max_speed: f64,
    active: ActiveMap,
}

impl ReplayController {
    pub fn new(
        store: Arc<SessionStore>,
        hub: BroadcastHub<StreamMessage>,
        alerts: AlertBook,
        sinks: SinkDispatcher,
        max_speed: f64,
    ) -> Self {
        Self {
            store,
            hub,
            alerts,
            sinks,
            max_speed,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start replaying `source` at `speed` times real time.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_replay(&self, source: SessionId, speed: f64) -> Result<ReplayHandle, ReplayError> {
        if !(speed.is_finite() && speed > 0.0 && speed <= self.max_speed) {
            return Err(ReplayError::InvalidSpeed(speed));
        }
        let original = self.store.session(&source)?;

        let mut active = lock(&self.active);
        if active.contains_key(&source) {
            return Err(ReplayError::Conflict(source));
        }

        let readings = self.store.query_all(&source)?;
        let configs = self.alerts.enabled();
        let replay = self.store.open_session(
            SessionKind::Replay { source },
            original.channels.clone(),
        )?;
        self.sinks.archive(ArchiveRecord::SessionOpened(replay.clone()));

        let (control_tx, control_rx) = watch::channel(Control::Run);
        let control = Arc::new(control_tx);
        let (state_tx, state_rx) = watch::channel(ReplayState::Pending);
        active.insert(
            source,
            ActiveReplay {
                replay_session: replay.id,
                speed,
                control: Arc::clone(&control),
                state: state_rx.clone(),
            },
        );
        drop(active);

        info!(
            "Replay of session {} started as {}: {} readings at {}x",
            source,
            replay.id,
            readings.len(),
            speed
        );

        let task = ReplayTask {
            source,
            session: replay.clone(),
            speed,
            readings,
            configs,
            hub: self.hub.clone(),
            sinks: self.sinks.clone(),
            control: control_rx,
            guard: ReplayGuard {
                source,
                replay_session: replay.id,
                active: Arc::clone(&self.active),
                store: Arc::clone(&self.store),
                sinks: self.sinks.clone(),
                state: state_tx,
            },
        };

        Ok(ReplayHandle {
            source,
            replay_session: replay.id,
            speed,
            control,
            state: state_rx,
            task: tokio::spawn(task.run()),
        })
    }

    fn control(&self, source: SessionId, command: Control) -> Result<(), ReplayError> {
        let active = lock(&self.active);
        let entry = active.get(&source).ok_or(ReplayError::NotActive(source))?;
        entry.control.send_replace(command);
        Ok(())
    }

    pub fn pause(&self, source: SessionId) -> Result<(), ReplayError> {
        self.control(source, Control::Pause)
    }

    pub fn resume(&self, source: SessionId) -> Result<(), ReplayError> {
        self.control(source, Control::Run)
    }

    pub fn cancel(&self, source: SessionId) -> Result<(), ReplayError> {
        self.control(source, Control::Cancel)
    }

    /// Cancel every active replay
    pub fn cancel_all(&self) {
        for entry in lock(&self.active).values() {
            entry.control.send_replace(Control::Cancel);
        }
    }

    pub fn status(&self, source: SessionId) -> Option<ReplayStatus> {
        lock(&self.active).get(&source).map(|entry| ReplayStatus {
            source,
            replay_session: entry.replay_session,
            speed: entry.speed,
            state: *entry.state.borrow(),
        })
    }

    pub fn active(&self) -> Vec<ReplayStatus> {
        lock(&self.active)
            .iter()
            .map(|(source, entry)| ReplayStatus {
                source: *source,
                replay_session: entry.replay_session,
                speed: entry.speed,
                state: *entry.state.borrow(),
            })
            .collect()
    }
}

/// Releases the replay slot and closes the replay session however the task
/// ends, including abort.
struct ReplayGuard {
    source: SessionId,
    replay_session: SessionId,
    active: ActiveMap,
    store: Arc<SessionStore>,
    sinks: SinkDispatcher,
    state: watch::Sender<ReplayState>,
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        if !self.state.borrow().is_terminal() {
            self.state.send_replace(ReplayState::Cancelled);
        }
        lock(&self.active).remove(&self.source);
        match self.store.close_session(&self.replay_session) {
            Ok(closed) => self.sinks.archive(ArchiveRecord::SessionClosed(closed)),
            Err(e) => warn!("Failed to close replay session {}: {}", self.replay_session, e),
        }
    }
}

struct ReplayTask {
    source: SessionId,
    session: Session,
    speed: f64,
    readings: Vec<Reading>,
    configs: Vec<AlertConfig>,
    hub: BroadcastHub<StreamMessage>,
    sinks: SinkDispatcher,
    control: watch::Receiver<Control>,
    guard: ReplayGuard,
}

impl ReplayTask {
    async fn run(mut self) -> ReplayReport {
        self.guard.state.send_replace(ReplayState::Running);
        let mut evaluator = AlertEvaluator::new();
        let mut alerts = Vec::new();
        let mut sent = 0;
        let mut previous: Option<Duration> = None;
        let mut final_state = ReplayState::Finished;

        let readings = std::mem::take(&mut self.readings);
        for reading in readings {
            let gap = previous
                .map(|p| reading.timestamp.elapsed.saturating_sub(p))
                .unwrap_or(Duration::ZERO);
            if !self.delay(gap.div_f64(self.speed)).await {
                final_state = ReplayState::Cancelled;
                break;
            }
            previous = Some(reading.timestamp.elapsed);

            let reading = reading.rehome(self.session.id);
            let events = evaluator.evaluate(&reading, &self.configs);
            for event in &events {
                self.sinks.archive(ArchiveRecord::Alert(event.clone()));
            }
            self.hub.publish(StreamMessage::from_reading(&reading, &events));
            alerts.extend(events);
            sent += 1;
        }

        self.guard.state.send_replace(final_state);
        info!(
            "Replay of session {} {:?}: {} readings, {} alerts",
            self.source,
            final_state,
            sent,
            alerts.len()
        );
        ReplayReport {
            source: self.source,
            replay_session: self.session.id,
            readings_sent: sent,
            alerts,
            final_state,
        }
    }

    /// Wait out `delay`, honouring pause and cancel. False means cancelled.
    async fn delay(&mut self, delay: Duration) -> bool {
        let mut deadline = Instant::now() + delay;
        // Delay left when the pause began; repeated pauses keep it
        let mut paused: Option<Duration> = None;
        loop {
            let command = *self.control.borrow_and_update();
            match command {
                Control::Cancel => return false,
                Control::Pause => {
                    if paused.is_none() {
                        paused = Some(deadline.saturating_duration_since(Instant::now()));
                        self.guard.state.send_replace(ReplayState::Paused);
                        debug!("Replay of session {} paused", self.source);
                    }
                    if self.control.changed().await.is_err() {
                        return false;
                    }
                    continue;
                }
                Control::Run => {
                    if let Some(remaining) = paused.take() {
                        self.guard.state.send_replace(ReplayState::Running);
                        deadline = Instant::now() + remaining;
                    }
                }
            }

            tokio::select! {
                _ = sleep_until(deadline) => return true,
                changed = self.control.changed() => {
                    if changed.is_err() {
                        sleep_until(deadline).await;
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::{AlertRegistry, NewAlert};
    use broadcast_hub::HubConfig;
    use telemetry_core::Channel;

    const BOOST: [f64; 10] = [18.0, 19.0, 21.0, 22.0, 19.0, 23.0, 18.0, 17.0, 21.5, 16.0];

    struct Fixture {
        store: Arc<SessionStore>,
        hub: BroadcastHub<StreamMessage>,
        alerts: AlertBook,
        controller: ReplayController,
        source: Session,
        live_alerts: Vec<AlertEvent>,
    }

    /// One BOOST reading per second, evaluated live against `gt 20`
    fn fixture() -> Fixture {
        let store = Arc::new(SessionStore::default());
        let hub = BroadcastHub::new(HubConfig::default());
        let mut registry = AlertRegistry::new(["BOOST"]);
        registry
            .create(NewAlert::new("Overboost", "BOOST", "gt", 20.0))
            .unwrap();
        let alerts = AlertBook::new(registry);

        let source = store
            .open_session(SessionKind::Live, vec!["BOOST".into()])
            .unwrap();
        let channel = Channel::new("BOOST", "PSI", -14.7, 22.0);
        let mut evaluator = AlertEvaluator::new();
        for (i, value) in BOOST.iter().enumerate() {
            let reading = Reading::from_engineering(
                source.id,
                &channel,
                *value,
                source.timestamp_at(Duration::from_secs(i as u64)),
            );
            evaluator.evaluate(&reading, &alerts.enabled());
            store.append(&source.id, reading).unwrap();
        }
        store.close_session(&source.id).unwrap();

        let controller = ReplayController::new(
            Arc::clone(&store),
            hub.clone(),
            alerts.clone(),
            SinkDispatcher::disabled(),
            100.0,
        );
        Fixture {
            store,
            hub,
            alerts,
            controller,
            source,
            live_alerts: evaluator.history().to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_timing_and_alerts() {
        let f = fixture();
        let mut sub = f.hub.subscribe();
        let started = Instant::now();

        let handle = f.controller.start_replay(f.source.id, 2.0).unwrap();
        let replay_session = handle.replay_session();
        let report = handle.wait().await.unwrap();

        // 9 one-second gaps at double speed
        let took = started.elapsed();
        assert!(took >= Duration::from_millis(4500), "took {:?}", took);
        assert!(took < Duration::from_millis(4600), "took {:?}", took);

        assert_eq!(report.final_state, ReplayState::Finished);
        assert_eq!(report.readings_sent, 10);

        let replayed: Vec<_> = report
            .alerts
            .iter()
            .map(|e| (e.alert_id, e.observed_value, e.message.clone()))
            .collect();
        let live: Vec<_> = f
            .live_alerts
            .iter()
            .map(|e| (e.alert_id, e.observed_value, e.message.clone()))
            .collect();
        assert_eq!(replayed, live);
        assert_eq!(live.len(), 3);
        assert!(report.alerts.iter().all(|e| e.session_id == replay_session));

        let mut values = Vec::new();
        while let Some(message) = sub.try_recv() {
            values.push(message.value);
        }
        assert_eq!(values, BOOST.to_vec());

        // Replay session registered, closed, and empty
        let session = f.store.session(&replay_session).unwrap();
        assert!(session.ended_at.is_some());
        assert_eq!(session.kind, SessionKind::Replay { source: f.source.id });
        assert_eq!(f.store.reading_count(&replay_session).unwrap(), 0);
        assert!(f.controller.status(f.source.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_replay_conflicts() {
        let f = fixture();
        let first = f.controller.start_replay(f.source.id, 1.0).unwrap();
        assert!(matches!(
            f.controller.start_replay(f.source.id, 1.0),
            Err(ReplayError::Conflict(_))
        ));
        let report = first.wait().await.unwrap();
        assert_eq!(report.final_state, ReplayState::Finished);
        assert_eq!(report.readings_sent, 10);

        // Slot is free again
        let again = f.controller.start_replay(f.source.id, 10.0).unwrap();
        assert_eq!(again.wait().await.unwrap().readings_sent, 10);
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let f = fixture();
        for speed in [0.0, -1.0, f64::NAN, f64::INFINITY, 1000.0] {
            assert!(matches!(
                f.controller.start_replay(f.source.id, speed),
                Err(ReplayError::InvalidSpeed(_))
            ));
        }
        assert!(matches!(
            f.controller.start_replay(SessionId::new(), 1.0),
            Err(ReplayError::UnknownSession(_))
        ));
        assert!(matches!(
            f.controller.cancel(f.source.id),
            Err(ReplayError::NotActive(_))
        ));
        // Rejections leave nothing behind
        assert_eq!(f.store.list_sessions().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_at_delay_boundary() {
        let f = fixture();
        let handle = f.controller.start_replay(f.source.id, 1.0).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        f.controller.cancel(f.source.id).unwrap();

        let report = handle.wait().await.unwrap();
        assert_eq!(report.final_state, ReplayState::Cancelled);
        assert_eq!(report.readings_sent, 3);
        assert!(f.controller.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let f = fixture();
        let handle = f.controller.start_replay(f.source.id, 1.0).unwrap();
        let started = Instant::now();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.pause();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.state(), ReplayState::Paused);
        assert_eq!(
            f.controller.status(f.source.id).map(|s| s.state),
            Some(ReplayState::Paused)
        );

        handle.resume();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.final_state, ReplayState::Finished);
        assert_eq!(report.readings_sent, 10);

        let took = started.elapsed();
        assert!(took >= Duration::from_secs(19), "took {:?}", took);
        assert!(took < Duration::from_millis(19_100), "took {:?}", took);
        // Alerts follow the configs enabled at start, not later edits
        assert_eq!(f.alerts.list().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_pause_keeps_pending_delay() {
        let f = fixture();
        let handle = f.controller.start_replay(f.source.id, 1.0).unwrap();
        let started = Instant::now();

        // Half a second left before the fourth reading
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.pause();
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.pause();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), ReplayState::Paused);
        handle.resume();

        let report = handle.wait().await.unwrap();
        assert_eq!(report.readings_sent, 10);
        let took = started.elapsed();
        assert!(took >= Duration::from_secs(11), "took {:?}", took);
        assert!(took < Duration::from_millis(11_100), "took {:?}", took);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handle_status_outlives_short_replay() {
        let f = fixture();
        for _ in 0..50 {
            let empty = f.store.open_session(SessionKind::Live, vec![]).unwrap();
            f.store.close_session(&empty.id).unwrap();

            let handle = f.controller.start_replay(empty.id, 1.0).unwrap();
            tokio::task::yield_now().await;
            let status = handle.status();
            assert_eq!(status.source, empty.id);
            assert_eq!(status.replay_session, handle.replay_session());
            assert_eq!(status.speed, 1.0);

            let report = handle.wait().await.unwrap();
            assert_eq!(report.readings_sent, 0);
            assert_eq!(report.final_state, ReplayState::Finished);
            assert!(f.controller.status(empty.id).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_edits_do_not_affect_running_replay() {
        let f = fixture();
        let handle = f.controller.start_replay(f.source.id, 1.0).unwrap();
        let id = f.alerts.list()[0].id;
        f.alerts.set_enabled(id, false).await.unwrap();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.alerts.len(), 3);
    }
}

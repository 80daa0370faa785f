//! Tick Loop
//!
//! A single task owns the generator, the evaluator and the current live
//! session. Everything else talks to it through channels: commands over
//! mpsc, alert configs over watch, and its output through the store, the
//! hub and the sink dispatcher.

use crate::alerts::AlertSnapshot;
use crate::sinks::{ArchiveRecord, SinkDispatcher};
use crate::wire::StreamMessage;
use crate::PipelineError;
use alerting::{AlertEvaluator, AlertEvent};
use broadcast_hub::BroadcastHub;
use metrics::counter;
use session_store::SessionStore;
use signal_generator::{Scenario, SignalGenerator};
use std::sync::Arc;
use std::time::Duration;
use telemetry_core::{Session, SessionKind};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub(crate) enum Command {
    SetScenario(Scenario),
    NewSession(oneshot::Sender<Result<Session, PipelineError>>),
    History(oneshot::Sender<Vec<AlertEvent>>),
    Shutdown,
}

/// State owned by the tick loop
pub struct TickContext {
    pub(crate) generator: SignalGenerator,
    pub(crate) evaluator: AlertEvaluator,
    pub(crate) session: Session,
    /// Monotonic instant the session started at
    pub(crate) origin: Instant,
}

impl TickContext {
    pub fn new(generator: SignalGenerator, session: Session) -> Self {
        Self {
            generator,
            evaluator: AlertEvaluator::new(),
            session,
            origin: Instant::now(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

pub(crate) struct TickLoop {
    pub(crate) ctx: TickContext,
    pub(crate) period: Duration,
    pub(crate) store: Arc<SessionStore>,
    pub(crate) hub: BroadcastHub<StreamMessage>,
    pub(crate) sinks: SinkDispatcher,
    pub(crate) alerts: watch::Receiver<AlertSnapshot>,
    pub(crate) commands: mpsc::Receiver<Command>,
    pub(crate) current: watch::Sender<Session>,
}

impl TickLoop {
    pub(crate) async fn run(mut self) {
        info!(
            "Tick loop started: session {}, period {:?}",
            self.ctx.session.id, self.period
        );
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::SetScenario(scenario)) => {
                        let elapsed = self.ctx.origin.elapsed();
                        info!("Scenario set to {}", scenario);
                        self.ctx.generator.set_scenario(scenario, elapsed);
                    }
                    Some(Command::NewSession(reply)) => {
                        let _ = reply.send(self.rotate());
                    }
                    Some(Command::History(reply)) => {
                        let _ = reply.send(self.ctx.evaluator.history().to_vec());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Ok(()) = self.alerts.changed() => self.sync_alerts(),
                now = interval.tick() => self.tick(now),
            }
        }

        self.close_current();
        info!("Tick loop stopped after {} ticks", self.ctx.generator.tick_count());
    }

    fn sync_alerts(&mut self) {
        let snapshot = self.alerts.borrow_and_update().clone();
        self.ctx
            .evaluator
            .retain_alerts(|id| snapshot.iter().any(|c| c.id == id));
        debug!("Alert snapshot updated: {} configs", snapshot.len());
    }

    /// One generator tick: store, evaluate, dispatch, publish
    pub(crate) fn tick(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.ctx.origin);
        let faults_before = self.ctx.generator.fault_count();
        let batch = self.ctx.generator.tick(&self.ctx.session, elapsed);
        let configs = self.alerts.borrow().clone();

        for reading in batch.into_values() {
            if let Err(e) = self.store.append(&self.ctx.session.id, reading.clone()) {
                counter!("telemetry_store_append_failures_total").increment(1);
                warn!("Dropping reading from history: {}", e);
            }

            let events = self.ctx.evaluator.evaluate(&reading, &configs);
            for event in &events {
                self.sinks.alert(event);
            }
            let message = StreamMessage::from_reading(&reading, &events);
            self.sinks.archive(ArchiveRecord::Reading(reading));
            self.hub.publish(message);
        }

        counter!("telemetry_ticks_total").increment(1);
        let faults = self.ctx.generator.fault_count() - faults_before;
        if faults > 0 {
            counter!("telemetry_generation_faults_total").increment(faults);
        }
    }

    fn close_current(&mut self) {
        match self.store.close_session(&self.ctx.session.id) {
            Ok(closed) => self.sinks.archive(ArchiveRecord::SessionClosed(closed)),
            Err(e) => warn!("Failed to close session {}: {}", self.ctx.session.id, e),
        }
    }

    /// Close the current live session and start a new one
    fn rotate(&mut self) -> Result<Session, PipelineError> {
        self.close_current();
        let session = self
            .store
            .open_session(SessionKind::Live, self.ctx.generator.channel_ids())?;
        self.sinks.archive(ArchiveRecord::SessionOpened(session.clone()));
        self.ctx.evaluator.reset();
        self.ctx.origin = Instant::now();
        self.ctx.session = session.clone();
        self.current.send_replace(session.clone());
        info!("Live session {} started", session.id);
        Ok(session)
    }
}

/// Handle for talking to a running tick loop
#[derive(Clone)]
pub struct PipelineHandle {
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) current: watch::Receiver<Session>,
}

impl PipelineHandle {
    /// Switch the generator's scenario until the next schedule boundary
    pub async fn set_scenario(&self, scenario: Scenario) -> Result<(), PipelineError> {
        self.commands
            .send(Command::SetScenario(scenario))
            .await
            .map_err(|_| PipelineError::Stopped)
    }

    /// Close the live session and open a fresh one
    pub async fn new_session(&self) -> Result<Session, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::NewSession(tx))
            .await
            .map_err(|_| PipelineError::Stopped)?;
        rx.await.map_err(|_| PipelineError::Stopped)?
    }

    /// Alert events fired in the current live session
    pub async fn alert_history(&self) -> Result<Vec<AlertEvent>, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::History(tx))
            .await
            .map_err(|_| PipelineError::Stopped)?;
        rx.await.map_err(|_| PipelineError::Stopped)
    }

    /// Ask the loop to stop; the current session is closed on the way out
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("Tick loop already stopped");
        }
    }

    /// Current live session
    pub fn current_session(&self) -> Session {
        self.current.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

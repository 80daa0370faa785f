//! Telemetry Service
//!
//! Wires the generator, store, evaluator, hub, replay controller and sinks
//! together and owns their tasks.

use crate::alerts::AlertBook;
use crate::engine::{PipelineHandle, TickContext, TickLoop};
use crate::replay::{ReplayController, ReplayHandle};
use crate::sinks::{AlertStore, ArchiveRecord, Archiver, Notifier, SinkDispatcher, SinkWorkers};
use crate::wire::StreamMessage;
use crate::{PipelineConfig, PipelineError};
use alerting::{AlertConfig, AlertEvent, AlertRegistry};
use broadcast_hub::{BroadcastHub, Subscription};
use session_store::SessionStore;
use signal_generator::{Scenario, SignalGenerator};
use std::sync::Arc;
use telemetry_core::{Channel, Session, SessionId, SessionKind};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Builds a [`TelemetryService`]
pub struct ServiceBuilder {
    config: PipelineConfig,
    notifiers: Vec<Arc<dyn Notifier>>,
    archivers: Vec<Arc<dyn Archiver>>,
    alert_store: Option<Arc<dyn AlertStore>>,
    saved_alerts: Vec<AlertConfig>,
}

impl ServiceBuilder {
    /// Save alert changes to `store`
    pub fn alert_store(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.alert_store = Some(store);
        self
    }

    /// Alerts saved by an earlier run, loaded with their ids
    pub fn restore_alerts(mut self, saved: Vec<AlertConfig>) -> Self {
        self.saved_alerts = saved;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archivers.push(archiver);
        self
    }

    /// Validate, open the first live session and start the tick loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> Result<TelemetryService, PipelineError> {
        let config = self.config;
        config.validate()?;

        let channels = config.resolved_channels();
        let generator = SignalGenerator::new(channels.clone(), config.generator.clone())?;
        let channel_ids = generator.channel_ids();

        let store = Arc::new(SessionStore::new(config.store.clone()));
        let hub = BroadcastHub::new(config.hub.clone());
        let mut registry = AlertRegistry::new(channel_ids.iter().cloned());
        if !self.saved_alerts.is_empty() {
            let saved = self.saved_alerts.len();
            let loaded = registry.restore(self.saved_alerts);
            info!("Restored {} of {} saved alerts", loaded, saved);
        }
        let mut alerts = AlertBook::new(registry);
        if let Some(store) = self.alert_store {
            alerts = alerts.with_store(store);
        }
        let (sinks, workers) = SinkDispatcher::start(
            self.notifiers,
            self.archivers,
            config.sink_queue_size,
            config.throttle.clone(),
        );
        let replays = ReplayController::new(
            Arc::clone(&store),
            hub.clone(),
            alerts.clone(),
            sinks.clone(),
            config.max_replay_speed,
        );

        let session = store.open_session(SessionKind::Live, channel_ids)?;
        sinks.archive(ArchiveRecord::SessionOpened(session.clone()));

        let (command_tx, command_rx) = mpsc::channel(64);
        let (current_tx, current_rx) = watch::channel(session.clone());
        let tick_loop = TickLoop {
            ctx: TickContext::new(generator, session.clone()),
            period: config.sample_period(),
            store: Arc::clone(&store),
            hub: hub.clone(),
            sinks: sinks.clone(),
            alerts: alerts.watch(),
            commands: command_rx,
            current: current_tx,
        };
        let task = tokio::spawn(tick_loop.run());

        info!(
            "Telemetry service started: {} channels, live session {}",
            channels.len(),
            session.id
        );

        Ok(TelemetryService {
            config,
            channels,
            store,
            hub,
            alerts,
            replays,
            pipeline: PipelineHandle {
                commands: command_tx,
                current: current_rx,
            },
            tasks: Mutex::new(Some((task, workers))),
        })
    }
}

/// Running telemetry pipeline
pub struct TelemetryService {
    config: PipelineConfig,
    channels: Vec<Channel>,
    store: Arc<SessionStore>,
    hub: BroadcastHub<StreamMessage>,
    alerts: AlertBook,
    replays: ReplayController,
    pipeline: PipelineHandle,
    tasks: Mutex<Option<(JoinHandle<()>, SinkWorkers)>>,
}

impl TelemetryService {
    pub fn builder(config: PipelineConfig) -> ServiceBuilder {
        ServiceBuilder {
            config,
            notifiers: Vec::new(),
            archivers: Vec::new(),
            alert_store: None,
            saved_alerts: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub<StreamMessage> {
        &self.hub
    }

    pub fn alerts(&self) -> &AlertBook {
        &self.alerts
    }

    pub fn replays(&self) -> &ReplayController {
        &self.replays
    }

    pub fn pipeline(&self) -> &PipelineHandle {
        &self.pipeline
    }

    /// New live stream subscription
    pub fn subscribe(&self) -> Subscription<StreamMessage> {
        self.hub.subscribe()
    }

    pub fn current_session(&self) -> Session {
        self.pipeline.current_session()
    }

    pub async fn set_scenario(&self, scenario: Scenario) -> Result<(), PipelineError> {
        self.pipeline.set_scenario(scenario).await
    }

    pub async fn alert_history(&self) -> Result<Vec<AlertEvent>, PipelineError> {
        self.pipeline.alert_history().await
    }

    pub fn start_replay(&self, source: SessionId, speed: f64) -> Result<ReplayHandle, PipelineError> {
        Ok(self.replays.start_replay(source, speed)?)
    }

    /// Delete a stored session. The current live session and sessions being
    /// replayed cannot be deleted.
    pub fn delete_session(&self, id: SessionId) -> Result<(), PipelineError> {
        if id == self.current_session().id {
            return Err(PipelineError::SessionBusy(id));
        }
        if self.replays.status(id).is_some() {
            return Err(PipelineError::SessionBusy(id));
        }
        self.store.delete_session(&id)?;
        Ok(())
    }

    /// Stop the tick loop and replays, close the hub, then drain the sinks
    pub async fn shutdown(&self) {
        let Some((task, workers)) = self.tasks.lock().await.take() else {
            return;
        };
        info!("Shutting down telemetry service");
        self.replays.cancel_all();
        self.pipeline.shutdown().await;
        if let Err(e) = task.await {
            warn!("Tick loop ended abnormally: {}", e);
        }
        self.hub.close();
        workers.shutdown().await;
    }
}

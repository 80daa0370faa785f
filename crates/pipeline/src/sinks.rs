//! External Sinks
//!
//! Notifiers receive alert events, archivers receive everything. Each sink
//! gets its own bounded queue and worker task; the tick loop only ever
//! offers with `try_send`, so a slow or failing sink never stalls
//! generation. A full queue drops the item and logs it.

use alerting::{AlertConfig, AlertEvent, AlertId, NotificationThrottle, ThrottleConfig};
use async_trait::async_trait;
use metrics::counter;
use std::sync::{Arc, Mutex};
use telemetry_core::{Reading, Session};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected record: {0}")]
    Rejected(String),

    #[error("Sink I/O error: {0}")]
    Io(String),
}

/// Receives alert events that have a notify flag set
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: AlertEvent) -> Result<(), SinkError>;
}

/// Anything an archiver may persist
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveRecord {
    SessionOpened(Session),
    SessionClosed(Session),
    Reading(Reading),
    Alert(AlertEvent),
}

/// Most records an archiver worker hands over at once
pub const ARCHIVE_BATCH: usize = 256;

/// Receives every reading, alert and session transition
#[async_trait]
pub trait Archiver: Send + Sync {
    fn name(&self) -> &str;

    async fn archive(&self, record: ArchiveRecord) -> Result<(), SinkError>;

    /// Records drained from the queue together, in order. Stores that can
    /// commit several writes at once should override this.
    async fn archive_batch(&self, records: Vec<ArchiveRecord>) -> Result<(), SinkError> {
        let mut result = Ok(());
        for record in records {
            if let Err(e) = self.archive(record).await {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Durable home for alert definitions
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn load_alerts(&self) -> Result<Vec<AlertConfig>, SinkError>;

    /// Insert or replace
    async fn save_alert(&self, alert: &AlertConfig) -> Result<(), SinkError>;

    async fn delete_alert(&self, id: AlertId) -> Result<(), SinkError>;
}

/// Notifier that writes alerts to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: AlertEvent) -> Result<(), SinkError> {
        info!(
            alert_id = %event.alert_id,
            session = %event.session_id,
            email = event.notify.email,
            cloud = event.notify.cloud,
            "{}",
            event.message
        );
        Ok(())
    }
}

struct SinkQueue<T> {
    name: String,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for SinkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> SinkQueue<T> {
    fn offer(&self, item: T) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("telemetry_sink_dropped_total").increment(1);
                warn!("Sink {} queue full, dropping record", self.name);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Sink {} stopped, dropping record", self.name);
            }
        }
    }
}

/// Hands records to sink workers without waiting on them
#[derive(Clone)]
pub struct SinkDispatcher {
    notifiers: Vec<SinkQueue<AlertEvent>>,
    archivers: Vec<SinkQueue<ArchiveRecord>>,
    throttle: Arc<Mutex<NotificationThrottle>>,
}

/// Worker tasks behind a dispatcher
pub struct SinkWorkers {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SinkWorkers {
    /// Drain what is already queued, then stop every worker
    pub async fn shutdown(self) {
        self.stop.send_replace(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Sink worker ended abnormally: {}", e);
            }
        }
        info!("Sink workers stopped");
    }
}

async fn run_worker<T, F, Fut>(
    name: String,
    mut rx: mpsc::Receiver<T>,
    mut stop: watch::Receiver<bool>,
    batch: usize,
    deliver: F,
) where
    F: Fn(Vec<T>) -> Fut,
    Fut: std::future::Future<Output = Result<(), SinkError>>,
{
    let report = |result: Result<(), SinkError>| {
        if let Err(e) = result {
            counter!("telemetry_sink_failures_total").increment(1);
            warn!("Sink {} failed: {}", name, e);
        }
    };
    let drain = |rx: &mut mpsc::Receiver<T>, items: &mut Vec<T>| {
        while items.len() < batch {
            match rx.try_recv() {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
    };

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => {
                    let mut items = vec![item];
                    drain(&mut rx, &mut items);
                    report(deliver(items).await);
                }
                None => break,
            },
            _ = stop.changed() => {
                loop {
                    let mut items = Vec::new();
                    drain(&mut rx, &mut items);
                    if items.is_empty() {
                        break;
                    }
                    report(deliver(items).await);
                }
                break;
            }
        }
    }
    debug!("Sink {} worker exiting", name);
}

impl SinkDispatcher {
    /// Spawn one worker per sink. Must be called inside a tokio runtime.
    pub fn start(
        notifiers: Vec<Arc<dyn Notifier>>,
        archivers: Vec<Arc<dyn Archiver>>,
        queue_size: usize,
        throttle: ThrottleConfig,
    ) -> (Self, SinkWorkers) {
        let queue_size = queue_size.max(1);
        let (stop, stop_rx) = watch::channel(false);
        let mut handles = Vec::new();

        let notifiers = notifiers
            .into_iter()
            .map(|sink| {
                let (tx, rx) = mpsc::channel(queue_size);
                let name = sink.name().to_string();
                info!("Starting notifier {}", name);
                handles.push(tokio::spawn(run_worker(
                    name.clone(),
                    rx,
                    stop_rx.clone(),
                    1,
                    move |events: Vec<AlertEvent>| {
                        let sink = Arc::clone(&sink);
                        async move {
                            for event in events {
                                sink.notify(event).await?;
                            }
                            Ok::<(), SinkError>(())
                        }
                    },
                )));
                SinkQueue { name, tx }
            })
            .collect();

        let archivers = archivers
            .into_iter()
            .map(|sink| {
                let (tx, rx) = mpsc::channel(queue_size);
                let name = sink.name().to_string();
                info!("Starting archiver {}", name);
                handles.push(tokio::spawn(run_worker(
                    name.clone(),
                    rx,
                    stop_rx.clone(),
                    ARCHIVE_BATCH,
                    move |records| {
                        let sink = Arc::clone(&sink);
                        async move { sink.archive_batch(records).await }
                    },
                )));
                SinkQueue { name, tx }
            })
            .collect();

        let dispatcher = Self {
            notifiers,
            archivers,
            throttle: Arc::new(Mutex::new(NotificationThrottle::new(throttle))),
        };
        (dispatcher, SinkWorkers { stop, handles })
    }

    /// Dispatcher with no sinks attached
    pub fn disabled() -> Self {
        Self {
            notifiers: Vec::new(),
            archivers: Vec::new(),
            throttle: Arc::new(Mutex::new(NotificationThrottle::new(ThrottleConfig::unlimited()))),
        }
    }

    /// Offer a record to every archiver
    pub fn archive(&self, record: ArchiveRecord) {
        if let Some((last, rest)) = self.archivers.split_last() {
            for queue in rest {
                queue.offer(record.clone());
            }
            last.offer(record);
        }
    }

    /// Archive an event and, if it passes the throttle, notify
    pub fn alert(&self, event: &AlertEvent) {
        self.archive(ArchiveRecord::Alert(event.clone()));
        if self.notifiers.is_empty() {
            return;
        }
        let admitted = self
            .throttle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .admit(event);
        if admitted {
            for queue in &self.notifiers {
                queue.offer(event.clone());
            }
        }
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    pub fn archiver_count(&self) -> usize {
        self.archivers.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Archiver that keeps everything in memory
    #[derive(Default)]
    pub struct MemoryArchiver {
        pub records: Mutex<Vec<ArchiveRecord>>,
    }

    impl MemoryArchiver {
        pub fn records(&self) -> Vec<ArchiveRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Archiver for MemoryArchiver {
        fn name(&self) -> &str {
            "memory"
        }

        async fn archive(&self, record: ArchiveRecord) -> Result<(), SinkError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    /// Notifier that keeps events in memory
    #[derive(Default)]
    pub struct MemoryNotifier {
        pub events: Mutex<Vec<AlertEvent>>,
    }

    #[async_trait]
    impl Notifier for MemoryNotifier {
        fn name(&self) -> &str {
            "memory"
        }

        async fn notify(&self, event: AlertEvent) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    /// Notifier that always fails
    pub struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        fn name(&self) -> &str {
            "broken"
        }

        async fn notify(&self, _event: AlertEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("smtp down".into()))
        }
    }
}

//! Cloud Synchronization
//!
//! Publishes fired alerts and, optionally, live readings to an MQTT broker:
//! - alerts to `vehicles/{vehicle_id}/alerts`, always sent
//! - readings to `vehicles/{vehicle_id}/telemetry`, subject to the daily
//!   quota and the upload schedule

mod quota;

pub use quota::UploadQuota;

use alerting::AlertEvent;
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use metrics::counter;
use pipeline::{ArchiveRecord, Archiver, Notifier, SinkError, StreamMessage, WireAlert};
use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_core::{Reading, SessionId};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Cloud sync error types
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Invalid cloud configuration: {0}")]
    InvalidConfig(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Daily upload quota exhausted")]
    QuotaExceeded,

    #[error("Upload deferred by {0:?} schedule")]
    Deferred(UploadSchedule),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// When telemetry may be uploaded. Alerts ignore the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadSchedule {
    /// Upload as soon as produced
    Immediate,
    /// Upload while the uplink is reported available
    #[default]
    Opportunistic,
    /// Upload only inside the nightly window
    Nightly,
    /// Never upload telemetry automatically
    Manual,
}

/// Cloud sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub vehicle_id: String,
    pub keep_alive_secs: u64,
    /// Telemetry messages per UTC day
    pub daily_quota: u32,
    pub schedule: UploadSchedule,
    /// Nightly window, UTC hours, inclusive on both ends
    pub nightly_start_hour: u32,
    pub nightly_end_hour: u32,
    /// Forward every reading, not just alerts
    pub forward_readings: bool,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            vehicle_id: "unknown".to_string(),
            keep_alive_secs: 30,
            daily_quota: 50_000,
            schedule: UploadSchedule::Opportunistic,
            nightly_start_hour: 2,
            nightly_end_hour: 6,
            forward_readings: false,
        }
    }
}

impl CloudConfig {
    pub fn validate(&self) -> Result<(), CloudError> {
        if self.broker_host.trim().is_empty() {
            return Err(CloudError::InvalidConfig("broker_host is empty".into()));
        }
        if self.vehicle_id.trim().is_empty() || self.vehicle_id.contains(['/', '+', '#']) {
            return Err(CloudError::InvalidConfig(format!(
                "vehicle_id {:?} is not a valid topic segment",
                self.vehicle_id
            )));
        }
        if self.nightly_start_hour > 23 || self.nightly_end_hour > 23 {
            return Err(CloudError::InvalidConfig("nightly hours must be 0-23".into()));
        }
        Ok(())
    }

    pub fn alerts_topic(&self) -> String {
        format!("vehicles/{}/alerts", self.vehicle_id)
    }

    pub fn telemetry_topic(&self) -> String {
        format!("vehicles/{}/telemetry", self.vehicle_id)
    }

    fn in_nightly_window(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        if self.nightly_start_hour <= self.nightly_end_hour {
            (self.nightly_start_hour..=self.nightly_end_hour).contains(&hour)
        } else {
            hour >= self.nightly_start_hour || hour <= self.nightly_end_hour
        }
    }
}

/// Envelope for everything sent to the cloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudMessage<T> {
    pub message_type: String,
    pub vehicle_id: String,
    pub session_id: SessionId,
    pub sent_at: DateTime<Utc>,
    pub payload: T,
}

/// Where serialized messages go
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CloudError>;
}

/// MQTT publisher backed by a rumqttc event loop task
pub struct MqttPublisher {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Start the client. The connection is made lazily by the event loop,
    /// which keeps retrying while the broker is unreachable.
    pub fn connect(config: &CloudConfig) -> Result<Self, CloudError> {
        config.validate()?;
        let mut options = MqttOptions::new(
            format!("vehicle-{}", config.vehicle_id),
            &config.broker_host,
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let event_loop = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(incoming)) => {
                        debug!("MQTT incoming: {:?}", incoming);
                    }
                    Err(e) => {
                        error!("MQTT error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    _ => {}
                }
            }
        });

        info!(
            "MQTT client started for {}:{}",
            config.broker_host, config.broker_port
        );
        Ok(Self { client, event_loop })
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CloudError> {
        // try_publish so a dead broker never stalls the sink worker
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| CloudError::Publish(e.to_string()))
    }
}

/// Cloud sync manager
pub struct CloudSync {
    config: CloudConfig,
    publisher: Arc<dyn Publisher>,
    quota: UploadQuota,
    link_available: AtomicBool,
    deferred: AtomicU64,
}

impl CloudSync {
    pub fn new(config: CloudConfig, publisher: Arc<dyn Publisher>) -> Result<Self, CloudError> {
        config.validate()?;
        let quota = UploadQuota::new(config.daily_quota, Utc::now());
        Ok(Self {
            config,
            publisher,
            quota,
            link_available: AtomicBool::new(true),
            deferred: AtomicU64::new(0),
        })
    }

    /// Connect to the configured MQTT broker
    pub fn connect(config: CloudConfig) -> Result<Self, CloudError> {
        let publisher = MqttPublisher::connect(&config)?;
        Self::new(config, Arc::new(publisher))
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn quota(&self) -> &UploadQuota {
        &self.quota
    }

    /// Report uplink availability for the opportunistic schedule
    pub fn set_link_available(&self, available: bool) {
        self.link_available.store(available, Ordering::Relaxed);
    }

    /// Telemetry messages held back by quota or schedule
    pub fn deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    /// Publish an alert. Alerts bypass quota and schedule but still count
    /// against the day's usage.
    pub async fn publish_alert(&self, event: &AlertEvent) -> Result<(), CloudError> {
        let now = Utc::now();
        let payload = self.envelope("alert", event.session_id, now, WireAlert::from(event))?;
        self.publisher.publish(&self.config.alerts_topic(), payload).await?;
        self.quota.charge(now);
        counter!("telemetry_cloud_published_total").increment(1);
        Ok(())
    }

    /// Publish a reading if schedule and quota allow it
    pub async fn publish_reading(&self, reading: &Reading) -> Result<(), CloudError> {
        self.publish_reading_at(reading, Utc::now()).await
    }

    async fn publish_reading_at(&self, reading: &Reading, now: DateTime<Utc>) -> Result<(), CloudError> {
        if !self.schedule_allows(now) {
            self.defer();
            return Err(CloudError::Deferred(self.config.schedule));
        }
        if !self.quota.try_take(now) {
            self.defer();
            return Err(CloudError::QuotaExceeded);
        }
        let message = StreamMessage::from_reading(reading, &[]);
        let payload = self.envelope("telemetry", reading.session_id, now, message)?;
        self.publisher.publish(&self.config.telemetry_topic(), payload).await?;
        counter!("telemetry_cloud_published_total").increment(1);
        Ok(())
    }

    /// Whether the schedule currently lets telemetry out
    pub fn schedule_allows(&self, now: DateTime<Utc>) -> bool {
        match self.config.schedule {
            UploadSchedule::Immediate => true,
            UploadSchedule::Opportunistic => self.link_available.load(Ordering::Relaxed),
            UploadSchedule::Nightly => self.config.in_nightly_window(now),
            UploadSchedule::Manual => false,
        }
    }

    pub fn reset_daily_quota(&self) {
        self.quota.reset();
    }

    fn defer(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
        counter!("telemetry_cloud_deferred_total").increment(1);
    }

    fn envelope<T: Serialize>(
        &self,
        message_type: &str,
        session_id: SessionId,
        now: DateTime<Utc>,
        payload: T,
    ) -> Result<Vec<u8>, CloudError> {
        let message = CloudMessage {
            message_type: message_type.to_string(),
            vehicle_id: self.config.vehicle_id.clone(),
            session_id,
            sent_at: now,
            payload,
        };
        Ok(serde_json::to_vec(&message)?)
    }
}

fn sink_error(e: CloudError) -> SinkError {
    match e {
        CloudError::Publish(msg) => SinkError::Unavailable(msg),
        other => SinkError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl Notifier for CloudSync {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn notify(&self, event: AlertEvent) -> Result<(), SinkError> {
        if !event.notify.cloud {
            return Ok(());
        }
        self.publish_alert(&event).await.map_err(sink_error)
    }
}

#[async_trait]
impl Archiver for CloudSync {
    fn name(&self) -> &str {
        "cloud-telemetry"
    }

    async fn archive(&self, record: ArchiveRecord) -> Result<(), SinkError> {
        let ArchiveRecord::Reading(reading) = record else {
            return Ok(());
        };
        if !self.config.forward_readings {
            return Ok(());
        }
        match self.publish_reading(&reading).await {
            // Held-back telemetry is expected, not a sink failure
            Err(CloudError::Deferred(_)) | Err(CloudError::QuotaExceeded) => Ok(()),
            other => other.map_err(sink_error),
        }
    }
}

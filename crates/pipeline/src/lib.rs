//! Telemetry Pipeline
//!
//! Generation, storage, alert evaluation, fan-out and replay wired into one
//! service. The tick loop is the only writer of the live session and the
//! evaluator; everything else reaches it through channels.

mod alerts;
mod config;
mod engine;
mod replay;
mod service;
mod sinks;
mod wire;

pub use alerts::{AlertBook, AlertSnapshot};
pub use config::PipelineConfig;
pub use engine::{PipelineHandle, TickContext};
pub use replay::{ReplayController, ReplayError, ReplayHandle, ReplayReport, ReplayState, ReplayStatus};
pub use service::{ServiceBuilder, TelemetryService};
pub use sinks::{
    AlertStore, ArchiveRecord, Archiver, LogNotifier, Notifier, SinkDispatcher, SinkError, SinkWorkers, ARCHIVE_BATCH,
};
pub use wire::{StreamMessage, WireAlert};

use alerting::AlertError;
use session_store::StoreError;
use signal_generator::GeneratorError;
use telemetry_core::{ChannelError, SessionId};
use thiserror::Error;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Alert(#[from] AlertError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error("Session {0} is in use")]
    SessionBusy(SessionId),

    #[error("Pipeline is not running")]
    Stopped,
}

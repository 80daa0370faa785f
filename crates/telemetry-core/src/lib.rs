//! Telemetry Core Types
//!
//! Channel definitions, readings and sessions shared by every stage of the
//! streaming pipeline, plus the default Focus ST PID catalogue.

mod channel;
mod error;
mod pid;
mod reading;
mod session;

pub use channel::{validate_channels, Channel, Conversion, SafeBand};
pub use error::ChannelError;
pub use pid::{default_channels, Pid};
pub use reading::{Reading, Timestamp};
pub use session::{Session, SessionId, SessionKind, SessionSummary};

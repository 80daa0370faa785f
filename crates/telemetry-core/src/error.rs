//! Channel Definition Errors

use thiserror::Error;

/// Errors raised while validating channel definitions at startup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    /// Range bounds are not finite or are inverted
    #[error("Channel {id}: invalid range [{min}, {max}]")]
    InvalidRange { id: String, min: f64, max: f64 },

    /// Linear conversion with a zero or non-finite scale cannot be inverted
    #[error("Channel {id}: conversion scale {scale} is not invertible")]
    InvalidConversion { id: String, scale: f64 },

    /// Safe band bounds are inverted
    #[error("Channel {id}: safe band is inverted")]
    InvalidSafeBand { id: String },

    /// Two channels share an identifier
    #[error("Duplicate channel id: {0}")]
    Duplicate(String),

    /// Channel id is empty
    #[error("Channel id must not be empty")]
    EmptyId,
}

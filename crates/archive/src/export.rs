//! Session Export
//!
//! Flat reading records written as CSV, JSON or postcard. Import reads
//! them back in the same order with every `f64` bit preserved.

use crate::ArchiveError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::time::Duration;
use telemetry_core::{Reading, SessionId, Timestamp};

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    Postcard,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Postcard => "bin",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Postcard => "application/octet-stream",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Postcard => "postcard",
        };
        f.write_str(name)
    }
}

impl FromStr for ExportFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "postcard" | "bin" => Ok(ExportFormat::Postcard),
            other => Err(ArchiveError::UnknownFormat(other.to_string())),
        }
    }
}

/// One reading, flattened for tabular formats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub session_id: SessionId,
    pub pid: String,
    pub unit: String,
    pub raw_value: f64,
    pub value: f64,
    /// Nanoseconds since the session started
    pub elapsed_ns: u64,
    pub timestamp: DateTime<Utc>,
    pub warning: bool,
}

impl From<&Reading> for ExportRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            session_id: reading.session_id,
            pid: reading.channel_id.clone(),
            unit: reading.unit.clone(),
            raw_value: reading.raw_value,
            value: reading.converted_value,
            elapsed_ns: u64::try_from(reading.timestamp.elapsed.as_nanos()).unwrap_or(u64::MAX),
            timestamp: reading.timestamp.wall,
            warning: reading.warning,
        }
    }
}

impl From<ExportRecord> for Reading {
    fn from(record: ExportRecord) -> Self {
        Reading {
            session_id: record.session_id,
            channel_id: record.pid,
            unit: record.unit,
            raw_value: record.raw_value,
            converted_value: record.value,
            timestamp: Timestamp {
                elapsed: Duration::from_nanos(record.elapsed_ns),
                wall: record.timestamp,
            },
            warning: record.warning,
        }
    }
}

/// Write records in the given format
pub fn export<W: Write>(records: &[ExportRecord], format: ExportFormat, mut writer: W) -> Result<(), ArchiveError> {
    match format {
        ExportFormat::Csv => {
            let mut csv = csv::Writer::from_writer(writer);
            for record in records {
                csv.serialize(record)?;
            }
            csv.flush()?;
        }
        ExportFormat::Json => {
            serde_json::to_writer(&mut writer, records)?;
            writer.flush()?;
        }
        ExportFormat::Postcard => {
            let bytes = postcard::to_allocvec(records)?;
            writer.write_all(&bytes)?;
            writer.flush()?;
        }
    }
    Ok(())
}

/// Read records written by [`export`]
pub fn import<R: Read>(format: ExportFormat, mut reader: R) -> Result<Vec<ExportRecord>, ArchiveError> {
    match format {
        ExportFormat::Csv => {
            let mut csv = csv::Reader::from_reader(reader);
            let records = csv.deserialize().collect::<Result<Vec<ExportRecord>, _>>()?;
            Ok(records)
        }
        ExportFormat::Json => Ok(serde_json::from_reader(reader)?),
        ExportFormat::Postcard => {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            Ok(postcard::from_bytes(&bytes)?)
        }
    }
}

/// Export straight into a byte buffer
pub fn export_to_vec(records: &[ExportRecord], format: ExportFormat) -> Result<Vec<u8>, ArchiveError> {
    let mut buffer = Vec::new();
    export(records, format, &mut buffer)?;
    Ok(buffer)
}

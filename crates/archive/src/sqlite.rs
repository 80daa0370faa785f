//! SQLite Archive
//!
//! Durable record of sessions, readings, fired alerts and alert
//! definitions. Timestamps are stored as RFC 3339 text with nanoseconds,
//! values as REAL. Batches from the archiver worker share one transaction.

use crate::export::ExportRecord;
use crate::ArchiveError;
use alerting::{AlertConfig, AlertEvent, AlertId, Condition, NotifyFlags};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pipeline::{AlertStore, ArchiveRecord, Archiver, SinkError};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use telemetry_core::{Reading, Session, SessionId, SessionKind, Timestamp};
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS telemetry_sessions (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        source TEXT,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        channels TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS telemetry_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        pid TEXT NOT NULL,
        unit TEXT NOT NULL,
        raw_value REAL NOT NULL,
        value REAL NOT NULL,
        elapsed_ns INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        warning INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_telemetry_data_session_time
        ON telemetry_data (session_id, timestamp)",
    "CREATE TABLE IF NOT EXISTS alert_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        alert_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        session_id TEXT NOT NULL,
        pid TEXT NOT NULL,
        value REAL NOT NULL,
        threshold REAL NOT NULL,
        condition TEXT NOT NULL,
        message TEXT NOT NULL,
        elapsed_ns INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        notify_email INTEGER NOT NULL,
        notify_cloud INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS alert_configs (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        pid TEXT NOT NULL,
        condition TEXT NOT NULL,
        threshold REAL NOT NULL,
        enabled INTEGER NOT NULL,
        notify_email INTEGER NOT NULL,
        notify_cloud INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

/// SQLite-backed archiver
#[derive(Clone)]
pub struct SqliteArchive {
    pool: SqlitePool,
}

impl SqliteArchive {
    /// Open (creating if needed) the database at `url` and apply the schema
    pub async fn connect(url: &str) -> Result<Self, ArchiveError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let archive = Self { pool };
        archive.migrate().await?;
        info!("Opened telemetry archive at {}", url);
        Ok(archive)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self, ArchiveError> {
        // A second connection would see a different empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let archive = Self { pool };
        archive.migrate().await?;
        Ok(archive)
    }

    pub async fn migrate(&self) -> Result<(), ArchiveError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert or refresh a session row
    pub async fn upsert_session(&self, session: &Session) -> Result<(), ArchiveError> {
        let mut conn = self.pool.acquire().await?;
        write_session(&mut conn, session).await
    }

    pub async fn insert_reading(&self, reading: &Reading) -> Result<(), ArchiveError> {
        let mut conn = self.pool.acquire().await?;
        write_reading(&mut conn, reading).await
    }

    pub async fn insert_alert(&self, event: &AlertEvent) -> Result<(), ArchiveError> {
        let mut conn = self.pool.acquire().await?;
        write_alert(&mut conn, event).await
    }

    /// Write records in order inside one transaction; all or nothing
    pub async fn store_batch(&self, records: &[ArchiveRecord]) -> Result<(), ArchiveError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            write_record(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Insert or replace an alert definition
    pub async fn save_alert_config(&self, alert: &AlertConfig) -> Result<(), ArchiveError> {
        sqlx::query(
            "INSERT INTO alert_configs
                (id, name, pid, condition, threshold, enabled, notify_email, notify_cloud, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                pid = excluded.pid,
                condition = excluded.condition,
                threshold = excluded.threshold,
                enabled = excluded.enabled,
                notify_email = excluded.notify_email,
                notify_cloud = excluded.notify_cloud,
                updated_at = excluded.updated_at",
        )
        .bind(alert_id_to_db(alert.id))
        .bind(&alert.name)
        .bind(&alert.channel_id)
        .bind(alert.condition.as_str())
        .bind(alert.threshold)
        .bind(alert.enabled)
        .bind(alert.notify.email)
        .bind(alert.notify.cloud)
        .bind(format_time(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns whether the definition existed
    pub async fn delete_alert_config(&self, id: AlertId) -> Result<bool, ArchiveError> {
        let deleted = sqlx::query("DELETE FROM alert_configs WHERE id = ?")
            .bind(alert_id_to_db(id))
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    /// Saved alert definitions ordered by id
    pub async fn alert_configs(&self) -> Result<Vec<AlertConfig>, ArchiveError> {
        let rows = sqlx::query(
            "SELECT id, name, pid, condition, threshold, enabled, notify_email, notify_cloud
             FROM alert_configs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_config_from_row).collect()
    }

    /// Archived sessions, newest first
    pub async fn sessions(&self) -> Result<Vec<Session>, ArchiveError> {
        let rows = sqlx::query(
            "SELECT id, kind, source, started_at, ended_at, channels
             FROM telemetry_sessions ORDER BY started_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    /// Readings of one session in generation order
    pub async fn readings(&self, session_id: SessionId) -> Result<Vec<ExportRecord>, ArchiveError> {
        let rows = sqlx::query(
            "SELECT session_id, pid, unit, raw_value, value, elapsed_ns, timestamp, warning
             FROM telemetry_data WHERE session_id = ? ORDER BY elapsed_ns, id",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Alerts fired in one session, oldest first
    pub async fn alert_history(&self, session_id: SessionId) -> Result<Vec<AlertEvent>, ArchiveError> {
        let rows = sqlx::query(
            "SELECT alert_id, name, session_id, pid, value, threshold, condition, message,
                    elapsed_ns, timestamp, notify_email, notify_cloud
             FROM alert_history WHERE session_id = ? ORDER BY elapsed_ns, id",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }

    /// Drop a session with its readings and alerts. Returns whether it existed.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<bool, ArchiveError> {
        let id = session_id.to_string();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM telemetry_data WHERE session_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM alert_history WHERE session_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM telemetry_sessions WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }
}

fn sink_error(e: ArchiveError) -> SinkError {
    match e {
        ArchiveError::Database(e) => SinkError::Io(e.to_string()),
        other => SinkError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl Archiver for SqliteArchive {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn archive(&self, record: ArchiveRecord) -> Result<(), SinkError> {
        let mut conn = self.pool.acquire().await.map_err(|e| SinkError::Io(e.to_string()))?;
        write_record(&mut conn, &record).await.map_err(sink_error)
    }

    async fn archive_batch(&self, records: Vec<ArchiveRecord>) -> Result<(), SinkError> {
        self.store_batch(&records).await.map_err(sink_error)
    }
}

#[async_trait]
impl AlertStore for SqliteArchive {
    async fn load_alerts(&self) -> Result<Vec<AlertConfig>, SinkError> {
        self.alert_configs().await.map_err(sink_error)
    }

    async fn save_alert(&self, alert: &AlertConfig) -> Result<(), SinkError> {
        self.save_alert_config(alert).await.map_err(sink_error)
    }

    async fn delete_alert(&self, id: AlertId) -> Result<(), SinkError> {
        self.delete_alert_config(id).await.map(|_| ()).map_err(sink_error)
    }
}

async fn write_record(conn: &mut SqliteConnection, record: &ArchiveRecord) -> Result<(), ArchiveError> {
    match record {
        ArchiveRecord::SessionOpened(session) | ArchiveRecord::SessionClosed(session) => {
            write_session(conn, session).await
        }
        ArchiveRecord::Reading(reading) => write_reading(conn, reading).await,
        ArchiveRecord::Alert(event) => write_alert(conn, event).await,
    }
}

async fn write_session(conn: &mut SqliteConnection, session: &Session) -> Result<(), ArchiveError> {
    let (kind, source) = match session.kind {
        SessionKind::Live => ("live", None),
        SessionKind::Replay { source } => ("replay", Some(source.to_string())),
    };
    sqlx::query(
        "INSERT INTO telemetry_sessions (id, kind, source, started_at, ended_at, channels)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET ended_at = excluded.ended_at",
    )
    .bind(session.id.to_string())
    .bind(kind)
    .bind(source)
    .bind(format_time(&session.started_at))
    .bind(session.ended_at.as_ref().map(format_time))
    .bind(serde_json::to_string(&session.channels)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_reading(conn: &mut SqliteConnection, reading: &Reading) -> Result<(), ArchiveError> {
    sqlx::query(
        "INSERT INTO telemetry_data
            (session_id, pid, unit, raw_value, value, elapsed_ns, timestamp, warning)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(reading.session_id.to_string())
    .bind(&reading.channel_id)
    .bind(&reading.unit)
    .bind(reading.raw_value)
    .bind(reading.converted_value)
    .bind(elapsed_to_db(reading.timestamp.elapsed))
    .bind(format_time(&reading.timestamp.wall))
    .bind(reading.warning)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_alert(conn: &mut SqliteConnection, event: &AlertEvent) -> Result<(), ArchiveError> {
    sqlx::query(
        "INSERT INTO alert_history
            (alert_id, name, session_id, pid, value, threshold, condition, message,
             elapsed_ns, timestamp, notify_email, notify_cloud)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(alert_id_to_db(event.alert_id))
    .bind(&event.name)
    .bind(event.session_id.to_string())
    .bind(&event.channel_id)
    .bind(event.observed_value)
    .bind(event.threshold)
    .bind(event.condition.as_str())
    .bind(&event.message)
    .bind(elapsed_to_db(event.timestamp.elapsed))
    .bind(format_time(&event.timestamp.wall))
    .bind(event.notify.email)
    .bind(event.notify.cloud)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn alert_id_to_db(id: AlertId) -> i64 {
    i64::try_from(id.0).unwrap_or(i64::MAX)
}

fn alert_id_from_db(id: i64) -> Result<AlertId, ArchiveError> {
    u64::try_from(id)
        .map(AlertId)
        .map_err(|_| ArchiveError::Corrupt(format!("bad alert id {}", id)))
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, ArchiveError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ArchiveError::Corrupt(format!("bad timestamp {:?}: {}", text, e)))
}

fn parse_session_id(text: &str) -> Result<SessionId, ArchiveError> {
    SessionId::from_str(text).map_err(|e| ArchiveError::Corrupt(format!("bad session id {:?}: {}", text, e)))
}

fn elapsed_to_db(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX)
}

fn elapsed_from_db(nanos: i64) -> Result<u64, ArchiveError> {
    u64::try_from(nanos).map_err(|_| ArchiveError::Corrupt(format!("negative elapsed {}", nanos)))
}

fn session_from_row(row: &SqliteRow) -> Result<Session, ArchiveError> {
    let kind: String = row.try_get("kind")?;
    let kind = match kind.as_str() {
        "live" => SessionKind::Live,
        "replay" => {
            let source: Option<String> = row.try_get("source")?;
            let source = source.ok_or_else(|| ArchiveError::Corrupt("replay session without source".into()))?;
            SessionKind::Replay {
                source: parse_session_id(&source)?,
            }
        }
        other => return Err(ArchiveError::Corrupt(format!("unknown session kind {:?}", other))),
    };
    let ended_at: Option<String> = row.try_get("ended_at")?;
    let channels: String = row.try_get("channels")?;
    Ok(Session {
        id: parse_session_id(row.try_get("id")?)?,
        kind,
        started_at: parse_time(row.try_get("started_at")?)?,
        ended_at: ended_at.as_deref().map(parse_time).transpose()?,
        channels: serde_json::from_str(&channels)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<ExportRecord, ArchiveError> {
    Ok(ExportRecord {
        session_id: parse_session_id(row.try_get("session_id")?)?,
        pid: row.try_get("pid")?,
        unit: row.try_get("unit")?,
        raw_value: row.try_get("raw_value")?,
        value: row.try_get("value")?,
        elapsed_ns: elapsed_from_db(row.try_get("elapsed_ns")?)?,
        timestamp: parse_time(row.try_get("timestamp")?)?,
        warning: row.try_get("warning")?,
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<AlertEvent, ArchiveError> {
    let condition: String = row.try_get("condition")?;
    Ok(AlertEvent {
        alert_id: alert_id_from_db(row.try_get("alert_id")?)?,
        name: row.try_get("name")?,
        session_id: parse_session_id(row.try_get("session_id")?)?,
        channel_id: row.try_get("pid")?,
        observed_value: row.try_get("value")?,
        threshold: row.try_get("threshold")?,
        condition: Condition::from_str(&condition).map_err(|e| ArchiveError::Corrupt(e.to_string()))?,
        message: row.try_get("message")?,
        timestamp: Timestamp {
            elapsed: Duration::from_nanos(elapsed_from_db(row.try_get("elapsed_ns")?)?),
            wall: parse_time(row.try_get("timestamp")?)?,
        },
        notify: NotifyFlags {
            email: row.try_get("notify_email")?,
            cloud: row.try_get("notify_cloud")?,
        },
    })
}

fn alert_config_from_row(row: &SqliteRow) -> Result<AlertConfig, ArchiveError> {
    let condition: String = row.try_get("condition")?;
    Ok(AlertConfig {
        id: alert_id_from_db(row.try_get("id")?)?,
        name: row.try_get("name")?,
        channel_id: row.try_get("pid")?,
        condition: Condition::from_str(&condition).map_err(|e| ArchiveError::Corrupt(e.to_string()))?,
        threshold: row.try_get("threshold")?,
        enabled: row.try_get("enabled")?,
        notify: NotifyFlags {
            email: row.try_get("notify_email")?,
            cloud: row.try_get("notify_cloud")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::{AlertEvaluator, AlertRegistry, NewAlert};
    use telemetry_core::{default_channels, Channel};

    fn boost() -> Channel {
        Channel::new("BOOST", "PSI", -15.0, 30.0)
    }

    fn live_readings(session: &Session, values: &[f64]) -> Vec<Reading> {
        let channel = boost();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                Reading::from_engineering(
                    session.id,
                    &channel,
                    *v,
                    session.timestamp_at(Duration::from_nanos(i as u64 * 100_000_007)),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sessions_roundtrip() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let mut session = Session::start(SessionKind::Live, vec!["RPM".into(), "BOOST".into()]);
        archive.archive(ArchiveRecord::SessionOpened(session.clone())).await.unwrap();

        let stored = archive.sessions().await.unwrap();
        assert_eq!(stored, vec![session.clone()]);

        session.ended_at = Some(Utc::now());
        archive.archive(ArchiveRecord::SessionClosed(session.clone())).await.unwrap();
        let replay = Session::start(SessionKind::Replay { source: session.id }, session.channels.clone());
        archive.upsert_session(&replay).await.unwrap();

        let stored = archive.sessions().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.contains(&session));
        assert!(stored.contains(&replay));
    }

    #[tokio::test]
    async fn test_readings_keep_order_and_bits() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let session = Session::start(SessionKind::Live, vec!["BOOST".into()]);
        let readings = live_readings(&session, &[0.1 + 0.2, 2.5, 1e-300, 29.999999999999996]);
        for reading in &readings {
            archive.archive(ArchiveRecord::Reading(reading.clone())).await.unwrap();
        }

        let stored = archive.readings(session.id).await.unwrap();
        assert_eq!(stored.len(), readings.len());
        for (record, reading) in stored.iter().zip(&readings) {
            assert_eq!(record.value.to_bits(), reading.converted_value.to_bits());
            assert_eq!(record.raw_value.to_bits(), reading.raw_value.to_bits());
            assert_eq!(Reading::from(record.clone()), *reading);
        }
        assert!(archive.readings(SessionId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alert_history() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let session = Session::start(SessionKind::Live, vec!["BOOST".into()]);
        let mut registry = AlertRegistry::new(default_channels().into_iter().map(|c| c.id));
        registry.create(NewAlert::new("Overboost", "BOOST", "gt", 20.0)).unwrap();
        let configs = registry.list();

        let mut evaluator = AlertEvaluator::new();
        for reading in live_readings(&session, &[18.0, 21.0, 19.0, 22.0]) {
            for event in evaluator.evaluate(&reading, &configs) {
                archive.archive(ArchiveRecord::Alert(event)).await.unwrap();
            }
        }

        let stored = archive.alert_history(session.id).await.unwrap();
        assert_eq!(stored, evaluator.history());
        assert_eq!(stored[0].message, "Alert 'Overboost': BOOST = 21.0 gt 20.0");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let session = Session::start(SessionKind::Live, vec!["BOOST".into()]);
        archive.upsert_session(&session).await.unwrap();
        for reading in live_readings(&session, &[1.0, 2.0]) {
            archive.insert_reading(&reading).await.unwrap();
        }

        assert!(archive.delete_session(session.id).await.unwrap());
        assert!(archive.sessions().await.unwrap().is_empty());
        assert!(archive.readings(session.id).await.unwrap().is_empty());
        assert!(!archive.delete_session(session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_written_in_one_transaction() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let session = Session::start(SessionKind::Live, vec!["BOOST".into()]);
        let values: Vec<f64> = (0..300).map(|i| f64::from(i) / 10.0).collect();
        let readings = live_readings(&session, &values);

        let mut batch = vec![ArchiveRecord::SessionOpened(session.clone())];
        batch.extend(readings.iter().cloned().map(ArchiveRecord::Reading));
        archive.archive_batch(batch).await.unwrap();

        assert_eq!(archive.sessions().await.unwrap(), vec![session.clone()]);
        let stored = archive.readings(session.id).await.unwrap();
        assert_eq!(stored.len(), 300);
        assert!(stored.iter().zip(&readings).all(|(r, reading)| r.value == reading.converted_value));
    }

    #[tokio::test]
    async fn test_alert_configs_roundtrip() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let mut registry = AlertRegistry::new(["RPM", "BOOST"]);
        let mut overboost = registry.create(NewAlert::new("Overboost", "BOOST", "gt", 20.0)).unwrap();
        let redline = registry.create(NewAlert::new("Redline", "RPM", "gte", 6500.0)).unwrap();
        let idle = registry.create(NewAlert::new("Stall", "RPM", "lt", 500.0)).unwrap();
        for alert in [&overboost, &redline, &idle] {
            archive.save_alert(alert).await.unwrap();
        }

        overboost.threshold = 22.5;
        overboost.enabled = false;
        overboost.notify = NotifyFlags { email: true, cloud: true };
        archive.save_alert(&overboost).await.unwrap();
        archive.delete_alert(redline.id).await.unwrap();
        assert!(!archive.delete_alert_config(redline.id).await.unwrap());

        let stored = archive.load_alerts().await.unwrap();
        assert_eq!(stored, vec![overboost.clone(), idle.clone()]);

        // A fresh registry continues numbering after the saved ids
        let mut restored = AlertRegistry::new(["RPM", "BOOST"]);
        assert_eq!(restored.restore(stored), 2);
        let next = restored.create(NewAlert::new("Low boost", "BOOST", "lt", -10.0)).unwrap();
        assert_eq!(next.id, AlertId(idle.id.0 + 1));
    }
}

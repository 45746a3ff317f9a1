//! Run auditing: one [`RunRecord`] per execution, one [`QualityLogEntry`]
//! per executed quality check.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RunRecorderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(RunStatus::Running),
            "SUCCEEDED" => Some(RunStatus::Succeeded),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub error_message: Option<String>,
    /// Annotations for destinations loaded despite a failing quality gate.
    pub warnings: Vec<String>,
}

impl RunRecord {
    pub fn new(pipeline_name: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.to_string(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            records_processed: 0,
            error_message: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// Finalizes the record in memory. A run is closed exactly once.
    pub fn close(&mut self, status: RunStatus, records_processed: u64, error: Option<String>) {
        debug_assert!(!self.is_closed(), "run {} finished twice", self.run_id);
        debug_assert!(status != RunStatus::Running);
        self.status = status;
        self.records_processed = records_processed;
        self.error_message = error;
        self.end_time = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLogEntry {
    pub run_id: Uuid,
    pub table_name: String,
    pub check_type: String,
    pub check_result: bool,
    pub details: serde_json::Value,
    pub checked_at: DateTime<Utc>,
}

/// Append-only audit trail for pipeline runs.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn start(&self, pipeline_name: &str) -> Result<RunRecord, RunRecorderError>;

    async fn log_quality(&self, entry: QualityLogEntry) -> Result<(), RunRecorderError>;

    /// Closes `record` and persists it. Calling this twice for one run is a
    /// contract violation.
    async fn finish(
        &self,
        record: &mut RunRecord,
        status: RunStatus,
        records_processed: u64,
        error: Option<String>,
    ) -> Result<(), RunRecorderError>;
}

/// Audit tables in a SQLite database file.
pub struct SqliteRunRecorder {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunRecorder {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, RunRecorderError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RunRecorderError::Unavailable(e.to_string()))?;
            }
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, RunRecorderError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RunRecorderError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                run_id             TEXT PRIMARY KEY,
                pipeline_name      TEXT NOT NULL,
                status             TEXT NOT NULL,
                start_time         TEXT NOT NULL,
                end_time           TEXT,
                records_processed  INTEGER NOT NULL DEFAULT 0,
                error_message      TEXT,
                warnings           TEXT
            );
            CREATE TABLE IF NOT EXISTS data_quality_logs (
                log_id        INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id        TEXT NOT NULL,
                table_name    TEXT NOT NULL,
                check_type    TEXT NOT NULL,
                check_result  INTEGER NOT NULL,
                details       TEXT,
                check_time    TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, RunRecorderError>
    where
        F: FnOnce(&Connection) -> Result<T, RunRecorderError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| RunRecorderError::Unavailable("audit connection poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| RunRecorderError::Unavailable(e.to_string()))?
    }

    pub async fn runs(&self) -> Result<Vec<RunRecord>, RunRecorderError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, pipeline_name, status, start_time, end_time,
                        records_processed, error_message, warnings
                 FROM pipeline_runs ORDER BY start_time",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let run_id: String = row.get(0)?;
                let status: String = row.get(2)?;
                let start: String = row.get(3)?;
                let end: Option<String> = row.get(4)?;
                let warnings: Option<String> = row.get(7)?;
                out.push(RunRecord {
                    run_id: Uuid::parse_str(&run_id)
                        .map_err(|e| RunRecorderError::Unavailable(e.to_string()))?,
                    pipeline_name: row.get(1)?,
                    status: RunStatus::parse(&status).ok_or_else(|| {
                        RunRecorderError::Unavailable(format!("unknown run status {status}"))
                    })?,
                    start_time: parse_ts(&start)?,
                    end_time: end.as_deref().map(parse_ts).transpose()?,
                    records_processed: row.get::<_, i64>(5)? as u64,
                    error_message: row.get(6)?,
                    warnings: match warnings {
                        Some(w) => serde_json::from_str(&w)?,
                        None => Vec::new(),
                    },
                });
            }
            Ok(out)
        })
        .await
    }

    pub async fn quality_logs(&self, run_id: Uuid) -> Result<Vec<QualityLogEntry>, RunRecorderError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT table_name, check_type, check_result, details, check_time
                 FROM data_quality_logs WHERE run_id = ?1 ORDER BY log_id",
            )?;
            let mut rows = stmt.query(params![run_id.to_string()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let details: Option<String> = row.get(3)?;
                let checked_at: String = row.get(4)?;
                out.push(QualityLogEntry {
                    run_id,
                    table_name: row.get(0)?,
                    check_type: row.get(1)?,
                    check_result: row.get::<_, i64>(2)? != 0,
                    details: match details {
                        Some(d) => serde_json::from_str(&d)?,
                        None => serde_json::Value::Null,
                    },
                    checked_at: parse_ts(&checked_at)?,
                });
            }
            Ok(out)
        })
        .await
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, RunRecorderError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RunRecorderError::Unavailable(format!("bad timestamp {s:?}: {e}")))
}

#[async_trait]
impl RunRecorder for SqliteRunRecorder {
    async fn start(&self, pipeline_name: &str) -> Result<RunRecord, RunRecorderError> {
        let record = RunRecord::new(pipeline_name);
        let row = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO pipeline_runs (run_id, pipeline_name, status, start_time)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.run_id.to_string(),
                    row.pipeline_name,
                    row.status.as_str(),
                    row.start_time.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?;
        info!(run_id = %record.run_id, "Started pipeline run");
        Ok(record)
    }

    async fn log_quality(&self, entry: QualityLogEntry) -> Result<(), RunRecorderError> {
        let details = serde_json::to_string(&entry.details)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO data_quality_logs
                    (run_id, table_name, check_type, check_result, details, check_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.run_id.to_string(),
                    entry.table_name,
                    entry.check_type,
                    entry.check_result as i64,
                    details,
                    entry.checked_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn finish(
        &self,
        record: &mut RunRecord,
        status: RunStatus,
        records_processed: u64,
        error: Option<String>,
    ) -> Result<(), RunRecorderError> {
        record.close(status, records_processed, error);
        let row = record.clone();
        let warnings = serde_json::to_string(&row.warnings)?;
        self.with_conn(move |conn| {
            let end_time = row.end_time.map(|t| t.to_rfc3339());
            let updated = conn.execute(
                "UPDATE pipeline_runs
                 SET status = ?1, end_time = ?2, records_processed = ?3, error_message = ?4, warnings = ?5
                 WHERE run_id = ?6",
                params![
                    row.status.as_str(),
                    end_time,
                    row.records_processed as i64,
                    row.error_message,
                    warnings,
                    row.run_id.to_string()
                ],
            )?;
            // The start row may be missing if `start` failed; write the full record.
            if updated == 0 {
                conn.execute(
                    "INSERT INTO pipeline_runs
                        (run_id, pipeline_name, status, start_time, end_time,
                         records_processed, error_message, warnings)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        row.run_id.to_string(),
                        row.pipeline_name,
                        row.status.as_str(),
                        row.start_time.to_rfc3339(),
                        end_time,
                        row.records_processed as i64,
                        row.error_message,
                        warnings
                    ],
                )?;
            }
            Ok(())
        })
        .await?;
        info!(run_id = %record.run_id, status = record.status.as_str(), "Completed pipeline run");
        Ok(())
    }
}

/// In-process recorder for tests and dry runs.
#[derive(Default)]
pub struct MemoryRunRecorder {
    runs: Mutex<Vec<RunRecord>>,
    quality: Mutex<Vec<QualityLogEntry>>,
}

impl MemoryRunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn quality_logs(&self) -> Vec<QualityLogEntry> {
        self.quality.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> RunRecorderError {
    RunRecorderError::Unavailable("recorder lock poisoned".into())
}

#[async_trait]
impl RunRecorder for MemoryRunRecorder {
    async fn start(&self, pipeline_name: &str) -> Result<RunRecord, RunRecorderError> {
        let record = RunRecord::new(pipeline_name);
        self.runs.lock().map_err(poisoned)?.push(record.clone());
        debug!(run_id = %record.run_id, "Started in-memory run");
        Ok(record)
    }

    async fn log_quality(&self, entry: QualityLogEntry) -> Result<(), RunRecorderError> {
        self.quality.lock().map_err(poisoned)?.push(entry);
        Ok(())
    }

    async fn finish(
        &self,
        record: &mut RunRecord,
        status: RunStatus,
        records_processed: u64,
        error: Option<String>,
    ) -> Result<(), RunRecorderError> {
        record.close(status, records_processed, error);
        let mut runs = self.runs.lock().map_err(poisoned)?;
        match runs.iter_mut().find(|r| r.run_id == record.run_id) {
            Some(existing) => *existing = record.clone(),
            None => runs.push(record.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(run_id: Uuid, check: &str, passed: bool) -> QualityLogEntry {
        QualityLogEntry {
            run_id,
            table_name: "sales".into(),
            check_type: check.into(),
            check_result: passed,
            details: json!({ "null_counts": { "sale_id": 2 } }),
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_recorder_round_trip() {
        let recorder = SqliteRunRecorder::open_in_memory().unwrap();
        let mut record = recorder.start("sales_pipeline").await.unwrap();
        assert_eq!(record.status, RunStatus::Running);

        recorder
            .log_quality(entry(record.run_id, "not_null", false))
            .await
            .unwrap();
        recorder
            .log_quality(entry(record.run_id, "unique", true))
            .await
            .unwrap();

        record.warnings.push("customers: quality score 0.80".into());
        recorder
            .finish(&mut record, RunStatus::Succeeded, 42, None)
            .await
            .unwrap();

        let runs = recorder.runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Succeeded);
        assert_eq!(runs[0].records_processed, 42);
        assert_eq!(runs[0].warnings, record.warnings);
        assert!(runs[0].end_time.is_some());

        let logs = recorder.quality_logs(record.run_id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].check_type, "not_null");
        assert!(!logs[0].check_result);
        assert_eq!(logs[0].details["null_counts"]["sale_id"], 2);
    }

    #[tokio::test]
    async fn test_finish_without_start_row_inserts() {
        let recorder = SqliteRunRecorder::open_in_memory().unwrap();
        let mut record = RunRecord::new("orphan");
        recorder
            .finish(&mut record, RunStatus::Failed, 0, Some("boom".into()))
            .await
            .unwrap();
        let runs = recorder.runs().await.unwrap();
        assert_eq!(runs[0].error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_memory_recorder_updates_in_place() {
        let recorder = MemoryRunRecorder::new();
        let mut record = recorder.start("p").await.unwrap();
        recorder
            .finish(&mut record, RunStatus::Failed, 3, Some("sales: load failed".into()))
            .await
            .unwrap();
        let runs = recorder.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].is_closed());
    }
}

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{Null, ToSqlOutput};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use tracing::debug;

use super::{MergeCounts, Sink};
use crate::dataset::{Row, Value};
use crate::error::SinkError;

/// Largest magnitude stored as INTEGER rather than REAL.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::String(s) => ToSqlOutput::from(s.as_str()),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER => {
                ToSqlOutput::from(*n as i64)
            }
            Value::Number(n) => ToSqlOutput::from(*n),
            Value::Date(d) => ToSqlOutput::from(d.format("%Y-%m-%d").to_string()),
            Value::Null => ToSqlOutput::from(Null),
        })
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Target tables in a SQLite database. Tables missing at first write are
/// created with the merge key as primary key.
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Opens (or creates) the database file, creating missing parent
    /// directories.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, SinkError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SinkError::Permanent(format!("{}: {}", parent.display(), e)))?;
            }
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SinkError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of rows in `table`.
    pub async fn count(&self, table: &str) -> Result<u64, SinkError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| SinkError::Permanent("sink connection poisoned".into()))?;
            let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
        .map_err(|e| SinkError::Transient(e.to_string()))?
    }

    /// Runs `f` against the shared connection on the blocking pool.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T, SinkError>
    where
        F: FnOnce(&mut Connection) -> Result<T, SinkError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| SinkError::Permanent("sink connection poisoned".into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| SinkError::Transient(e.to_string()))?
    }
}

fn merge_rows(
    conn: &mut Connection,
    table: &str,
    merge_key: &str,
    columns: &[String],
    rows: &[Row],
) -> Result<MergeCounts, SinkError> {
    let key_idx = columns
        .iter()
        .position(|c| c == merge_key)
        .ok_or_else(|| SinkError::Permanent(format!("merge key '{merge_key}' not in batch columns")))?;

    let t = quote_ident(table);
    let k = quote_ident(merge_key);
    let column_defs: Vec<String> = columns
        .iter()
        .map(|c| {
            if c == merge_key {
                format!("{} PRIMARY KEY", quote_ident(c))
            } else {
                quote_ident(c)
            }
        })
        .collect();
    let non_key: Vec<usize> = (0..columns.len()).filter(|&i| i != key_idx).collect();
    let set_clause: Vec<String> = non_key
        .iter()
        .enumerate()
        .map(|(p, &i)| format!("{} = ?{}", quote_ident(&columns[i]), p + 1))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} ({});",
        column_defs.join(", ")
    ))?;

    let mut counts = MergeCounts::default();
    {
        let mut exists = tx.prepare(&format!("SELECT 1 FROM {t} WHERE {k} = ?1"))?;
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {t} ({}) VALUES ({})",
            column_list.join(", "),
            placeholders.join(", ")
        ))?;
        let mut update = if set_clause.is_empty() {
            None
        } else {
            Some(tx.prepare(&format!(
                "UPDATE {t} SET {} WHERE {k} = ?{}",
                set_clause.join(", "),
                non_key.len() + 1
            ))?)
        };

        for row in rows {
            let key = &row[key_idx];
            if key.is_null() {
                return Err(SinkError::Permanent(format!(
                    "null merge key '{merge_key}' in table '{table}'"
                )));
            }
            let found = exists
                .query_row([key], |_| Ok(()))
                .optional()?
                .is_some();
            if found {
                if let Some(update) = update.as_mut() {
                    let values = non_key.iter().map(|&i| &row[i]).chain(std::iter::once(key));
                    update.execute(params_from_iter(values))?;
                }
                counts.updated += 1;
            } else {
                insert.execute(params_from_iter(row.iter()))?;
                counts.inserted += 1;
            }
        }
    }
    tx.commit()?;
    Ok(counts)
}

#[async_trait]
impl Sink for SqliteSink {
    async fn merge_batch(
        &self,
        table: &str,
        merge_key: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<MergeCounts, SinkError> {
        let table = table.to_string();
        let merge_key = merge_key.to_string();
        let columns = columns.to_vec();
        let rows = rows.to_vec();
        let counts = self
            .with_connection(move |conn| merge_rows(conn, &table, &merge_key, &columns, &rows))
            .await?;
        debug!(inserted = counts.inserted, updated = counts.updated, "Merged batch");
        Ok(counts)
    }
}

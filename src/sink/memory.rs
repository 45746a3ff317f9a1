use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MergeCounts, Sink};
use crate::dataset::Row;
use crate::error::SinkError;

#[derive(Debug, Default, Clone)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
    index: HashMap<String, usize>,
}

/// One `merge_batch` call as seen by the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCall {
    pub table: String,
    pub rows: Vec<Row>,
    pub succeeded: bool,
}

/// In-process sink for tests and dry runs. Failures can be scripted per
/// call with [`MemorySink::fail_next`].
#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, Table>>,
    calls: Mutex<Vec<BatchCall>>,
    scripted: Mutex<VecDeque<SinkError>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` calls fail with `error` before touching any table.
    pub fn fail_next(&self, times: usize, error: SinkError) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.extend(std::iter::repeat(error).take(times));
        }
    }

    /// Rows of `table` in first-insert order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(table).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(table).map(|t| t.columns.clone()))
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<BatchCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, table: &str, rows: &[Row], succeeded: bool) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(BatchCall {
                table: table.to_string(),
                rows: rows.to_vec(),
                succeeded,
            });
        }
    }
}

fn poisoned<T>(_: T) -> SinkError {
    SinkError::Permanent("memory sink lock poisoned".into())
}

#[async_trait]
impl Sink for MemorySink {
    async fn merge_batch(
        &self,
        table: &str,
        merge_key: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<MergeCounts, SinkError> {
        if let Some(err) = self.scripted.lock().map_err(poisoned)?.pop_front() {
            self.record(table, rows, false);
            return Err(err);
        }

        let key_idx = columns
            .iter()
            .position(|c| c == merge_key)
            .ok_or_else(|| SinkError::Permanent(format!("merge key '{merge_key}' not in batch columns")))?;

        let mut tables = self.tables.lock().map_err(poisoned)?;
        let entry = tables.entry(table.to_string()).or_insert_with(|| Table {
            columns: columns.to_vec(),
            ..Table::default()
        });
        if entry.columns != columns {
            drop(tables);
            self.record(table, rows, false);
            return Err(SinkError::Permanent(format!(
                "column set does not match table '{table}'"
            )));
        }

        // Stage into a copy so a bad row leaves the table untouched.
        let mut staged = entry.clone();
        let mut counts = MergeCounts::default();
        for row in rows {
            let key = row[key_idx]
                .key_repr()
                .ok_or_else(|| SinkError::Permanent(format!("null merge key '{merge_key}'")))?;
            match staged.index.get(&key) {
                Some(&pos) => {
                    staged.rows[pos] = row.clone();
                    counts.updated += 1;
                }
                None => {
                    staged.index.insert(key, staged.rows.len());
                    staged.rows.push(row.clone());
                    counts.inserted += 1;
                }
            }
        }
        *entry = staged;
        drop(tables);
        self.record(table, rows, true);
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let sink = MemorySink::new();
        sink.fail_next(2, SinkError::Transient("connection reset".into()));
        let cols = vec!["id".to_string()];
        let rows = vec![vec![Value::Number(1.0)]];

        assert!(sink.merge_batch("t", "id", &cols, &rows).await.is_err());
        assert!(sink.merge_batch("t", "id", &cols, &rows).await.is_err());
        let counts = sink.merge_batch("t", "id", &cols, &rows).await.unwrap();
        assert_eq!(counts.inserted, 1);
        assert_eq!(sink.calls().len(), 3);
        assert_eq!(sink.rows("t").len(), 1);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let sink = MemorySink::new();
        let cols = vec!["id".to_string(), "v".to_string()];
        let rows = vec![
            vec![Value::Number(1.0), Value::from("a")],
            vec![Value::Number(2.0), Value::from("b")],
        ];
        sink.merge_batch("t", "id", &cols, &rows).await.unwrap();
        let before = sink.rows("t");
        let again = sink.merge_batch("t", "id", &cols, &rows).await.unwrap();
        assert_eq!(again, MergeCounts { inserted: 0, updated: 2 });
        assert_eq!(sink.rows("t"), before);
    }
}

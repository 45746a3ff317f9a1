use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{info, instrument, warn};

use super::Sink;
use crate::config::{DestinationSpec, Settings};
use crate::dataset::{Dataset, Row};
use crate::error::LoadError;
use crate::metrics::LoadMetrics;
use crate::presets;

const BACKOFF_MAX_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub index: usize,
    pub rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub batches: Vec<BatchReport>,
}

/// Delay before retry number `attempt` (1-based): `base · 2^(attempt-1)`,
/// capped at 30 seconds.
pub(crate) fn compute_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(BACKOFF_MAX_MS))
}

/// Loads datasets into a [`Sink`] in batches, one writer per table at a time.
pub struct DestinationWriter {
    sink: Arc<dyn Sink>,
    table_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DestinationWriter {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    fn table_lock(&self, table: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.table_locks.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(table.to_string()).or_default()),
            // Poisoned map: recover the inner map, a panic elsewhere does not
            // invalidate the locks themselves.
            Err(poisoned) => Arc::clone(poisoned.into_inner().entry(table.to_string()).or_default()),
        }
    }

    /// Columns sent to the sink: declared, else the table preset, else all.
    /// The merge key is always included.
    fn resolve_columns(dataset: &Dataset, dest: &DestinationSpec) -> Result<Vec<String>, LoadError> {
        if !dataset.has_column(&dest.merge_key) {
            return Err(LoadError::MissingMergeKey(dest.merge_key.clone()));
        }
        let mut columns = dest
            .columns
            .clone()
            .or_else(|| presets::columns_for_table(&dest.table))
            .unwrap_or_else(|| dataset.columns().to_vec());
        if let Some(missing) = columns.iter().find(|c| !dataset.has_column(c)) {
            return Err(LoadError::MissingColumn(missing.clone()));
        }
        if !columns.contains(&dest.merge_key) {
            columns.insert(0, dest.merge_key.clone());
        }
        Ok(columns)
    }

    #[instrument(skip_all, fields(destination = %dest.name, table = %dest.table, rows = dataset.len()))]
    pub async fn load(
        &self,
        dataset: &Dataset,
        dest: &DestinationSpec,
        settings: &Settings,
    ) -> Result<LoadReport, LoadError> {
        let columns = Self::resolve_columns(dataset, dest)?;
        let projected = dataset
            .project(&columns)
            .map_err(|e| LoadError::MissingColumn(e.to_string()))?;

        let lock = self.table_lock(&dest.table);
        let _guard = lock.lock().await;

        let mut report = LoadReport {
            table: dest.table.clone(),
            ..Default::default()
        };
        for (index, batch) in projected.batches(settings.batch_size).enumerate() {
            let batch_report = self
                .write_batch(index, &dest.table, &dest.merge_key, &columns, batch, settings)
                .await
                .map_err(|e| {
                    LoadMetrics::record_failure(&dest.table);
                    e
                })?;
            report.rows += batch_report.rows;
            report.inserted += batch_report.inserted;
            report.updated += batch_report.updated;
            report.batches.push(batch_report);
        }

        info!(
            batches = report.batches.len(),
            inserted = report.inserted,
            updated = report.updated,
            "Loaded destination"
        );
        Ok(report)
    }

    async fn write_batch(
        &self,
        index: usize,
        table: &str,
        merge_key: &str,
        columns: &[String],
        rows: &[Row],
        settings: &Settings,
    ) -> Result<BatchReport, LoadError> {
        let max_attempts = settings.retry_attempts.max(1);
        let attempt_timeout = Duration::from_secs(settings.timeout_seconds);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let result = timeout(
                attempt_timeout,
                self.sink.merge_batch(table, merge_key, columns, rows),
            )
            .await;

            last_error = match result {
                Ok(Ok(counts)) => {
                    LoadMetrics::record_batch(
                        table,
                        counts.inserted,
                        counts.updated,
                        attempt,
                        started.elapsed().as_secs_f64(),
                    );
                    return Ok(BatchReport {
                        index,
                        rows: rows.len(),
                        inserted: counts.inserted,
                        updated: counts.updated,
                        attempts: attempt,
                    });
                }
                Ok(Err(err)) if !err.is_transient() => {
                    return Err(LoadError::Permanent { batch: index, source: err });
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("attempt timed out after {}s", settings.timeout_seconds),
            };

            if attempt < max_attempts {
                let delay = compute_backoff(settings.backoff_base_ms, attempt);
                warn!(
                    batch = index,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Batch failed, retrying"
                );
                sleep(delay).await;
            }
        }

        Err(LoadError::RetriesExhausted {
            batch: index,
            attempts: max_attempts,
            last_error,
        })
    }
}

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use sales_etl::config::PipelineConfig;
use sales_etl::dataset::Row;
use sales_etl::error::SinkError;
use sales_etl::pipeline::{DestinationStatus, Orchestrator};
use sales_etl::recorder::{MemoryRunRecorder, RunRecorder, RunStatus, SqliteRunRecorder};
use sales_etl::sink::memory::MemorySink;
use sales_etl::sink::sqlite::SqliteSink;
use sales_etl::sink::{MergeCounts, Sink};

const SALES: &str = "sale_id,product_id,customer_id,quantity,amount,sale_date
1,1,1,2,99.98,2024-01-15
2,2,2,1,249.00,2024-01-16
3,3,3,5,74.95,2024-02-03
4,1,4,1,49.99,2024-02-10
5,4,5,3,1799.97,2024-03-01
";

const PRODUCTS: &str = "product_id,product_name,category,price
1,wireless mouse,electronics,49.99
2,standing desk,home,249.00
3,paperback novel,books,14.99
4,smart tv,electronics,599.99
";

// One of five customers has a malformed email: score 0.80.
const CUSTOMERS: &str = "customer_id,customer_name,email,region
1,ada lovelace,ada@company.com,west
2,alan turing,alan@gmail.com,east
3,grace hopper,not-an-email,
4,linus torvalds,linus@example.org,north
5,margaret hamilton,margaret@outlook.com,south
";

fn write_fixtures(dir: &Path) -> Result<()> {
    std::fs::write(dir.join("sales.csv"), SALES)?;
    std::fs::write(dir.join("products.csv"), PRODUCTS)?;
    std::fs::write(dir.join("customers.csv"), CUSTOMERS)?;
    Ok(())
}

fn config(dir: &Path, fail_on_error: bool) -> Result<PipelineConfig> {
    let source = |name: &str| {
        json!({ "name": name, "type": "csv", "path": dir.join(format!("{name}.csv")), "format": "csv" })
    };
    let dest = |name: &str, key: &str| {
        json!({
            "name": format!("{name}_table"), "source": name, "type": "database",
            "table": name, "merge_key": key, "update_type": "merge"
        })
    };
    let doc = json!({
        "pipeline_name": "sales_analytics_pipeline",
        "version": "1.0.0",
        "sources": [source("sales"), source("products"), source("customers")],
        "destinations": [
            dest("sales", "sale_id"),
            dest("products", "product_id"),
            dest("customers", "customer_id")
        ],
        "quality_checks": { "enabled": true, "threshold": 0.95, "fail_on_error": fail_on_error },
        "settings": { "batch_size": 2, "retry_attempts": 3, "backoff_base_ms": 1 }
    });
    Ok(PipelineConfig::from_json_str(&doc.to_string())?)
}

#[tokio::test]
async fn test_below_threshold_dataset_still_loads_with_warning() -> Result<()> {
    let dir = tempdir()?;
    write_fixtures(dir.path())?;

    let sink = Arc::new(MemorySink::new());
    let recorder = Arc::new(MemoryRunRecorder::new());
    let summary = Orchestrator::new(Arc::new(config(dir.path(), false)?), sink.clone(), recorder.clone())
        .run(CancellationToken::new())
        .await;

    assert!(summary.succeeded(), "run failed: {:?}", summary.record.error_message);
    assert_eq!(summary.record.records_processed, 14);

    let customers = summary.outcome("customers_table").unwrap();
    assert_eq!(customers.status, DestinationStatus::Loaded);
    assert_eq!(customers.quality_score, Some(0.8));
    assert_eq!(sink.rows("customers").len(), 5);

    assert_eq!(summary.record.warnings.len(), 1);
    assert!(summary.record.warnings[0].starts_with("customers_table: "));

    let logs = recorder.quality_logs();
    let failing: Vec<_> = logs.iter().filter(|e| !e.check_result).collect();
    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0].table_name, "customers");
    assert_eq!(failing[0].check_type, "pattern");
    assert!(logs.iter().all(|e| e.run_id == summary.record.run_id));

    let runs = recorder.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn test_fail_on_error_skips_destination_and_fails_run() -> Result<()> {
    let dir = tempdir()?;
    write_fixtures(dir.path())?;

    let sink = Arc::new(MemorySink::new());
    let summary = Orchestrator::new(
        Arc::new(config(dir.path(), true)?),
        sink.clone(),
        Arc::new(MemoryRunRecorder::new()),
    )
    .run(CancellationToken::new())
    .await;

    assert_eq!(summary.record.status, RunStatus::Failed);
    let customers = summary.outcome("customers_table").unwrap();
    assert_eq!(customers.status, DestinationStatus::Skipped);
    assert!(sink.rows("customers").is_empty());
    assert_eq!(sink.rows("sales").len(), 5);

    let message = summary.record.error_message.as_deref().unwrap();
    assert!(message.starts_with("customers_table: quality score 0.80 below threshold 0.95"));
    Ok(())
}

#[tokio::test]
async fn test_sqlite_run_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    write_fixtures(dir.path())?;
    let db = dir.path().join("analytics.db");
    let cfg = Arc::new(config(dir.path(), false)?);

    let sink = Arc::new(SqliteSink::open(&db)?);
    let recorder = Arc::new(SqliteRunRecorder::open(&db)?);

    for _ in 0..2 {
        let summary = Orchestrator::new(cfg.clone(), sink.clone(), recorder.clone())
            .run(CancellationToken::new())
            .await;
        assert!(summary.succeeded());
    }

    assert_eq!(sink.count("sales").await?, 5);
    assert_eq!(sink.count("products").await?, 4);
    assert_eq!(sink.count("customers").await?, 5);

    let runs = recorder.runs().await?;
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Succeeded));
    let logs = recorder.quality_logs(runs[1].run_id).await?;
    assert!(logs.iter().any(|e| e.table_name == "customers" && !e.check_result));
    Ok(())
}

/// Fails every call for one table a fixed number of times, then delegates.
struct FlakySink {
    inner: MemorySink,
    table: String,
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Sink for FlakySink {
    async fn merge_batch(
        &self,
        table: &str,
        merge_key: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<MergeCounts, SinkError> {
        if table == self.table && self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(SinkError::Transient("connection lost".into()));
        }
        self.inner.merge_batch(table, merge_key, columns, rows).await
    }
}

#[tokio::test]
async fn test_transient_failures_within_budget_succeed() -> Result<()> {
    let dir = tempdir()?;
    write_fixtures(dir.path())?;

    let sink = Arc::new(FlakySink {
        inner: MemorySink::new(),
        table: "products".into(),
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let summary = Orchestrator::new(
        Arc::new(config(dir.path(), false)?),
        sink.clone(),
        Arc::new(MemoryRunRecorder::new()),
    )
    .run(CancellationToken::new())
    .await;

    assert!(summary.succeeded());
    assert_eq!(sink.inner.rows("products").len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_fail_only_that_destination() -> Result<()> {
    let dir = tempdir()?;
    write_fixtures(dir.path())?;

    let sink = Arc::new(FlakySink {
        inner: MemorySink::new(),
        table: "products".into(),
        failures: 3,
        calls: AtomicUsize::new(0),
    });
    let summary = Orchestrator::new(
        Arc::new(config(dir.path(), false)?),
        sink.clone(),
        Arc::new(MemoryRunRecorder::new()),
    )
    .run(CancellationToken::new())
    .await;

    assert_eq!(summary.record.status, RunStatus::Failed);
    let products = summary.outcome("products_table").unwrap();
    assert_eq!(products.status, DestinationStatus::Failed);
    assert!(products
        .cause
        .as_deref()
        .unwrap()
        .contains("batch 0 failed after 3 attempts"));
    assert_eq!(sink.inner.rows("sales").len(), 5);
    assert_eq!(sink.inner.rows("customers").len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_recorder_failure_does_not_mask_outcome() -> Result<()> {
    struct BrokenRecorder;

    #[async_trait]
    impl RunRecorder for BrokenRecorder {
        async fn start(
            &self,
            _pipeline_name: &str,
        ) -> Result<sales_etl::recorder::RunRecord, sales_etl::error::RunRecorderError> {
            Err(sales_etl::error::RunRecorderError::Unavailable("disk full".into()))
        }

        async fn log_quality(
            &self,
            _entry: sales_etl::recorder::QualityLogEntry,
        ) -> Result<(), sales_etl::error::RunRecorderError> {
            Err(sales_etl::error::RunRecorderError::Unavailable("disk full".into()))
        }

        async fn finish(
            &self,
            _record: &mut sales_etl::recorder::RunRecord,
            _status: RunStatus,
            _records_processed: u64,
            _error: Option<String>,
        ) -> Result<(), sales_etl::error::RunRecorderError> {
            Err(sales_etl::error::RunRecorderError::Unavailable("disk full".into()))
        }
    }

    let dir = tempdir()?;
    write_fixtures(dir.path())?;
    let summary = Orchestrator::new(
        Arc::new(config(dir.path(), false)?),
        Arc::new(MemorySink::new()),
        Arc::new(BrokenRecorder),
    )
    .run(CancellationToken::new())
    .await;

    assert!(summary.succeeded());
    assert!(summary.record.end_time.is_some());
    assert_eq!(summary.record.records_processed, 14);
    Ok(())
}

#[tokio::test]
async fn test_table_preset_applies_when_source_name_differs() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daily.csv");
    std::fs::write(
        &path,
        "sale_id,product_id,customer_id,quantity,amount,sale_date\n\
         1,1,1,2,99.98,2024-01-15\n\
         2,2,2,1,249.00,2024-01-16\n",
    )?;
    let doc = json!({
        "pipeline_name": "daily_pipeline",
        "version": "1.0.0",
        "sources": [{ "name": "daily_sales", "type": "csv", "path": path, "format": "csv" }],
        "destinations": [{
            "name": "sales_table", "source": "daily_sales", "type": "database",
            "table": "sales", "merge_key": "sale_id"
        }],
        "quality_checks": { "enabled": true, "threshold": 0.95, "fail_on_error": true }
    });

    let sink = Arc::new(MemorySink::new());
    let summary = Orchestrator::new(
        Arc::new(PipelineConfig::from_json_str(&doc.to_string())?),
        sink.clone(),
        Arc::new(MemoryRunRecorder::new()),
    )
    .run(CancellationToken::new())
    .await;

    let outcome = summary.outcome("sales_table").unwrap();
    assert_eq!(outcome.status, DestinationStatus::Loaded, "{:?}", outcome.cause);
    assert_eq!(outcome.quality_score, Some(1.0));
    let rows = sink.rows("sales");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.iter().all(|v| !matches!(v, sales_etl::Value::String(_)))));
    Ok(())
}

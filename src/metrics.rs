//! Pipeline metrics, grouped by stage.
//!
//! Metric names follow `sales_etl_<stage>_<name>[_total]`. No exporter is
//! installed here; without a recorder the macros are no-ops.

macro_rules! stage_metric {
    (counter, $stage:literal, $name:literal) => {
        concat!("sales_etl_", $stage, "_", $name, "_total")
    };
    (histogram, $stage:literal, $name:literal) => {
        concat!("sales_etl_", $stage, "_", $name)
    };
    (gauge, $stage:literal, $name:literal) => {
        concat!("sales_etl_", $stage, "_", $name)
    };
}

pub struct ExtractMetrics;

impl ExtractMetrics {
    pub fn record_success(source: &str, rows: usize, duration_secs: f64) {
        ::metrics::counter!(stage_metric!(counter, "extract", "sources_success"), "source" => source.to_string())
            .increment(1);
        ::metrics::counter!(stage_metric!(counter, "extract", "rows"), "source" => source.to_string())
            .increment(rows as u64);
        ::metrics::histogram!(stage_metric!(histogram, "extract", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_error(source: &str) {
        ::metrics::counter!(stage_metric!(counter, "extract", "sources_error"), "source" => source.to_string())
            .increment(1);
    }
}

pub struct TransformMetrics;

impl TransformMetrics {
    pub fn record(source: &str, rows_dropped: usize, coercion_failures: usize) {
        ::metrics::counter!(stage_metric!(counter, "transform", "rows_dropped"), "source" => source.to_string())
            .increment(rows_dropped as u64);
        ::metrics::counter!(stage_metric!(counter, "transform", "coercion_failures"), "source" => source.to_string())
            .increment(coercion_failures as u64);
    }
}

pub struct QualityMetrics;

impl QualityMetrics {
    pub fn record_score(table: &str, score: f64, passed: bool) {
        ::metrics::gauge!(stage_metric!(gauge, "quality", "score"), "table" => table.to_string())
            .set(score);
        if passed {
            ::metrics::counter!(stage_metric!(counter, "quality", "gates_passed")).increment(1);
        } else {
            ::metrics::counter!(stage_metric!(counter, "quality", "gates_failed")).increment(1);
        }
    }
}

pub struct LoadMetrics;

impl LoadMetrics {
    pub fn record_batch(table: &str, inserted: usize, updated: usize, attempts: u32, duration_secs: f64) {
        ::metrics::counter!(stage_metric!(counter, "load", "rows_inserted"), "table" => table.to_string())
            .increment(inserted as u64);
        ::metrics::counter!(stage_metric!(counter, "load", "rows_updated"), "table" => table.to_string())
            .increment(updated as u64);
        if attempts > 1 {
            ::metrics::counter!(stage_metric!(counter, "load", "retries"))
                .increment(u64::from(attempts - 1));
        }
        ::metrics::histogram!(stage_metric!(histogram, "load", "batch_duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_failure(table: &str) {
        ::metrics::counter!(stage_metric!(counter, "load", "failures"), "table" => table.to_string())
            .increment(1);
    }
}

pub struct RunMetrics;

impl RunMetrics {
    pub fn record_run(succeeded: bool, records_processed: u64, duration_secs: f64) {
        if succeeded {
            ::metrics::counter!(stage_metric!(counter, "run", "succeeded")).increment(1);
        } else {
            ::metrics::counter!(stage_metric!(counter, "run", "failed")).increment(1);
        }
        ::metrics::counter!(stage_metric!(counter, "run", "records_processed"))
            .increment(records_processed);
        ::metrics::histogram!(stage_metric!(histogram, "run", "duration_seconds"))
            .record(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_stage_metric_names() {
        assert_eq!(
            stage_metric!(counter, "load", "rows_inserted"),
            "sales_etl_load_rows_inserted_total"
        );
        assert_eq!(
            stage_metric!(gauge, "quality", "score"),
            "sales_etl_quality_score"
        );
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        super::QualityMetrics::record_score("sales", 0.95, true);
        super::LoadMetrics::record_batch("sales", 2, 1, 3, 0.01);
    }
}

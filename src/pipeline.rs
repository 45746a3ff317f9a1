//! Run orchestration: extract, transform, validate and load every source,
//! in parallel across sources and sequentially within one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{DestinationSpec, PipelineConfig, SourceSpec};
use crate::error::{PipelineError, SourceReadError};
use crate::metrics::{ExtractMetrics, RunMetrics, TransformMetrics};
use crate::presets;
use crate::quality::QualityGate;
use crate::recorder::{RunRecord, RunRecorder, RunStatus};
use crate::sink::{DestinationWriter, Sink};
use crate::source::SourceReader;
use crate::transform::{TransformReport, TransformSpec, Transformer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Init,
    Extracting,
    Transforming,
    Validating,
    Loading,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Validating and Loading repeat once per destination of a source.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Init, Extracting) => true,
            (Extracting, Transforming) => true,
            (Transforming, Validating | Completed) => true,
            (Validating, Loading | Validating | Completed) => true,
            (Loading, Validating | Completed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationStatus {
    Loaded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationOutcome {
    pub destination: String,
    pub source: String,
    pub table: String,
    pub status: DestinationStatus,
    pub rows_loaded: usize,
    pub inserted: usize,
    pub updated: usize,
    pub quality_score: Option<f64>,
    pub cause: Option<String>,
    /// Set when the destination loaded despite a failing quality gate.
    pub warning: Option<String>,
}

impl DestinationOutcome {
    fn new(dest: &DestinationSpec, status: DestinationStatus) -> Self {
        Self {
            destination: dest.name.clone(),
            source: dest.source.clone(),
            table: dest.table.clone(),
            status,
            rows_loaded: 0,
            inserted: 0,
            updated: 0,
            quality_score: None,
            cause: None,
            warning: None,
        }
    }

    fn not_loaded(dest: &DestinationSpec, status: DestinationStatus, cause: String) -> Self {
        Self {
            cause: Some(cause),
            ..Self::new(dest, status)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub stage: Stage,
    pub rows_extracted: usize,
    pub transform: Option<TransformReport>,
    pub error: Option<String>,
    pub destinations: Vec<DestinationOutcome>,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            stage: Stage::Init,
            rows_extracted: 0,
            transform: None,
            error: None,
            destinations: Vec::new(),
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal stage transition {:?} -> {:?}",
            self.stage,
            next
        );
        debug!(source = %self.source, from = ?self.stage, to = ?next, "Stage transition");
        self.stage = next;
    }

    /// Fails the source and every destination fed by it with `cause`.
    fn fail(mut self, dests: &[&DestinationSpec], status: DestinationStatus, cause: String) -> Self {
        self.advance(Stage::Failed);
        self.destinations = dests
            .iter()
            .map(|d| DestinationOutcome::not_loaded(d, status, cause.clone()))
            .collect();
        self.error = Some(cause);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub record: RunRecord,
    pub sources: Vec<SourceReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.record.status == RunStatus::Succeeded
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &DestinationOutcome> {
        self.sources.iter().flat_map(|s| s.destinations.iter())
    }

    pub fn outcome(&self, destination: &str) -> Option<&DestinationOutcome> {
        self.outcomes().find(|o| o.destination == destination)
    }
}

struct RunContext {
    config: Arc<PipelineConfig>,
    writer: DestinationWriter,
    recorder: Arc<dyn RunRecorder>,
    gate: QualityGate,
    run_id: Uuid,
}

pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    sink: Arc<dyn Sink>,
    recorder: Arc<dyn RunRecorder>,
    gate: QualityGate,
}

impl Orchestrator {
    pub fn new(config: Arc<PipelineConfig>, sink: Arc<dyn Sink>, recorder: Arc<dyn RunRecorder>) -> Self {
        let gate = QualityGate::new(config.quality_checks.clone());
        Self {
            config,
            sink,
            recorder,
            gate,
        }
    }

    pub fn with_quality_gate(mut self, gate: QualityGate) -> Self {
        self.gate = gate;
        self
    }

    /// Executes one run. Stage failures never escape: they become
    /// destination outcomes and the run status.
    pub async fn run(self, cancel: CancellationToken) -> RunSummary {
        let started = Instant::now();
        let name = self.config.pipeline_name.clone();

        let mut record = match self.recorder.start(&name).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Failed to persist run start, continuing unrecorded");
                RunRecord::new(&name)
            }
        };
        let run_id = record.run_id;
        let span = info_span!("pipeline_run", run_id = %run_id, pipeline = %name);

        async move {
            info!(
                sources = self.config.sources.len(),
                destinations = self.config.destinations.len(),
                "Starting pipeline"
            );

            let token = cancel.child_token();
            let timer = self.config.settings.run_timeout_seconds.map(|secs| {
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                            warn!(timeout_seconds = secs, "Run timeout reached, cancelling");
                            token.cancel();
                        }
                        _ = token.cancelled() => {}
                    }
                })
            });

            let ctx = Arc::new(RunContext {
                config: Arc::clone(&self.config),
                writer: DestinationWriter::new(Arc::clone(&self.sink)),
                recorder: Arc::clone(&self.recorder),
                gate: self.gate,
                run_id,
            });
            let sources = run_sources(ctx, token.clone()).await;

            if let Some(timer) = timer {
                timer.abort();
            }

            let mut records_processed = 0u64;
            let mut failures = Vec::new();
            for outcome in sources.iter().flat_map(|s| s.destinations.iter()) {
                records_processed += outcome.rows_loaded as u64;
                if let Some(warning) = &outcome.warning {
                    record.warnings.push(warning.clone());
                }
                if outcome.status != DestinationStatus::Loaded {
                    let cause = outcome.cause.as_deref().unwrap_or("unknown failure");
                    failures.push(format!("{}: {}", outcome.destination, cause));
                }
            }
            let (status, error_message) = if failures.is_empty() {
                (RunStatus::Succeeded, None)
            } else {
                (RunStatus::Failed, Some(failures.join("; ")))
            };

            if let Err(e) = self
                .recorder
                .finish(&mut record, status, records_processed, error_message.clone())
                .await
            {
                warn!(error = %e, "Failed to persist run completion");
                if !record.is_closed() {
                    record.close(status, records_processed, error_message);
                }
            }

            RunMetrics::record_run(
                status == RunStatus::Succeeded,
                records_processed,
                started.elapsed().as_secs_f64(),
            );
            match status {
                RunStatus::Succeeded => info!(records_processed, "Pipeline succeeded"),
                _ => error!(
                    records_processed,
                    error = record.error_message.as_deref().unwrap_or_default(),
                    "Pipeline failed"
                ),
            }

            RunSummary { record, sources }
        }
        .instrument(span)
        .await
    }
}

/// Runs every source on a bounded worker pool; reports come back in
/// configuration order.
async fn run_sources(ctx: Arc<RunContext>, token: CancellationToken) -> Vec<SourceReport> {
    let source_count = ctx.config.sources.len();
    let workers = source_count.min(ctx.config.settings.max_workers).max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    debug!(workers, "Worker pool sized");

    let mut set = JoinSet::new();
    for idx in 0..source_count {
        let ctx = Arc::clone(&ctx);
        let semaphore = Arc::clone(&semaphore);
        let token = token.clone();
        let span = info_span!("source", source = %ctx.config.sources[idx].name);
        set.spawn(
            async move {
                let source = &ctx.config.sources[idx];
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = token.cancelled() => None,
                };
                let report = match permit {
                    Some(_permit) if !token.is_cancelled() => process_source(&ctx, source).await,
                    _ => cancelled(&ctx.config, source),
                };
                (idx, report)
            }
            .instrument(span),
        );
    }

    let mut reports: Vec<Option<SourceReport>> = vec![None; source_count];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, report)) => reports[idx] = Some(report),
            Err(e) => error!(error = %e, "Source worker crashed"),
        }
    }

    reports
        .into_iter()
        .enumerate()
        .map(|(idx, report)| {
            report.unwrap_or_else(|| {
                let source = &ctx.config.sources[idx];
                let dests: Vec<&DestinationSpec> = ctx.config.destinations_for(&source.name).collect();
                SourceReport::new(&source.name).fail(
                    &dests,
                    DestinationStatus::Failed,
                    "source worker crashed".to_string(),
                )
            })
        })
        .collect()
}

/// The source's declared transform, else the preset for the table it feeds.
/// A source feeding several tables takes the first table's preset; one with
/// no destinations falls back to its own name.
pub fn resolve_transform(source: &SourceSpec, dests: &[&DestinationSpec]) -> TransformSpec {
    if let Some(spec) = &source.transform {
        return spec.clone();
    }
    let table = dests.first().map_or(source.name.as_str(), |d| d.table.as_str());
    presets::transform_for_table(table)
}

fn cancelled(config: &PipelineConfig, source: &SourceSpec) -> SourceReport {
    warn!("Cancelled before start");
    let dests: Vec<&DestinationSpec> = config.destinations_for(&source.name).collect();
    SourceReport::new(&source.name).fail(
        &dests,
        DestinationStatus::Skipped,
        "cancelled before start".to_string(),
    )
}

async fn process_source(ctx: &RunContext, source: &SourceSpec) -> SourceReport {
    let dests: Vec<&DestinationSpec> = ctx.config.destinations_for(&source.name).collect();
    let mut report = SourceReport::new(&source.name);

    report.advance(Stage::Extracting);
    let started = Instant::now();
    let spec = source.clone();
    let read = tokio::task::spawn_blocking(move || SourceReader::read(&spec))
        .await
        .map_err(|e| SourceReadError::Task(e.to_string()))
        .and_then(|r| r);
    let mut dataset = match read {
        Ok(dataset) => dataset,
        Err(e) => {
            ExtractMetrics::record_error(&source.name);
            let cause = PipelineError::from(e).to_string();
            error!(error = %cause, "Extraction failed");
            return report.fail(&dests, DestinationStatus::Failed, cause);
        }
    };
    report.rows_extracted = dataset.len();
    ExtractMetrics::record_success(&source.name, dataset.len(), started.elapsed().as_secs_f64());

    report.advance(Stage::Transforming);
    let transform = resolve_transform(source, &dests);
    match Transformer::new().apply(&mut dataset, &transform) {
        Ok(t) => {
            TransformMetrics::record(&source.name, t.rows_dropped, t.coercion_failures);
            info!(rows_in = t.rows_in, rows_out = t.rows_out, "Transformed source");
            report.transform = Some(t);
        }
        Err(e) => {
            let cause = PipelineError::from(e).to_string();
            error!(error = %cause, "Transform failed");
            return report.fail(&dests, DestinationStatus::Failed, cause);
        }
    }

    if dests.is_empty() {
        info!("Source has no destinations");
    }

    for dest in dests {
        let span = info_span!("destination", destination = %dest.name, table = %dest.table);
        let outcome = load_destination(ctx, &mut report, &dataset, dest)
            .instrument(span)
            .await;
        report.destinations.push(outcome);
    }

    report.advance(Stage::Completed);
    report
}

async fn load_destination(
    ctx: &RunContext,
    report: &mut SourceReport,
    dataset: &crate::dataset::Dataset,
    dest: &DestinationSpec,
) -> DestinationOutcome {
    report.advance(Stage::Validating);
    let rules = dest
        .quality_rules
        .clone()
        .unwrap_or_else(|| presets::quality_for_table(&dest.table))
        .with_key(&dest.merge_key);
    let quality = ctx
        .gate
        .evaluate_and_log(dataset, &dest.table, &rules, ctx.recorder.as_ref(), ctx.run_id)
        .await;
    debug!("{}", quality.summary());

    let mut warning = None;
    if let Some(failure) = quality.failure() {
        if ctx.config.quality_checks.fail_on_error {
            warn!(score = failure.score, "Quality gate failed, skipping load");
            return DestinationOutcome {
                quality_score: Some(quality.score),
                ..DestinationOutcome::not_loaded(dest, DestinationStatus::Skipped, failure.to_string())
            };
        }
        warn!(score = failure.score, "Quality gate failed, loading anyway");
        warning = Some(format!("{}: {}", dest.name, failure));
    }

    report.advance(Stage::Loading);
    match ctx.writer.load(dataset, dest, &ctx.config.settings).await {
        Ok(load) => DestinationOutcome {
            rows_loaded: load.rows,
            inserted: load.inserted,
            updated: load.updated,
            quality_score: Some(quality.score),
            warning,
            ..DestinationOutcome::new(dest, DestinationStatus::Loaded)
        },
        Err(e) => {
            let cause = PipelineError::from(e).to_string();
            error!(error = %cause, "Load failed");
            DestinationOutcome {
                quality_score: Some(quality.score),
                warning,
                ..DestinationOutcome::not_loaded(dest, DestinationStatus::Failed, cause)
            }
        }
    }
}

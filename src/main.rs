use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sales_etl::config::PipelineConfig;
use sales_etl::logging;
use sales_etl::pipeline::{resolve_transform, DestinationStatus, Orchestrator, RunSummary};
use sales_etl::presets;
use sales_etl::recorder::SqliteRunRecorder;
use sales_etl::sink::SqliteSink;

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "sales_etl")]
#[command(about = "Metadata-driven ETL pipeline for sales analytics")]
#[command(version)]
struct Cli {
    /// Pipeline configuration file (JSON, or TOML by extension)
    #[arg(long, env = "SALES_ETL_CONFIG", default_value = "config/pipeline_config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the pipeline (default)
    Run {
        /// Override settings.database_path
        #[arg(long, env = "SALES_ETL_DATABASE")]
        database: Option<PathBuf>,
        /// Override settings.max_workers
        #[arg(long)]
        max_workers: Option<usize>,
    },
    /// Parse the configuration and print the resolved plan
    Validate,
}

fn print_plan(config: &PipelineConfig) {
    println!("✅ {} v{} is valid", config.pipeline_name, config.version);
    for source in &config.sources {
        let dests: Vec<_> = config.destinations_for(&source.name).collect();
        let rules = resolve_transform(source, &dests).rules.len();
        println!(
            "   source {} <- {} ({} transform rules)",
            source.name,
            source.path.display(),
            rules
        );
        for dest in dests {
            let columns = dest
                .columns
                .clone()
                .or_else(|| presets::columns_for_table(&dest.table))
                .map(|c| c.join(", "))
                .unwrap_or_else(|| "all columns".to_string());
            println!(
                "     -> {} table={} key={} [{}]",
                dest.name, dest.table, dest.merge_key, columns
            );
        }
    }
    println!(
        "   quality: enabled={} threshold={:.2} fail_on_error={}",
        config.quality_checks.enabled,
        config.quality_checks.threshold,
        config.quality_checks.fail_on_error
    );
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Pipeline Results for {}:", summary.record.pipeline_name);
    println!("   Run id: {}", summary.record.run_id);
    println!("   Status: {}", summary.record.status.as_str());
    println!("   Records processed: {}", summary.record.records_processed);
    for outcome in summary.outcomes() {
        let marker = match outcome.status {
            DestinationStatus::Loaded => "✅",
            DestinationStatus::Skipped => "⏭️ ",
            DestinationStatus::Failed => "❌",
        };
        println!(
            "   {} {} ({} rows, {} inserted, {} updated)",
            marker, outcome.destination, outcome.rows_loaded, outcome.inserted, outcome.updated
        );
        if let Some(cause) = &outcome.cause {
            println!("      cause: {}", cause);
        }
    }
    if !summary.record.warnings.is_empty() {
        println!("\n⚠️  Warnings:");
        for warning in &summary.record.warnings {
            println!("   - {}", warning);
        }
    }
}

async fn run(
    mut config: PipelineConfig,
    database: Option<PathBuf>,
    max_workers: Option<usize>,
) -> anyhow::Result<bool> {
    if let Some(db) = database {
        config.settings.database_path = db;
    }
    if let Some(n) = max_workers {
        config.settings.max_workers = n;
    }
    config.validate()?;

    let _guard = logging::init_logging(&config.logging)?;

    let db_path = config.settings.database_path.clone();
    let sink = Arc::new(
        SqliteSink::open(&db_path)
            .with_context(|| format!("failed to open database {}", db_path.display()))?,
    );
    let recorder = Arc::new(
        SqliteRunRecorder::open(&db_path)
            .with_context(|| format!("failed to open audit tables in {}", db_path.display()))?,
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    info!(pipeline = %config.pipeline_name, database = %db_path.display(), "Starting run");

    let summary = Orchestrator::new(Arc::new(config), sink, recorder)
        .run(cancel)
        .await;
    print_summary(&summary);
    Ok(summary.succeeded())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match PipelineConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid configuration {}: {}", cli.config.display(), e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let command = cli.command.unwrap_or_else(|| Commands::Run {
        database: std::env::var_os("SALES_ETL_DATABASE").map(PathBuf::from),
        max_workers: None,
    });
    match command {
        Commands::Validate => {
            print_plan(&config);
            ExitCode::SUCCESS
        }
        Commands::Run {
            database,
            max_workers,
        } => match run(config, database, max_workers).await {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::from(EXIT_FAILED),
            Err(e) => {
                let code = if e.downcast_ref::<sales_etl::error::ConfigError>().is_some() {
                    EXIT_CONFIG
                } else {
                    EXIT_FAILED
                };
                eprintln!("❌ {:#}", e);
                ExitCode::from(code)
            }
        },
    }
}

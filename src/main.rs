//! Income Estimation Pipeline - Batch Runner
//!
//! Scores raw customer files, merges the predictions into the master dataset
//! and prints a summary per batch.
//!
//! Usage: `income-estimator [--config <path>] <input.csv|input.json>...`

use anyhow::{bail, Context, Result};
use chrono::Utc;
use income_estimator::{
    config::AppConfig, input::read_table, new_batch_id, IncomeService, PredictionStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Command line: optional config path plus input files
struct Args {
    config: Option<PathBuf>,
    inputs: Vec<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    let mut inputs = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            _ => inputs.push(PathBuf::from(arg)),
        }
    }
    if inputs.is_empty() {
        bail!("usage: income-estimator [--config <path>] <input.csv|input.json>...");
    }
    Ok(Args { config, inputs })
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("income_estimator={}", config.logging.level).parse()?);

    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    // Load configuration
    let config = match &args.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None if std::path::Path::new("config/config.toml").exists() => AppConfig::load()?,
        None => AppConfig::default(),
    };
    init_logging(&config)?;

    info!("Starting Income Estimation Pipeline");
    info!(
        artifact = %config.models.artifact_path.display(),
        data_dir = %config.store.data_dir.display(),
        retention_days = config.store.retention_days,
        max_batch_size = config.pipeline.max_batch_size,
        "Configuration loaded"
    );

    let max_batch_size = config.pipeline.max_batch_size;
    let mut store = PredictionStore::from_config(&config.store)
        .with_context(|| format!("Failed to open store {}", config.store.data_dir.display()))?;
    let service = Arc::new(IncomeService::from_config(config)?);
    info!(
        model_version = service.engine().model_version(),
        features = service.engine().feature_names().len(),
        "Inference engine ready"
    );

    let mut failures = 0usize;
    for input in &args.inputs {
        let table = match read_table(input) {
            Ok(table) => table,
            Err(e) => {
                error!(input = %input.display(), error = %e, "Skipping unreadable input");
                failures += 1;
                continue;
            }
        };

        for chunk in table.chunks(max_batch_size) {
            let batch_id = new_batch_id(Utc::now());
            let service = service.clone();

            // Scoring and persistence are blocking; the store moves into the
            // task and comes back with the result.
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = service.run_batch(&mut store, &chunk, &batch_id);
                (store, result)
            })
            .await
            .context("Batch task panicked")?;
            store = returned;

            match result {
                Ok(summary) => {
                    info!(
                        input = %input.display(),
                        batch_id = %summary.batch_id,
                        succeeded = summary.succeeded,
                        average_income = ?summary.average_income,
                        "Batch stored"
                    );
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                Err(e) => {
                    error!(input = %input.display(), error = %e, "Batch failed");
                    failures += 1;
                }
            }
        }
    }

    info!("Pipeline shutting down...");
    service.metrics().print_summary();

    if failures > 0 {
        bail!("{failures} batch(es) failed");
    }
    Ok(())
}

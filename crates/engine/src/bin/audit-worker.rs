//! audit-worker — feeds a benchmark dataset through the audit-and-repair
//! engine and writes the case outcomes.
//!
//! The dataset JSON mirrors the benchmark layout: systems keyed by name,
//! each with samples carrying a line id, event id, template, raw content,
//! and optionally a pre-generated description.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indexmap::IndexMap;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use templar_core::config::{load_dotenv, Config};
use templar_core::{LogSample, Template, TemplateCase, TemplatePattern};
use templar_engine::export::{summarize, write_outcomes};
use templar_engine::Orchestrator;
use templar_oracle::{build_oracle, FewShotSet};

// ── CLI ─────────────────────────────────────────────────────────────

/// Audit and repair structural labels in a log-parsing benchmark dataset.
#[derive(Parser, Debug)]
#[command(name = "audit-worker", version, about)]
struct Cli {
    /// Input dataset JSON file.
    #[arg(long, env = "TEMPLAR_INPUT")]
    input: PathBuf,

    /// Output file for case outcomes.
    #[arg(long, env = "TEMPLAR_OUTPUT", default_value = "outcomes.json")]
    output: PathBuf,

    /// Only audit these systems (comma-separated).
    #[arg(long)]
    systems: Option<String>,

    /// Cap the number of cases (for smoke runs).
    #[arg(long)]
    max_cases: Option<usize>,
}

// ── Dataset ingestion ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Dataset {
    systems: IndexMap<String, SystemEntry>,
}

#[derive(Debug, Deserialize)]
struct SystemEntry {
    #[serde(default)]
    samples: Vec<DatasetSample>,
}

#[derive(Debug, Deserialize)]
struct DatasetSample {
    #[serde(rename = "LineId", default)]
    line_id: serde_json::Value,
    #[serde(rename = "EventId")]
    event_id: String,
    #[serde(rename = "EventTemplate")]
    template: String,
    #[serde(rename = "log_content")]
    content: String,
    #[serde(default)]
    description: Option<String>,
}

fn value_to_id(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Group samples by (system, event id) into one case per template.
fn build_cases(dataset: Dataset, filter: Option<&[String]>) -> Vec<TemplateCase> {
    let mut cases = Vec::new();
    for (system, entry) in dataset.systems {
        if filter.is_some_and(|f| !f.contains(&system)) {
            continue;
        }
        let mut by_event: IndexMap<String, Vec<DatasetSample>> = IndexMap::new();
        for sample in entry.samples {
            by_event.entry(sample.event_id.clone()).or_default().push(sample);
        }
        for (event_id, samples) in by_event {
            let pattern = match TemplatePattern::new(&samples[0].template) {
                Ok(p) => p,
                Err(e) => {
                    warn!(system = %system, event = %event_id, error = %e, "skipping unparseable template");
                    continue;
                }
            };
            let description = samples[0].description.clone().unwrap_or_default();
            let template = Template::new(&event_id, &system, pattern, &description);
            let log_samples: Vec<LogSample> = samples
                .iter()
                .map(|s| LogSample::new(&value_to_id(&s.line_id), &s.content, Some(&event_id)))
                .collect();
            cases.push(TemplateCase::new(template, log_samples));
        }
    }
    cases
}

// ── Entry point ─────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let oracle = build_oracle(&config.oracle).context("failed to build the oracle stack")?;
    let fewshot = match &config.fewshot.path {
        Some(path) => Arc::new(
            FewShotSet::from_path(path)
                .with_context(|| format!("failed to load few-shot file {}", path.display()))?,
        ),
        None => {
            warn!("no few-shot file configured; using built-in demonstrations");
            Arc::new(FewShotSet::default())
        }
    };

    let data = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read dataset {}", cli.input.display()))?;
    let dataset: Dataset = serde_json::from_str(&data).context("failed to parse dataset")?;

    let filter: Option<Vec<String>> = cli
        .systems
        .as_deref()
        .map(|s| s.split(',').map(|x| x.trim().to_string()).collect());
    let mut cases = build_cases(dataset, filter.as_deref());
    if let Some(max) = cli.max_cases {
        cases.truncate(max);
    }
    info!(cases = cases.len(), "dataset loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received — cancelling in-flight cases");
            let _ = shutdown_tx.send(true);
        }
    });

    let orchestrator = Arc::new(Orchestrator::from_config(
        oracle,
        fewshot,
        &config,
        shutdown_rx,
    ));
    let outcomes = orchestrator.run_all(cases).await;

    write_outcomes(&cli.output, &outcomes).context("failed to write outcomes")?;
    let summary = summarize(&outcomes);
    info!(
        total = summary.total,
        verified = summary.verified,
        resolved = summary.resolved,
        exhausted = summary.exhausted,
        output = %cli.output.display(),
        "audit run complete"
    );
    Ok(())
}

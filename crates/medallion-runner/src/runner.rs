//! Orchestration (spec §4.10): run Bronze then Silver for one pipeline
//! config, short-circuiting Silver when Bronze fails.

use crate::bronze::{run_bronze, BronzeContext};
use crate::result::{LayerOutcome, RunResult};
use crate::silver::run_silver;
use medallion_core::config::PipelineConfig;
use medallion_core::connections::ConnectionRegistry;
use medallion_core::watermark::WatermarkStore;
use medallion_extract::CustomExtractorRegistry;
use std::sync::Arc;
use std::time::Instant;

/// Which layer(s) an invocation runs, resolved from the CLI's
/// `pipeline[:layer]` syntax (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSelection {
    Both,
    BronzeOnly,
    SilverOnly,
}

pub struct RunOptions<'a> {
    pub run_date: String,
    pub layers: LayerSelection,
    pub dry_run: bool,
    pub target_override: Option<&'a str>,
}

/// Process-wide collaborators the runner owns for the lifetime of one CLI
/// invocation (spec §3 Ownership, §5 Shared-resource policy): one
/// connection registry, one custom-extractor registry, one watermark
/// store.
pub struct Runner {
    pub connections: Arc<ConnectionRegistry>,
    pub custom_extractors: CustomExtractorRegistry,
    pub watermarks: WatermarkStore,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(ConnectionRegistry::new()),
            custom_extractors: CustomExtractorRegistry::new(),
            watermarks: WatermarkStore::from_env(),
        }
    }

    /// Run Bronze (unless `SilverOnly`) then Silver (unless `BronzeOnly`),
    /// for the single named pipeline config. Silver only runs if Bronze
    /// succeeded or was intentionally skipped (spec §4.10: "Exceptions in
    /// either layer are caught... the subsequent layer is skipped").
    pub async fn run(&self, config: &PipelineConfig, opts: &RunOptions<'_>) -> RunResult {
        let started = Instant::now();
        let ctx = BronzeContext {
            connections: &self.connections,
            custom_extractors: &self.custom_extractors,
            watermarks: &self.watermarks,
        };

        let run_bronze_layer = !matches!(opts.layers, LayerSelection::SilverOnly);
        let run_silver_layer = !matches!(opts.layers, LayerSelection::BronzeOnly);

        let mut bronze_outcome = None;

        if run_bronze_layer {
            match run_bronze(&config.bronze, &opts.run_date, &ctx, opts.target_override, opts.dry_run).await {
                Ok(outcome) => bronze_outcome = Some(outcome),
                Err(e) => {
                    tracing::error!(pipeline = %config.name, error = %e, "bronze layer failed");
                    return RunResult {
                        success: false,
                        bronze: None,
                        silver: None,
                        elapsed_seconds: started.elapsed().as_secs_f64(),
                        pipeline_name: config.name.clone(),
                        error: Some(e.to_string()),
                    };
                }
            }
        }

        let mut silver_outcome = None;
        if run_silver_layer {
            match run_silver(
                &config.bronze,
                &config.silver,
                &opts.run_date,
                bronze_outcome.as_ref(),
                opts.target_override,
                opts.dry_run,
            )
            .await
            {
                Ok(outcome) => silver_outcome = Some(outcome),
                Err(e) => {
                    tracing::error!(pipeline = %config.name, error = %e, "silver layer failed");
                    return RunResult {
                        success: false,
                        bronze: bronze_outcome,
                        silver: None,
                        elapsed_seconds: started.elapsed().as_secs_f64(),
                        pipeline_name: config.name.clone(),
                        error: Some(e.to_string()),
                    };
                }
            }
        }

        RunResult {
            success: true,
            bronze: bronze_outcome,
            silver: silver_outcome,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            pipeline_name: config.name.clone(),
            error: None,
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a one-line human summary of a finished run, used by `--explain`
/// and the default (non-JSON) CLI output.
pub fn describe_outcome(label: &str, outcome: &Option<LayerOutcome>) -> String {
    match outcome {
        None => format!("{label}: not run"),
        Some(LayerOutcome::Executed { row_count, target, .. }) => {
            format!("{label}: wrote {row_count} row(s) to {target}")
        }
        Some(LayerOutcome::Skipped { reason }) => format!("{label}: skipped ({reason})"),
        Some(LayerOutcome::DryRun { plan }) => format!("{label}: {plan}"),
    }
}

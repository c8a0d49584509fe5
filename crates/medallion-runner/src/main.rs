//! `medallion` — the thin CLI collaborator spec §6 describes (the spec
//! scopes the wrapper itself out; this exists only to invoke the engine
//! with the command surface the spec names).

use clap::Parser;
use medallion_core::config::PipelineConfig;
use medallion_core::validate::{has_errors, validate_bronze, validate_cross, validate_silver};
use medallion_runner::{describe_outcome, discover, runner::LayerSelection, RunOptions, Runner};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_VALIDATION: i32 = 2;

/// Run a declarative Bronze→Silver medallion pipeline.
#[derive(Parser, Debug)]
#[command(name = "medallion", version, about)]
struct Cli {
    /// Pipeline name, optionally suffixed `:bronze` or `:silver` to restrict
    /// to one layer. Omit when using `--list`.
    pipeline: Option<String>,

    /// Run date in YYYY-MM-DD form; defaults to today (UTC).
    #[arg(long)]
    date: Option<String>,

    /// Validate and print the resolved plan; no side effects.
    #[arg(long)]
    dry_run: bool,

    /// Structural validation only; exit 0 on pass, non-zero otherwise.
    #[arg(long)]
    check: bool,

    /// Print the resolved plan (source/target paths, effective model) and exit.
    #[arg(long)]
    explain: bool,

    /// Enumerate discovered pipelines and exit.
    #[arg(long)]
    list: bool,

    /// Override the output root for whichever layer(s) this invocation runs.
    #[arg(long)]
    target: Option<String>,
}

fn parse_pipeline_arg(raw: &str) -> (String, LayerSelection) {
    match raw.split_once(':') {
        Some((name, "bronze")) => (name.to_string(), LayerSelection::BronzeOnly),
        Some((name, "silver")) => (name.to_string(), LayerSelection::SilverOnly),
        Some((name, other)) => {
            tracing::warn!("unrecognized layer suffix `{other}` on `{raw}`, running both layers");
            (name.to_string(), LayerSelection::Both)
        }
        None => (raw.to_string(), LayerSelection::Both),
    }
}

fn list_pipelines() -> i32 {
    let dir = discover::default_pipelines_dir();
    let found = discover::discover_pipelines(&dir);
    if found.is_empty() {
        println!("no pipelines discovered under {}", dir.display());
        return EXIT_SUCCESS;
    }
    for p in &found {
        println!(
            "{}  (bronze: {:?}, silver keys: {:?})",
            p.config.name, p.config.bronze.source_type, p.config.silver.natural_keys
        );
    }
    EXIT_SUCCESS
}

fn check_pipeline(config: &PipelineConfig) -> i32 {
    let mut issues = validate_bronze(&config.bronze);
    issues.extend(validate_silver(&config.silver));
    issues.extend(validate_cross(&config.bronze, &config.silver));

    if issues.is_empty() {
        println!("{}: OK", config.name);
        return EXIT_SUCCESS;
    }
    for issue in &issues {
        println!("{}: {issue}", config.name);
    }
    if has_errors(&issues) {
        EXIT_VALIDATION
    } else {
        EXIT_SUCCESS
    }
}

fn explain_pipeline(config: &PipelineConfig, run_date: &str) {
    let model = medallion_core::model::resolve_silver_model(&config.silver);
    println!("pipeline: {}", config.name);
    println!(
        "  bronze: system={} entity={} source_type={:?} load_pattern={:?} -> {}",
        config.bronze.system,
        config.bronze.entity,
        config.bronze.source_type,
        config.bronze.load_pattern,
        config.bronze.target_for_date(run_date)
    );
    println!(
        "  silver: entity_kind={:?} history_mode={:?} delete_mode={:?} natural_keys={:?}",
        model.entity_kind, model.history_mode, model.delete_mode, config.silver.natural_keys
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medallion=info")))
        .init();

    let cli = Cli::parse();

    if cli.list {
        std::process::exit(list_pipelines());
    }

    let Some(pipeline_arg) = cli.pipeline.as_deref() else {
        eprintln!("a pipeline name is required unless --list is given");
        std::process::exit(EXIT_ERROR);
    };
    let (pipeline_name, layers) = parse_pipeline_arg(pipeline_arg);

    let discovered = match discover::find_pipeline(&pipeline_name) {
        Some(d) => d,
        None => {
            eprintln!("no pipeline named `{pipeline_name}` found");
            std::process::exit(EXIT_ERROR);
        }
    };
    let config = discovered.config;

    let run_date = cli.date.unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());

    if cli.check {
        std::process::exit(check_pipeline(&config));
    }

    if cli.explain {
        explain_pipeline(&config, &run_date);
        std::process::exit(EXIT_SUCCESS);
    }

    let opts = RunOptions {
        run_date,
        layers,
        dry_run: cli.dry_run,
        target_override: cli.target.as_deref(),
    };

    let runner = Runner::new();
    let result = runner.run(&config, &opts).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    println!("{}", describe_outcome("bronze", &result.bronze));
    println!("{}", describe_outcome("silver", &result.silver));

    if result.success {
        std::process::exit(EXIT_SUCCESS);
    }

    let exit_code = match &result.error {
        Some(msg) if msg.contains("validation failed") => EXIT_VALIDATION,
        _ => EXIT_ERROR,
    };
    std::process::exit(exit_code);
}

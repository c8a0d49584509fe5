//! Silver layer execution (spec §2 data flow step 3, §4.10 step 2).
//! Resolves the effective model, reads back the Bronze partitions an
//! `input_mode` names, applies the curation operator the model selects,
//! and writes the curated partition.

use crate::result::LayerOutcome;
use medallion_core::config::{BronzeConfig, DeleteMode, EntityKind, HistoryMode, LoadPattern, SilverConfig};
use medallion_core::curate;
use medallion_core::error::{ErrorContext, PipelineError, Result};
use medallion_core::input_mode::{effective_input_mode, resolve_read_pattern};
use medallion_core::model::resolve_silver_model;
use medallion_core::partition::{self, PartitionWriteRequest};
use medallion_core::record::Record;
use medallion_core::validate::{has_errors, validate_cross, validate_silver};
use std::path::{Path, PathBuf};

/// Expand a (possibly globbed) read pattern into the sorted list of
/// partition directories it names. A pattern with no wildcard is treated
/// as a single literal directory (spec §4.7: `replace_daily` never globs).
fn resolve_partition_dirs(pattern: &str) -> Result<Vec<PathBuf>> {
    if !pattern.contains('*') && !pattern.contains('?') && !pattern.contains('[') {
        return Ok(vec![PathBuf::from(pattern)]);
    }

    let mut dirs: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| PipelineError::config(format!("invalid glob pattern `{pattern}`: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn read_bronze_rows(bronze_target: &str, silver: &SilverConfig, bronze: &BronzeConfig) -> Result<Vec<Record>> {
    let model = resolve_silver_model(silver);
    let mode = effective_input_mode(model.input_mode, bronze.input_mode, model.entity_kind);
    let resolved = resolve_read_pattern(bronze_target, mode);
    if let Some(warning) = &resolved.warning {
        tracing::warn!(system = %bronze.system, entity = %bronze.entity, "{warning}");
    }

    let dirs = resolve_partition_dirs(&resolved.pattern)?;
    if dirs.is_empty() {
        return Err(PipelineError::SourceNotFound {
            message: format!("no bronze partitions matched `{}`", resolved.pattern),
            ctx: ErrorContext::with_system_entity(bronze.system.as_str(), bronze.entity.as_str()),
        });
    }

    let mut rows = Vec::new();
    for dir in dirs {
        rows.extend(partition::read_partition_dir(&dir).map_err(|e| {
            PipelineError::silver_caused(
                format!("reading bronze partition {} failed", dir.display()),
                ErrorContext::with_system_entity(bronze.system.as_str(), bronze.entity.as_str())
                    .detail("partition", dir.display().to_string()),
                e,
            )
        })?);
    }
    Ok(rows)
}

/// Apply `column_mapping` renames to a key/column name so curation
/// operators, which run after rename, see the renamed name (spec §4.6:
/// rename happens last among the projection steps, so callers that need a
/// pre-rename key in post-rename space must translate explicitly).
fn renamed<'a>(name: &'a str, mapping: &'a std::collections::BTreeMap<String, String>) -> &'a str {
    mapping.get(name).map(|s| s.as_str()).unwrap_or(name)
}

fn run_curation(
    rows: Vec<Record>,
    silver: &SilverConfig,
    entity_kind: EntityKind,
    history_mode: HistoryMode,
    delete_mode: DeleteMode,
    load_pattern: LoadPattern,
) -> Result<Vec<Record>> {
    let natural_keys: Vec<String> = silver
        .natural_keys
        .iter()
        .map(|k| renamed(k, &silver.column_mapping).to_string())
        .collect();
    let change_timestamp = silver
        .change_timestamp
        .as_deref()
        .map(|ts| renamed(ts, &silver.column_mapping).to_string());

    let projected = curate::project_and_rename(
        &rows,
        &silver.natural_keys,
        silver.change_timestamp.as_deref(),
        silver.attributes.as_deref(),
        silver.exclude_columns.as_deref(),
        &silver.column_mapping,
    );

    if entity_kind == EntityKind::Event {
        return Ok(curate::dedupe_exact(&projected));
    }

    let ts_column = change_timestamp.as_deref().ok_or_else(|| {
        PipelineError::config("change_timestamp is required to curate a state entity")
    })?;

    match (history_mode, load_pattern) {
        (HistoryMode::CurrentOnly, LoadPattern::Cdc) => {
            curate::apply_cdc(&projected, &natural_keys, ts_column, delete_mode, &silver.cdc_options)
        }
        (HistoryMode::FullHistory, LoadPattern::Cdc) => {
            curate::apply_cdc_history(&projected, &natural_keys, ts_column, delete_mode, &silver.cdc_options)
        }
        (HistoryMode::CurrentOnly, _) => Ok(curate::dedupe_latest(&projected, &natural_keys, ts_column)),
        (HistoryMode::FullHistory, _) => Ok(curate::build_history(&projected, &natural_keys, ts_column)),
    }
}

pub async fn run_silver(
    bronze: &BronzeConfig,
    silver: &SilverConfig,
    run_date: &str,
    bronze_outcome: Option<&LayerOutcome>,
    target_override: Option<&str>,
    dry_run: bool,
) -> Result<LayerOutcome> {
    let mut issues = validate_silver(silver);
    issues.extend(validate_cross(bronze, silver));
    if has_errors(&issues) {
        return Err(PipelineError::Validation { issues });
    }
    for issue in issues.iter().filter(|i| i.is_warning) {
        tracing::warn!(system = %bronze.system, entity = %bronze.entity, "{issue}");
    }

    let model = resolve_silver_model(silver);

    let target = target_override
        .map(|t| t.to_string())
        .unwrap_or_else(|| BronzeConfig::render_path(&silver.target_path, &bronze.system, &bronze.entity, run_date));

    if dry_run {
        return Ok(LayerOutcome::DryRun {
            plan: format!(
                "silver {}.{}: {:?}/{:?} -> {target}",
                bronze.system, bronze.entity, model.entity_kind, model.history_mode
            ),
        });
    }

    let bronze_source = bronze_outcome
        .and_then(LayerOutcome::target)
        .map(|t| t.to_string())
        .unwrap_or_else(|| {
            if !silver.source_path.is_empty() {
                BronzeConfig::render_path(&silver.source_path, &bronze.system, &bronze.entity, run_date)
            } else {
                bronze.target_for_date(run_date)
            }
        });

    tracing::info!(system = %bronze.system, entity = %bronze.entity, bronze_source, "starting silver curation");

    let rows = read_bronze_rows(&bronze_source, silver, bronze)?;
    let curated = run_curation(rows, silver, model.entity_kind, model.history_mode, model.delete_mode, bronze.load_pattern)
        .map_err(|e| {
            PipelineError::silver_caused(
                "curation failed",
                ErrorContext::with_system_entity(bronze.system.as_str(), bronze.entity.as_str()),
                e,
            )
        })?;

    let write_result = partition::write_partition(PartitionWriteRequest {
        target_dir: Path::new(&target),
        rows: curated,
        entity_kind: format!("{:?}", model.entity_kind),
        history_mode: format!("{:?}", model.history_mode),
        natural_keys: silver.natural_keys.clone(),
        change_timestamp: silver.change_timestamp.clone().unwrap_or_default(),
        run_date: run_date.to_string(),
        source_path: bronze_source,
        write_checksums: bronze.write_checksums,
        write_metadata: bronze.write_metadata,
        skip_if_exists: false,
    })
    .map_err(|e| {
        PipelineError::silver_caused(
            "writing silver partition failed",
            ErrorContext::with_system_entity(bronze.system.as_str(), bronze.entity.as_str()),
            e,
        )
    })?;

    tracing::info!(
        system = %bronze.system,
        entity = %bronze.entity,
        row_count = write_result.row_count,
        skipped = write_result.skipped,
        "silver curation complete"
    );

    if write_result.skipped {
        return Ok(LayerOutcome::Skipped {
            reason: write_result.reason.unwrap_or_else(|| "empty".to_string()),
        });
    }

    Ok(LayerOutcome::Executed {
        row_count: write_result.row_count,
        target: write_result.target.to_string_lossy().into_owned(),
        columns: write_result.columns,
        new_watermark: None,
    })
}

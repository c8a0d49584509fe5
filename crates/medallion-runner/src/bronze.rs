//! Bronze layer execution (spec §2 data flow step 2, §4.10 step 1).
//! Dispatches to the concrete extractor named by `source_type` (spec §9
//! "Dynamic dispatch → tagged unions"), enriches the result with technical
//! metadata, classifies late data, writes the partition, and — only after
//! that write succeeds with non-zero rows — persists the new watermark
//! (spec §5 "Watermark persistence happens strictly after a successful
//! Bronze write with non-zero rows").

use crate::result::LayerOutcome;
use chrono::Utc;
use medallion_core::config::{BronzeConfig, SourceType};
use medallion_core::connections::ConnectionRegistry;
use medallion_core::error::{PipelineError, Result};
use medallion_core::late_data;
use medallion_core::partition::{self, PartitionWriteRequest};
use medallion_core::record::{Record, Value};
use medallion_core::validate::{has_errors, validate_bronze};
use medallion_core::watermark::WatermarkStore;
use medallion_extract::{
    ApiExtractor, CustomExtractorRegistry, DbExtractor, DbMultiExtractor, Extractor, FileExtractor,
    WatermarkColumnConfig,
};
use std::path::Path;
use std::sync::Arc;

/// Everything `run_bronze` borrows from the runner's process-wide state
/// (spec §3 Ownership: "Connections are owned by the registry
/// process-wide"; "Circuit-breaker state is owned by the component that
/// initialized it" — each extractor owns its own breakers internally).
pub struct BronzeContext<'a> {
    pub connections: &'a Arc<ConnectionRegistry>,
    pub custom_extractors: &'a CustomExtractorRegistry,
    pub watermarks: &'a WatermarkStore,
}

/// Dispatch to the concrete extractor for `config.source_type`, resolve the
/// prior watermark first so adapters stay free of store access (spec §4.5:
/// "`prior_cursor` is the watermark last persisted ... already resolved by
/// the caller"). `db_multi` is the one exception: it manages its own
/// per-entity watermarks and is never routed through the single-cursor
/// path (spec §4.5.3).
async fn fetch_records_dispatch(
    config: &BronzeConfig,
    run_date: &str,
    ctx: &BronzeContext<'_>,
) -> Result<(Vec<Record>, Option<WatermarkColumnConfig>, Option<String>)> {
    if config.source_type == SourceType::DbMulti {
        let extractor = DbMultiExtractor::new(Arc::clone(ctx.connections));
        let result = extractor.fetch_multi(config, ctx.watermarks).await?;
        return Ok((result.flattened, None, None));
    }

    let prior = ctx.watermarks.get(&config.system, &config.entity).map(|w| w.last_value);

    macro_rules! dispatch {
        ($extractor:expr) => {{
            let extractor = $extractor;
            let watermark_cfg = extractor.get_watermark_config(config);
            let (records, cursor) = extractor.fetch_records(config, run_date, prior.as_deref()).await?;
            (records, watermark_cfg, cursor)
        }};
    }

    let (records, watermark_cfg, cursor) = match config.source_type {
        SourceType::Custom => {
            let extractor = ctx.custom_extractors.resolve(config)?;
            let watermark_cfg = extractor.get_watermark_config(config);
            let (records, cursor) = extractor.fetch_records(config, run_date, prior.as_deref()).await?;
            (records, watermark_cfg, cursor)
        }
        SourceType::ApiRest => dispatch!(ApiExtractor::new()),
        t if t.is_database() => dispatch!(DbExtractor::new(Arc::clone(ctx.connections))),
        t if t.is_file() => dispatch!(FileExtractor::new()),
        other => {
            return Err(PipelineError::config(format!(
                "unsupported bronze source_type `{other:?}`"
            )))
        }
    };

    Ok((records, watermark_cfg, cursor))
}

/// Stamp the technical metadata columns spec §2 step 2 names onto every
/// extracted row: `_load_date`, `_extracted_at`, `_source_system`,
/// `_source_entity`. A CDC source's operation column, if present, travels
/// through unchanged — it is curated away at Silver, not here.
fn enrich_technical_columns(records: &mut [Record], config: &BronzeConfig, run_date: &str) {
    let extracted_at = Utc::now();
    for record in records.iter_mut() {
        record.insert("_load_date", Value::Str(run_date.to_string()));
        record.insert("_extracted_at", Value::Timestamp(extracted_at));
        record.insert("_source_system", Value::Str(config.system.clone()));
        record.insert("_source_entity", Value::Str(config.entity.clone()));
    }
}

pub async fn run_bronze(
    config: &BronzeConfig,
    run_date: &str,
    ctx: &BronzeContext<'_>,
    target_override: Option<&str>,
    dry_run: bool,
) -> Result<LayerOutcome> {
    let issues = validate_bronze(config);
    if has_errors(&issues) {
        return Err(PipelineError::Validation { issues });
    }
    for issue in issues.iter().filter(|i| i.is_warning) {
        tracing::warn!(system = %config.system, entity = %config.entity, "{issue}");
    }

    let target = target_override
        .map(|t| t.to_string())
        .unwrap_or_else(|| config.target_for_date(run_date));

    if dry_run {
        return Ok(LayerOutcome::DryRun {
            plan: format!(
                "bronze {}.{}: {:?} -> {target}",
                config.system, config.entity, config.source_type
            ),
        });
    }

    tracing::info!(system = %config.system, entity = %config.entity, run_date, "starting bronze extraction");

    let (mut records, watermark_cfg, new_cursor) = fetch_records_dispatch(config, run_date, ctx).await?;

    if let Some(late_cfg) = &config.late_data {
        let classification = late_data::classify(records, late_cfg, Utc::now())?;
        if let Some(warning) = &classification.warning {
            tracing::warn!(system = %config.system, entity = %config.entity, "{warning}");
        }
        if !classification.late.is_empty() {
            tracing::warn!(
                system = %config.system,
                entity = %config.entity,
                late_count = classification.late.len(),
                "late records excluded from bronze partition (quarantine)"
            );
        }
        records = classification.on_time;
    }

    enrich_technical_columns(&mut records, config, run_date);

    let write_result = partition::write_partition(PartitionWriteRequest {
        target_dir: Path::new(&target),
        rows: records,
        entity_kind: "bronze".to_string(),
        history_mode: "raw".to_string(),
        natural_keys: Vec::new(),
        change_timestamp: config.watermark_column.clone().unwrap_or_default(),
        run_date: run_date.to_string(),
        source_path: config.source_for_date(run_date),
        write_checksums: config.write_checksums,
        write_metadata: config.write_metadata,
        skip_if_exists: false,
    })
    .map_err(|e| {
        PipelineError::bronze_caused(
            "writing bronze partition failed",
            medallion_core::error::ErrorContext::with_system_entity(
                config.system.as_str(),
                config.entity.as_str(),
            )
            .detail("source_type", format!("{:?}", config.source_type))
            .detail("load_pattern", format!("{:?}", config.load_pattern))
            .detail("source_path", config.source_for_date(run_date)),
            e,
        )
    })?;

    // Watermark persistence happens strictly after a successful write with
    // non-zero rows (spec §5), db_multi excepted (it persists per-entity
    // watermarks itself, inside `fetch_multi`, and reports no single cursor
    // here).
    if write_result.row_count > 0 {
        if let (Some(wc), Some(cursor)) = (&watermark_cfg, &new_cursor) {
            ctx.watermarks
                .save(&config.system, &config.entity, cursor, Some(wc.watermark_type))?;
            tracing::info!(
                system = %config.system,
                entity = %config.entity,
                cursor,
                "watermark advanced after bronze write"
            );
        }
    }

    tracing::info!(
        system = %config.system,
        entity = %config.entity,
        row_count = write_result.row_count,
        skipped = write_result.skipped,
        "bronze extraction complete"
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
        new_watermark: new_cursor,
    })
}

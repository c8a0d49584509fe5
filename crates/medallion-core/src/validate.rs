//! Structural and cross-layer validation (spec §4.12). Grounded on
//! `pipelines/lib/validate.py` / `validators.py`; produces the enumerated
//! issue list the `--check` CLI surface and `run(dry_run=true)` both
//! consume.

use crate::config::{BronzeConfig, EntityKind, HistoryMode, LoadPattern, ModelPreset, SilverConfig, SourceType};
use crate::error::ValidationIssue;

fn err(path: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        path: path.to_string(),
        message: message.into(),
        is_warning: false,
    }
}

fn warn(path: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        path: path.to_string(),
        message: message.into(),
        is_warning: true,
    }
}

pub fn validate_bronze(bronze: &BronzeConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if bronze.system.trim().is_empty() {
        issues.push(err("bronze.system", "system is required"));
    }
    if bronze.entity.trim().is_empty() {
        issues.push(err("bronze.entity", "entity is required"));
    }
    if bronze.target_path.trim().is_empty() {
        issues.push(err("bronze.target_path", "target_path is required"));
    }

    if bronze.source_type.is_file() && bronze.source_path.trim().is_empty() {
        issues.push(err("bronze.source_path", "file source requires source_path"));
    }

    if bronze.source_type.is_database() && bronze.connection_ref.is_none() {
        if bronze.host.is_none() {
            issues.push(err("bronze.host", "database source requires host (or connection_ref)"));
        }
        if bronze.database.is_none() {
            issues.push(err("bronze.database", "database source requires database (or connection_ref)"));
        }
    }

    if bronze.source_type == SourceType::FileFixedWidth {
        let has_record_types = bronze.options.get("record_types").map(|v| v.is_array()).unwrap_or(false);
        if !has_record_types {
            let has_columns = bronze.options.get("columns").is_some();
            let has_widths = bronze.options.get("widths").is_some();
            if !has_columns || !has_widths {
                issues.push(err(
                    "bronze.options",
                    "fixed-width source requires columns/widths, unless multi-record with record_types",
                ));
            }
        }
    }

    if matches!(bronze.load_pattern, LoadPattern::IncrementalAppend | LoadPattern::Cdc)
        && bronze.watermark_column.is_none()
    {
        issues.push(err(
            "bronze.watermark_column",
            "incremental_append and cdc load patterns require watermark_column",
        ));
    }

    if bronze.load_pattern == LoadPattern::FullSnapshot && bronze.watermark_column.is_some() {
        issues.push(warn(
            "bronze.watermark_column",
            "full_snapshot Bronze with watermark_column set has no effect",
        ));
    }

    issues
}

pub fn validate_silver(silver: &SilverConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if silver.attributes.is_some() && silver.exclude_columns.is_some() {
        issues.push(err(
            "silver",
            "attributes and exclude_columns are mutually exclusive",
        ));
    }

    let is_periodic_snapshot = silver.model == Some(ModelPreset::PeriodicSnapshot);
    if !is_periodic_snapshot {
        if silver.natural_keys.is_empty() {
            issues.push(err("silver.natural_keys", "natural_keys is required"));
        }
        if silver.change_timestamp.is_none() {
            issues.push(err("silver.change_timestamp", "change_timestamp is required"));
        }
    }

    let is_cdc_preset = matches!(
        silver.model,
        Some(
            ModelPreset::CdcCurrent
                | ModelPreset::CdcCurrentTombstone
                | ModelPreset::CdcCurrentHardDelete
                | ModelPreset::CdcHistory
                | ModelPreset::CdcHistoryTombstone
                | ModelPreset::CdcHistoryHardDelete
        )
    );
    if is_cdc_preset && silver.cdc_options.operation_column.is_none() {
        issues.push(err(
            "silver.cdc_options.operation_column",
            "CDC silver model requires cdc_options.operation_column",
        ));
    }

    if silver.entity_kind == Some(EntityKind::Event) && silver.history_mode == Some(HistoryMode::FullHistory) {
        issues.push(warn(
            "silver.history_mode",
            "event entities with full_history accumulate without bound; consider current_only",
        ));
    }

    issues
}

/// Cross-layer checks that need both configs together (spec §4.12's
/// "CDC preset with non-CDC Bronze" and `periodic_snapshot` mismatch rules).
pub fn validate_cross(bronze: &BronzeConfig, silver: &SilverConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let is_cdc_preset = silver
        .model
        .map(|m| m.requires_cdc_bronze())
        .unwrap_or(false);
    let bronze_is_cdc = bronze.load_pattern == LoadPattern::Cdc;

    if is_cdc_preset && !bronze_is_cdc {
        issues.push(err(
            "silver.model",
            "CDC silver preset requires bronze.load_pattern = cdc",
        ));
    }
    if !is_cdc_preset && silver.model.is_some() && bronze_is_cdc {
        issues.push(warn(
            "silver.model",
            "non-CDC silver model reading a CDC bronze source will lose operation information",
        ));
    }

    if silver.model == Some(ModelPreset::PeriodicSnapshot) && bronze.load_pattern != LoadPattern::FullSnapshot {
        issues.push(warn(
            "silver.model",
            "periodic_snapshot silver model expects a full_snapshot bronze source; risk of unbounded accumulation",
        ));
    }

    issues
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|i| !i.is_warning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdcOptions;
    use std::collections::BTreeMap;

    fn bronze() -> BronzeConfig {
        BronzeConfig {
            system: "sys".into(),
            entity: "ent".into(),
            source_type: SourceType::FileCsv,
            load_pattern: LoadPattern::FullSnapshot,
            watermark_column: None,
            source_path: "/data/{run_date}.csv".into(),
            target_path: "/bronze/{system}/{entity}/{run_date}/".into(),
            options: serde_json::json!({}),
            input_mode: None,
            write_checksums: true,
            write_metadata: true,
            connection_ref: None,
            host: None,
            database: None,
            late_data: None,
        }
    }

    fn silver() -> SilverConfig {
        SilverConfig {
            natural_keys: vec!["id".into()],
            change_timestamp: Some("ts".into()),
            attributes: None,
            exclude_columns: None,
            column_mapping: BTreeMap::new(),
            entity_kind: Some(EntityKind::State),
            history_mode: Some(HistoryMode::CurrentOnly),
            delete_mode: None,
            input_mode: None,
            model: None,
            cdc_options: CdcOptions::default(),
            source_path: String::new(),
            target_path: String::new(),
        }
    }

    #[test]
    fn valid_configs_produce_no_errors() {
        assert!(!has_errors(&validate_bronze(&bronze())));
        assert!(!has_errors(&validate_silver(&silver())));
        assert!(!has_errors(&validate_cross(&bronze(), &silver())));
    }

    #[test]
    fn incremental_bronze_requires_watermark_column() {
        let mut b = bronze();
        b.load_pattern = LoadPattern::IncrementalAppend;
        let issues = validate_bronze(&b);
        assert!(has_errors(&issues));
    }

    #[test]
    fn database_source_requires_host_and_database_without_connection_ref() {
        let mut b = bronze();
        b.source_type = SourceType::DatabasePostgres;
        let issues = validate_bronze(&b);
        assert!(has_errors(&issues));
    }

    #[test]
    fn attributes_and_exclude_columns_conflict() {
        let mut s = silver();
        s.attributes = Some(vec!["a".into()]);
        s.exclude_columns = Some(vec!["b".into()]);
        assert!(has_errors(&validate_silver(&s)));
    }

    #[test]
    fn periodic_snapshot_permits_missing_natural_keys() {
        let mut s = silver();
        s.natural_keys = Vec::new();
        s.change_timestamp = None;
        s.model = Some(ModelPreset::PeriodicSnapshot);
        assert!(!has_errors(&validate_silver(&s)));
    }

    #[test]
    fn cdc_preset_requires_cdc_bronze() {
        let mut s = silver();
        s.model = Some(ModelPreset::CdcCurrent);
        s.cdc_options = CdcOptions {
            operation_column: Some("op".into()),
            ..Default::default()
        };
        let issues = validate_cross(&bronze(), &s);
        assert!(has_errors(&issues));
    }
}

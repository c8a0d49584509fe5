//! Declarative pipeline configuration schema (spec §3). The YAML/TOML
//! parser itself is out of scope (spec §1); this module only defines the
//! semantic shape that a parser deserializes into, following the teacher's
//! `config.rs` convention of `#[derive(Debug, Clone, Deserialize, Default)]`
//! structs with field-level defaults.

use serde::Deserialize;
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    FileCsv,
    FileParquet,
    FileFixedWidth,
    FileSpaceDelimited,
    FileJson,
    FileJsonl,
    FileExcel,
    DatabaseMssql,
    DatabasePostgres,
    DatabaseMysql,
    DatabaseDb2,
    ApiRest,
    DbMulti,
    Custom,
}

impl SourceType {
    pub fn is_file(&self) -> bool {
        matches!(
            self,
            SourceType::FileCsv
                | SourceType::FileParquet
                | SourceType::FileFixedWidth
                | SourceType::FileSpaceDelimited
                | SourceType::FileJson
                | SourceType::FileJsonl
                | SourceType::FileExcel
        )
    }

    pub fn is_database(&self) -> bool {
        matches!(
            self,
            SourceType::DatabaseMssql
                | SourceType::DatabasePostgres
                | SourceType::DatabaseMysql
                | SourceType::DatabaseDb2
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadPattern {
    #[default]
    FullSnapshot,
    #[serde(alias = "incremental")]
    IncrementalAppend,
    Cdc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    ReplaceDaily,
    AppendLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    State,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    #[default]
    CurrentOnly,
    FullHistory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    Ignore,
    Tombstone,
    HardDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPreset {
    PeriodicSnapshot,
    FullMergeDedupe,
    IncrementalMerge,
    ScdType2,
    EventLog,
    CdcCurrent,
    CdcCurrentTombstone,
    CdcCurrentHardDelete,
    CdcHistory,
    CdcHistoryTombstone,
    CdcHistoryHardDelete,
}

impl ModelPreset {
    pub fn requires_cdc_bronze(&self) -> bool {
        matches!(
            self,
            ModelPreset::CdcCurrent
                | ModelPreset::CdcCurrentTombstone
                | ModelPreset::CdcCurrentHardDelete
                | ModelPreset::CdcHistory
                | ModelPreset::CdcHistoryTombstone
                | ModelPreset::CdcHistoryHardDelete
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CdcOptions {
    pub operation_column: Option<String>,
    #[serde(default = "default_insert_code")]
    pub insert_code: String,
    #[serde(default = "default_update_code")]
    pub update_code: String,
    #[serde(default = "default_delete_code")]
    pub delete_code: String,
}

fn default_insert_code() -> String {
    "I".to_string()
}
fn default_update_code() -> String {
    "U".to_string()
}
fn default_delete_code() -> String {
    "D".to_string()
}

/// Source-type-specific option bag. Rather than a single `HashMap<String,
/// serde_json::Value>` (which the teacher's config never needed but which
/// several pack repos use for exactly this kind of polymorphic knob-bag,
/// e.g. `dashboard.widgets.query_config` in `config_db.rs`), we model it as
/// raw JSON and let each extractor parse out the keys it understands —
/// this mirrors the Python original's plain `dict` `options` field.
pub type OptionsBag = serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct BronzeConfig {
    pub system: String,
    pub entity: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub load_pattern: LoadPattern,
    pub watermark_column: Option<String>,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub target_path: String,
    #[serde(default)]
    pub options: OptionsBag,
    pub input_mode: Option<InputMode>,
    #[serde(default = "default_true")]
    pub write_checksums: bool,
    #[serde(default = "default_true")]
    pub write_metadata: bool,
    pub connection_ref: Option<String>,
    pub host: Option<String>,
    pub database: Option<String>,
    /// `[ADD]` spec §4.11: late-data classification applied to a Bronze
    /// extraction before it is written. Absent means no classification
    /// (equivalent to `mode = allow` with no configured event-time column).
    pub late_data: Option<crate::late_data::LateDataConfig>,
}

impl BronzeConfig {
    pub fn render_path(template: &str, system: &str, entity: &str, run_date: &str) -> String {
        template
            .replace("{system}", system)
            .replace("{entity}", entity)
            .replace("{run_date}", run_date)
    }

    pub fn source_for_date(&self, run_date: &str) -> String {
        Self::render_path(&self.source_path, &self.system, &self.entity, run_date)
    }

    pub fn target_for_date(&self, run_date: &str) -> String {
        Self::render_path(&self.target_path, &self.system, &self.entity, run_date)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SilverConfig {
    /// Accepts the `unique_columns` synonym per spec §9 Open Questions.
    #[serde(alias = "unique_columns")]
    pub natural_keys: Vec<String>,
    /// Accepts the `last_updated_column` synonym per spec §9.
    #[serde(alias = "last_updated_column")]
    pub change_timestamp: Option<String>,
    pub attributes: Option<Vec<String>>,
    pub exclude_columns: Option<Vec<String>>,
    #[serde(default)]
    pub column_mapping: BTreeMap<String, String>,
    pub entity_kind: Option<EntityKind>,
    pub history_mode: Option<HistoryMode>,
    pub delete_mode: Option<DeleteMode>,
    pub input_mode: Option<InputMode>,
    pub model: Option<ModelPreset>,
    #[serde(default)]
    pub cdc_options: CdcOptions,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub target_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub bronze: BronzeConfig,
    pub silver: SilverConfig,
}

/// Parse either YAML or TOML bytes into a [`PipelineConfig`] (spec §1 scopes
/// the parser *per se* out; this is the semantic schema it must produce).
pub fn parse_yaml(bytes: &[u8]) -> anyhow::Result<PipelineConfig> {
    Ok(serde_yaml::from_slice(bytes)?)
}

pub fn parse_toml(text: &str) -> anyhow::Result<PipelineConfig> {
    Ok(toml::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_natural_key_synonym() {
        let yaml = r#"
natural_keys: [order_id]
change_timestamp: updated_at
"#;
        let cfg: SilverConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.natural_keys, vec!["order_id".to_string()]);

        let yaml2 = r#"
unique_columns: [order_id]
last_updated_column: updated_at
"#;
        let cfg2: SilverConfig = serde_yaml::from_str(yaml2).unwrap();
        assert_eq!(cfg2.natural_keys, vec!["order_id".to_string()]);
        assert_eq!(cfg2.change_timestamp.as_deref(), Some("updated_at"));
    }

    #[test]
    fn renders_path_template() {
        let rendered =
            BronzeConfig::render_path("s3://bronze/system={system}/entity={entity}/dt={run_date}/", "sys", "ent", "2025-01-15");
        assert_eq!(rendered, "s3://bronze/system=sys/entity=ent/dt=2025-01-15/");
    }
}

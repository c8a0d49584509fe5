//! Integration tests exercising a full Bronze -> Silver run against a temp
//! directory (spec §8 scenarios A-C): full_snapshot+current_only,
//! SCD Type 2 full history, and CDC with tombstone deletes.

use medallion_core::config::{
    BronzeConfig, CdcOptions, DeleteMode, EntityKind, HistoryMode, InputMode, LoadPattern, SilverConfig, SourceType,
};
use medallion_core::connections::ConnectionRegistry;
use medallion_core::partition::read_partition_dir;
use medallion_core::record::Value;
use medallion_core::watermark::WatermarkStore;
use medallion_extract::CustomExtractorRegistry;
use medallion_runner::bronze::{run_bronze, BronzeContext};
use medallion_runner::silver::run_silver;
use medallion_runner::result::LayerOutcome;
use std::collections::BTreeMap;
use std::sync::Arc;

fn write_csv(path: &std::path::Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn csv_bronze_config(system: &str, entity: &str, root: &std::path::Path, load_pattern: LoadPattern) -> BronzeConfig {
    BronzeConfig {
        system: system.to_string(),
        entity: entity.to_string(),
        source_type: SourceType::FileCsv,
        load_pattern,
        watermark_column: None,
        source_path: root.join("source").join(format!("{entity}.csv")).to_string_lossy().into_owned(),
        target_path: root
            .join("bronze")
            .join("system={system}")
            .join("entity={entity}")
            .join("dt={run_date}")
            .to_string_lossy()
            .into_owned(),
        options: serde_json::Value::Null,
        input_mode: Some(InputMode::ReplaceDaily),
        write_checksums: true,
        write_metadata: true,
        connection_ref: None,
        host: None,
        database: None,
        late_data: None,
    }
}

fn silver_target(root: &std::path::Path) -> String {
    root.join("silver")
        .join("domain={system}")
        .join("subject={entity}")
        .join("dt={run_date}")
        .to_string_lossy()
        .into_owned()
}

async fn run_pipeline(
    bronze_cfg: &BronzeConfig,
    silver_cfg: &SilverConfig,
    run_date: &str,
    state_dir: &std::path::Path,
) -> (LayerOutcome, LayerOutcome) {
    let watermarks = WatermarkStore::new(state_dir);
    let connections = Arc::new(ConnectionRegistry::new());
    let custom_extractors = CustomExtractorRegistry::new();
    let ctx = BronzeContext {
        connections: &connections,
        custom_extractors: &custom_extractors,
        watermarks: &watermarks,
    };

    let bronze_outcome = run_bronze(bronze_cfg, run_date, &ctx, None, false)
        .await
        .expect("bronze run should succeed");

    let silver_outcome = run_silver(bronze_cfg, silver_cfg, run_date, Some(&bronze_outcome), None, false)
        .await
        .expect("silver run should succeed");

    (bronze_outcome, silver_outcome)
}

#[tokio::test]
async fn scenario_a_full_snapshot_current_only_dedupes_to_latest() {
    let dir = tempfile::tempdir().unwrap();
    let run_date = "2025-01-15";

    write_csv(
        &dir.path().join("source").join("customers.csv"),
        "customer_id,name,updated_at\n1,Alice,2025-01-15T09:00:00Z\n1,Alice B,2025-01-15T10:00:00Z\n2,Bob,2025-01-15T09:30:00Z\n",
    );

    let bronze_cfg = csv_bronze_config("crm", "customers", dir.path(), LoadPattern::FullSnapshot);
    let silver_cfg = SilverConfig {
        natural_keys: vec!["customer_id".to_string()],
        change_timestamp: Some("updated_at".to_string()),
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
        target_path: silver_target(dir.path()),
    };

    let (bronze_outcome, silver_outcome) = run_pipeline(&bronze_cfg, &silver_cfg, run_date, &dir.path().join(".state")).await;

    assert!(matches!(bronze_outcome, LayerOutcome::Executed { row_count: 3, .. }));
    let LayerOutcome::Executed { target, row_count, .. } = silver_outcome else {
        panic!("expected silver to execute");
    };
    assert_eq!(row_count, 2, "customer 1's two versions dedupe to one current row");

    let rows = read_partition_dir(std::path::Path::new(&target)).unwrap();
    let alice = rows.iter().find(|r| r.get("customer_id") == Some(&Value::Int(1))).unwrap();
    assert_eq!(alice.get("name"), Some(&Value::Str("Alice B".to_string())));
}

#[tokio::test]
async fn scenario_b_scd_type2_preserves_full_history() {
    let dir = tempfile::tempdir().unwrap();
    let run_date = "2025-01-15";

    write_csv(
        &dir.path().join("source").join("accounts.csv"),
        "account_id,status,updated_at\n1,active,2025-01-01T00:00:00Z\n1,suspended,2025-01-10T00:00:00Z\n1,active,2025-01-15T00:00:00Z\n",
    );

    let bronze_cfg = csv_bronze_config("billing", "accounts", dir.path(), LoadPattern::FullSnapshot);
    let silver_cfg = SilverConfig {
        natural_keys: vec!["account_id".to_string()],
        change_timestamp: Some("updated_at".to_string()),
        attributes: None,
        exclude_columns: None,
        column_mapping: BTreeMap::new(),
        entity_kind: Some(EntityKind::State),
        history_mode: Some(HistoryMode::FullHistory),
        delete_mode: None,
        input_mode: None,
        model: None,
        cdc_options: CdcOptions::default(),
        source_path: String::new(),
        target_path: silver_target(dir.path()),
    };

    let (_, silver_outcome) = run_pipeline(&bronze_cfg, &silver_cfg, run_date, &dir.path().join(".state")).await;

    let LayerOutcome::Executed { target, row_count, .. } = silver_outcome else {
        panic!("expected silver to execute");
    };
    assert_eq!(row_count, 3, "every version of the account is retained");

    let rows = read_partition_dir(std::path::Path::new(&target)).unwrap();
    let current_rows: Vec<_> = rows.iter().filter(|r| r.get("is_current") == Some(&Value::Int(1))).collect();
    assert_eq!(current_rows.len(), 1);
    assert_eq!(current_rows[0].get("status"), Some(&Value::Str("active".to_string())));
}

#[tokio::test]
async fn scenario_c_cdc_tombstone_marks_deleted_rows() {
    let dir = tempfile::tempdir().unwrap();
    let run_date = "2025-01-15";

    write_csv(
        &dir.path().join("source").join("orders.csv"),
        "order_id,amount,op,updated_at\n\
         1,100,I,2025-01-01T00:00:00Z\n\
         1,150,U,2025-01-05T00:00:00Z\n\
         2,50,I,2025-01-02T00:00:00Z\n\
         2,50,D,2025-01-06T00:00:00Z\n",
    );

    let bronze_cfg = csv_bronze_config("orders_db", "orders", dir.path(), LoadPattern::Cdc);
    let silver_cfg = SilverConfig {
        natural_keys: vec!["order_id".to_string()],
        change_timestamp: Some("updated_at".to_string()),
        attributes: None,
        exclude_columns: None,
        column_mapping: BTreeMap::new(),
        entity_kind: Some(EntityKind::State),
        history_mode: Some(HistoryMode::CurrentOnly),
        delete_mode: Some(DeleteMode::Tombstone),
        input_mode: None,
        model: None,
        cdc_options: CdcOptions {
            operation_column: Some("op".to_string()),
            insert_code: "I".to_string(),
            update_code: "U".to_string(),
            delete_code: "D".to_string(),
        },
        source_path: String::new(),
        target_path: silver_target(dir.path()),
    };

    let (_, silver_outcome) = run_pipeline(&bronze_cfg, &silver_cfg, run_date, &dir.path().join(".state")).await;

    let LayerOutcome::Executed { target, row_count, .. } = silver_outcome else {
        panic!("expected silver to execute");
    };
    assert_eq!(row_count, 2, "both keys keep a row: one live, one tombstoned");

    let rows = read_partition_dir(std::path::Path::new(&target)).unwrap();
    let order1 = rows.iter().find(|r| r.get("order_id") == Some(&Value::Int(1))).unwrap();
    assert_eq!(order1.get("amount"), Some(&Value::Int(150)));
    assert_eq!(order1.get("_deleted"), Some(&Value::Bool(false)));

    let order2 = rows.iter().find(|r| r.get("order_id") == Some(&Value::Int(2))).unwrap();
    assert_eq!(order2.get("_deleted"), Some(&Value::Bool(true)));
    assert!(rows.iter().all(|r| r.get("op").is_none()), "operation column is stripped from curated output");
}

#[tokio::test]
async fn watermark_advances_only_after_nonzero_bronze_write() {
    let dir = tempfile::tempdir().unwrap();
    let run_date = "2025-01-15";
    let source_path = dir.path().join("source").join("events.csv");

    write_csv(&source_path, "event_id,occurred_at\nA,2025-01-15T00:00:00Z\nB,2025-01-16T00:00:00Z\n");

    let mut bronze_cfg = csv_bronze_config("telemetry", "events", dir.path(), LoadPattern::FullSnapshot);
    bronze_cfg.watermark_column = Some("occurred_at".to_string());

    let watermarks = WatermarkStore::new(dir.path().join(".state"));
    let connections = Arc::new(ConnectionRegistry::new());
    let custom_extractors = CustomExtractorRegistry::new();
    let ctx = BronzeContext {
        connections: &connections,
        custom_extractors: &custom_extractors,
        watermarks: &watermarks,
    };

    assert!(watermarks.get("telemetry", "events").is_none());
    run_bronze(&bronze_cfg, run_date, &ctx, None, false).await.unwrap();
    let advanced = watermarks.get("telemetry", "events").expect("watermark saved after a non-empty write");
    assert_eq!(advanced.last_value, "2025-01-16T00:00:00Z");

    // A second run against an empty (header-only) source produces zero rows;
    // the write is skipped and the watermark must not move.
    write_csv(&source_path, "event_id,occurred_at\n");
    run_bronze(&bronze_cfg, run_date, &ctx, None, false).await.unwrap();
    let unchanged = watermarks.get("telemetry", "events").unwrap();
    assert_eq!(unchanged.last_value, "2025-01-16T00:00:00Z", "empty extraction must not advance the watermark");
}

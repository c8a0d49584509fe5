//! Partition writer (spec §4.8). Grounded on `pipelines/lib/silver.py`'s
//! write step and on the `AsyncArrowWriter` pattern in the pack's
//! `lakehouse/write_partition.rs`, simplified to the spec's synchronous
//! local-file contract (spec §5: "Parquet writes (synchronous)").

use crate::error::PipelineError;
use crate::record::{Record, Value};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{TimeZone, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub row_count: usize,
    pub columns: Vec<ColumnSchema>,
    pub entity_kind: String,
    pub history_mode: String,
    pub natural_keys: Vec<String>,
    pub change_timestamp: String,
    pub run_date: String,
    pub source_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumEntry {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumManifest {
    pub files: Vec<ChecksumEntry>,
}

#[derive(Debug, Clone)]
pub struct WriteResult {
    pub skipped: bool,
    pub reason: Option<String>,
    pub row_count: usize,
    pub target: PathBuf,
    pub columns: Vec<String>,
}

/// Infer the widest `DataType` a column needs across all rows: mixed-type
/// columns (rare, but the dynamically-typed source permits them) widen to
/// `Utf8`.
fn infer_column_type(rows: &[Record], column: &str) -> DataType {
    let mut seen: Option<DataType> = None;
    for row in rows {
        let dt = match row.get(column) {
            None | Some(Value::Null) => continue,
            Some(Value::Bool(_)) => DataType::Boolean,
            Some(Value::Int(_)) => DataType::Int64,
            Some(Value::Float(_)) => DataType::Float64,
            Some(Value::Str(_)) => DataType::Utf8,
            Some(Value::Timestamp(_)) => DataType::Timestamp(TimeUnit::Microsecond, None),
        };
        match &seen {
            None => seen = Some(dt),
            Some(existing) if *existing != dt => return DataType::Utf8,
            _ => {}
        }
    }
    seen.unwrap_or(DataType::Utf8)
}

fn sql_type_name(dt: &DataType) -> String {
    match dt {
        DataType::Boolean => "boolean",
        DataType::Int64 => "bigint",
        DataType::Float64 => "double",
        DataType::Utf8 => "string",
        DataType::Timestamp(_, _) => "timestamp",
        _ => "string",
    }
    .to_string()
}

fn build_array(rows: &[Record], column: &str, data_type: &DataType) -> ArrayRef {
    match data_type {
        DataType::Boolean => Arc::new(BooleanArray::from(
            rows.iter()
                .map(|r| match r.get(column) {
                    Some(Value::Bool(b)) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Int64 => Arc::new(Int64Array::from(
            rows.iter()
                .map(|r| match r.get(column) {
                    Some(Value::Int(i)) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            rows.iter()
                .map(|r| match r.get(column) {
                    Some(Value::Float(f)) => Some(*f),
                    Some(Value::Int(i)) => Some(*i as f64),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Timestamp(_, _) => Arc::new(TimestampMicrosecondArray::from(
            rows.iter()
                .map(|r| match r.get(column) {
                    Some(Value::Timestamp(t)) => Some(t.timestamp_micros()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        _ => Arc::new(StringArray::from(
            rows.iter()
                .map(|r| r.get(column).map(|v| v.to_comparable_string()))
                .collect::<Vec<_>>(),
        )),
    }
}

/// Materialize `rows` into an Arrow `RecordBatch`, inferring a schema from
/// the union of columns present (in first-seen order).
pub fn to_record_batch(rows: &[Record]) -> Result<(RecordBatch, Vec<ColumnSchema>), PipelineError> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for col in row.columns() {
            if !columns.iter().any(|c| c == col) {
                columns.push(col.to_string());
            }
        }
    }

    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());
    let mut schema_cols = Vec::with_capacity(columns.len());

    for col in &columns {
        let data_type = infer_column_type(rows, col);
        let nullable = rows.iter().any(|r| r.get(col).map(Value::is_null).unwrap_or(true));
        fields.push(Field::new(col, data_type.clone(), nullable));
        arrays.push(build_array(rows, col, &data_type));
        schema_cols.push(ColumnSchema {
            name: col.clone(),
            sql_type: sql_type_name(&data_type),
            nullable,
        });
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema, arrays)
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("building record batch: {e}")))?;
    Ok((batch, schema_cols))
}

fn sha256_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let bytes_written = std::io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), bytes_written))
}

#[allow(clippy::too_many_arguments)]
pub struct PartitionWriteRequest<'a> {
    pub target_dir: &'a Path,
    pub rows: Vec<Record>,
    pub entity_kind: String,
    pub history_mode: String,
    pub natural_keys: Vec<String>,
    pub change_timestamp: String,
    pub run_date: String,
    pub source_path: String,
    pub write_checksums: bool,
    pub write_metadata: bool,
    pub skip_if_exists: bool,
}

/// Write a partition per the six-step contract in spec §4.8. Row count is
/// computed before writing (step 1); a zero-row batch short-circuits
/// without touching the filesystem (step 2).
pub fn write_partition(req: PartitionWriteRequest<'_>) -> Result<WriteResult, PipelineError> {
    let row_count = req.rows.len();

    if req.skip_if_exists && req.target_dir.exists() && std::fs::read_dir(req.target_dir).map(|mut d| d.next().is_some()).unwrap_or(false) {
        return Ok(WriteResult {
            skipped: true,
            reason: Some("already_exists".to_string()),
            row_count,
            target: req.target_dir.to_path_buf(),
            columns: Vec::new(),
        });
    }

    if row_count == 0 {
        return Ok(WriteResult {
            skipped: true,
            reason: Some("empty".to_string()),
            row_count: 0,
            target: req.target_dir.to_path_buf(),
            columns: Vec::new(),
        });
    }

    std::fs::create_dir_all(req.target_dir)?;

    let (batch, schema_cols) = to_record_batch(&req.rows)?;
    let data_path = req.target_dir.join("part-00000.parquet");
    {
        let file = std::fs::File::create(&data_path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
            .map_err(|e| PipelineError::Other(anyhow::anyhow!("opening parquet writer: {e}")))?;
        writer
            .write(&batch)
            .map_err(|e| PipelineError::Other(anyhow::anyhow!("writing parquet batch: {e}")))?;
        writer
            .close()
            .map_err(|e| PipelineError::Other(anyhow::anyhow!("closing parquet writer: {e}")))?;
    }

    if req.write_metadata {
        let metadata = PartitionMetadata {
            row_count,
            columns: schema_cols.clone(),
            entity_kind: req.entity_kind,
            history_mode: req.history_mode,
            natural_keys: req.natural_keys,
            change_timestamp: req.change_timestamp,
            run_date: req.run_date,
            source_path: req.source_path,
        };
        let body = serde_json::to_string_pretty(&metadata)?;
        std::fs::write(req.target_dir.join("_metadata.json"), body)?;
    }

    if req.write_checksums {
        let (sha256, size_bytes) = sha256_file(&data_path)?;
        let manifest = ChecksumManifest {
            files: vec![ChecksumEntry {
                path: "part-00000.parquet".to_string(),
                sha256,
                size_bytes,
            }],
        };
        let body = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(req.target_dir.join("_checksums.json"), body)?;
    }

    Ok(WriteResult {
        skipped: false,
        reason: None,
        row_count,
        target: req.target_dir.to_path_buf(),
        columns: schema_cols.into_iter().map(|c| c.name).collect(),
    })
}

/// Verify every file listed in `_checksums.json` under `partition_dir`
/// matches its recorded hash and size (spec §3 invariant, §8 property 6).
pub fn verify_checksums(partition_dir: &Path) -> Result<(), PipelineError> {
    let manifest_path = partition_dir.join("_checksums.json");
    let raw = match std::fs::read_to_string(&manifest_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let manifest: ChecksumManifest = serde_json::from_str(&raw)?;

    for entry in &manifest.files {
        let data_path = partition_dir.join(&entry.path);
        let (actual_sha256, actual_size) = sha256_file(&data_path)?;
        if actual_sha256 != entry.sha256 || actual_size != entry.size_bytes {
            return Err(PipelineError::Checksum {
                message: format!(
                    "checksum mismatch for {}: recorded sha256={} size={}, actual sha256={} size={}",
                    entry.path, entry.sha256, entry.size_bytes, actual_sha256, actual_size
                ),
                ctx: Default::default(),
            });
        }
    }
    Ok(())
}

/// Inverse of [`to_record_batch`]: materialize a `RecordBatch`'s rows back
/// into [`Record`]s, used by the Silver engine to read Bronze partitions
/// back off disk (spec §4.7's input-mode resolver hands the runner a set
/// of partition directories, not rows; this closes that gap). Column order
/// follows the schema's field order.
fn record_batch_to_rows(batch: &RecordBatch) -> Vec<Record> {
    let schema = batch.schema();
    let mut rows = vec![Record::new(); batch.num_rows()];

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let array = batch.column(col_idx);
        match field.data_type() {
            DataType::Boolean => {
                let arr = array.as_any().downcast_ref::<BooleanArray>().unwrap();
                for (row_idx, row) in rows.iter_mut().enumerate() {
                    let v = if arr.is_null(row_idx) { Value::Null } else { Value::Bool(arr.value(row_idx)) };
                    row.insert(field.name().clone(), v);
                }
            }
            DataType::Int64 => {
                let arr = array.as_any().downcast_ref::<Int64Array>().unwrap();
                for (row_idx, row) in rows.iter_mut().enumerate() {
                    let v = if arr.is_null(row_idx) { Value::Null } else { Value::Int(arr.value(row_idx)) };
                    row.insert(field.name().clone(), v);
                }
            }
            DataType::Float64 => {
                let arr = array.as_any().downcast_ref::<Float64Array>().unwrap();
                for (row_idx, row) in rows.iter_mut().enumerate() {
                    let v = if arr.is_null(row_idx) { Value::Null } else { Value::Float(arr.value(row_idx)) };
                    row.insert(field.name().clone(), v);
                }
            }
            DataType::Timestamp(TimeUnit::Microsecond, _) => {
                let arr = array.as_any().downcast_ref::<TimestampMicrosecondArray>().unwrap();
                for (row_idx, row) in rows.iter_mut().enumerate() {
                    let v = if arr.is_null(row_idx) {
                        Value::Null
                    } else {
                        Utc.timestamp_micros(arr.value(row_idx))
                            .single()
                            .map(Value::Timestamp)
                            .unwrap_or(Value::Null)
                    };
                    row.insert(field.name().clone(), v);
                }
            }
            _ => {
                let arr = array.as_any().downcast_ref::<StringArray>().unwrap();
                for (row_idx, row) in rows.iter_mut().enumerate() {
                    let v = if arr.is_null(row_idx) { Value::Null } else { Value::Str(arr.value(row_idx).to_string()) };
                    row.insert(field.name().clone(), v);
                }
            }
        }
    }

    rows
}

/// Read every row out of a single parquet file.
pub fn read_parquet_file(path: &Path) -> Result<Vec<Record>, PipelineError> {
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("opening parquet reader for {}: {e}", path.display())))?
        .build()
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("building parquet reader for {}: {e}", path.display())))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| PipelineError::Other(anyhow::anyhow!("reading parquet batch from {}: {e}", path.display())))?;
        rows.extend(record_batch_to_rows(&batch));
    }
    Ok(rows)
}

/// Read every `*.parquet` file directly under `partition_dir` (spec §4.8:
/// "one or more parquet data files"), verifying checksums first when a
/// manifest is present (spec §3 invariant).
pub fn read_partition_dir(partition_dir: &Path) -> Result<Vec<Record>, PipelineError> {
    verify_checksums(partition_dir)?;

    let mut entries: Vec<PathBuf> = std::fs::read_dir(partition_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("parquet"))
        .collect();
    entries.sort();

    let mut rows = Vec::new();
    for path in entries {
        rows.extend(read_parquet_file(&path)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: i64, name: &str) -> Record {
        let mut r = Record::new();
        r.insert("id", Value::Int(id));
        r.insert("name", Value::Str(name.to_string()));
        r
    }

    #[test]
    fn zero_rows_skips_without_touching_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("part");
        let result = write_partition(PartitionWriteRequest {
            target_dir: &target,
            rows: Vec::new(),
            entity_kind: "state".into(),
            history_mode: "current_only".into(),
            natural_keys: vec!["id".into()],
            change_timestamp: "ts".into(),
            run_date: "2025-01-15".into(),
            source_path: "src".into(),
            write_checksums: true,
            write_metadata: true,
            skip_if_exists: false,
        })
        .unwrap();
        assert!(result.skipped);
        assert!(!target.exists());
    }

    #[test]
    fn writes_data_file_metadata_and_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("part");
        let result = write_partition(PartitionWriteRequest {
            target_dir: &target,
            rows: vec![rec(1, "a"), rec(2, "b")],
            entity_kind: "state".into(),
            history_mode: "current_only".into(),
            natural_keys: vec!["id".into()],
            change_timestamp: "ts".into(),
            run_date: "2025-01-15".into(),
            source_path: "src".into(),
            write_checksums: true,
            write_metadata: true,
            skip_if_exists: false,
        })
        .unwrap();
        assert!(!result.skipped);
        assert_eq!(result.row_count, 2);
        assert!(target.join("part-00000.parquet").exists());
        assert!(target.join("_metadata.json").exists());
        assert!(target.join("_checksums.json").exists());

        verify_checksums(&target).unwrap();
    }

    #[test]
    fn verify_checksums_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("part");
        write_partition(PartitionWriteRequest {
            target_dir: &target,
            rows: vec![rec(1, "a")],
            entity_kind: "state".into(),
            history_mode: "current_only".into(),
            natural_keys: vec!["id".into()],
            change_timestamp: "ts".into(),
            run_date: "2025-01-15".into(),
            source_path: "src".into(),
            write_checksums: true,
            write_metadata: true,
            skip_if_exists: false,
        })
        .unwrap();

        std::fs::write(target.join("part-00000.parquet"), b"tampered").unwrap();
        let err = verify_checksums(&target).unwrap_err();
        assert!(matches!(err, PipelineError::Checksum { .. }));
    }

    #[test]
    fn skip_if_exists_bypasses_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("part");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("marker"), b"x").unwrap();

        let result = write_partition(PartitionWriteRequest {
            target_dir: &target,
            rows: vec![rec(1, "a")],
            entity_kind: "state".into(),
            history_mode: "current_only".into(),
            natural_keys: vec!["id".into()],
            change_timestamp: "ts".into(),
            run_date: "2025-01-15".into(),
            source_path: "src".into(),
            write_checksums: true,
            write_metadata: true,
            skip_if_exists: true,
        })
        .unwrap();
        assert!(result.skipped);
        assert_eq!(result.reason.as_deref(), Some("already_exists"));
    }

    #[test]
    fn read_partition_dir_round_trips_written_rows() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("part");
        write_partition(PartitionWriteRequest {
            target_dir: &target,
            rows: vec![rec(1, "a"), rec(2, "b")],
            entity_kind: "state".into(),
            history_mode: "current_only".into(),
            natural_keys: vec!["id".into()],
            change_timestamp: "ts".into(),
            run_date: "2025-01-15".into(),
            source_path: "src".into(),
            write_checksums: true,
            write_metadata: true,
            skip_if_exists: false,
        })
        .unwrap();

        let read_back = read_partition_dir(&target).unwrap();
        assert_eq!(read_back.len(), 2);
        let mut ids: Vec<i64> = read_back
            .iter()
            .map(|r| match r.get("id") {
                Some(Value::Int(i)) => *i,
                _ => panic!("expected int id"),
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn read_partition_dir_detects_tampering_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("part");
        write_partition(PartitionWriteRequest {
            target_dir: &target,
            rows: vec![rec(1, "a")],
            entity_kind: "state".into(),
            history_mode: "current_only".into(),
            natural_keys: vec!["id".into()],
            change_timestamp: "ts".into(),
            run_date: "2025-01-15".into(),
            source_path: "src".into(),
            write_checksums: true,
            write_metadata: true,
            skip_if_exists: false,
        })
        .unwrap();
        std::fs::write(target.join("part-00000.parquet"), b"tampered").unwrap();
        let err = read_partition_dir(&target).unwrap_err();
        assert!(matches!(err, PipelineError::Checksum { .. }));
    }
}

//! Curation operators (spec §4.6): pure transformations over a batch of
//! [`Record`]s. Grounded on `pipelines/lib/curate.py` (imported by
//! `silver.py` as `dedupe_latest`/`build_history`) and on
//! `tests/unit/test_cdc.py` for the exact `apply_cdc` delete-mode
//! semantics.

use crate::config::{CdcOptions, DeleteMode};
use crate::error::{ErrorContext, PipelineError};
use crate::record::{Record, Value};
use std::collections::BTreeMap;

/// Group rows by their natural-key tuple, preserving first-seen order of
/// groups (spec §4.6 "Ties are broken by the first-seen ordering").
fn group_by_keys(rows: &[Record], keys: &[String]) -> Vec<(Vec<Value>, Vec<usize>)> {
    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: BTreeMap<Vec<String>, Vec<usize>> = BTreeMap::new();
    let mut lookup: BTreeMap<Vec<String>, Vec<Value>> = BTreeMap::new();

    for (idx, row) in rows.iter().enumerate() {
        let key = row.key_tuple(keys);
        let key_str: Vec<String> = key.iter().map(|v| v.to_comparable_string()).collect();
        if !groups.contains_key(&key_str) {
            order.push(key.clone());
            lookup.insert(key_str.clone(), key);
        }
        groups.entry(key_str).or_default().push(idx);
    }

    order
        .into_iter()
        .map(|key| {
            let key_str: Vec<String> = key.iter().map(|v| v.to_comparable_string()).collect();
            (key, groups.remove(&key_str).unwrap_or_default())
        })
        .collect()
}

/// `dedupe_latest(rows, keys, ts)`: for each key group, emit the single
/// row with the maximum `ts`; ties keep the first-seen row.
pub fn dedupe_latest(rows: &[Record], keys: &[String], ts_column: &str) -> Vec<Record> {
    let groups = group_by_keys(rows, keys);
    let mut out = Vec::with_capacity(groups.len());
    for (_, indices) in groups {
        let mut best_idx = indices[0];
        let mut best_ts = rows[best_idx].get(ts_column).cloned().unwrap_or(Value::Null);
        for &idx in &indices[1..] {
            let ts = rows[idx].get(ts_column).cloned().unwrap_or(Value::Null);
            if ts.to_comparable_string() > best_ts.to_comparable_string() {
                best_ts = ts;
                best_idx = idx;
            }
        }
        out.push(rows[best_idx].clone());
    }
    out
}

/// `dedupe_exact(rows)`: emit distinct rows across all columns.
pub fn dedupe_exact(rows: &[Record]) -> Vec<Record> {
    let mut seen: Vec<Vec<String>> = Vec::new();
    let mut out = Vec::new();
    for row in rows {
        let fingerprint = row.lexical_key();
        if !seen.contains(&fingerprint) {
            seen.push(fingerprint);
            out.push(row.clone());
        }
    }
    out
}

/// `build_history(rows, keys, ts)`: SCD Type 2. For each key group ordered
/// by `ts` ascending, stamp `effective_from`/`effective_to`/`is_current`.
/// Preserves cardinality: output row count == input row count (spec §8
/// invariant 2).
pub fn build_history(rows: &[Record], keys: &[String], ts_column: &str) -> Vec<Record> {
    let groups = group_by_keys(rows, keys);
    let mut out = Vec::with_capacity(rows.len());

    for (_, indices) in groups {
        let mut ordered = indices.clone();
        ordered.sort_by(|&a, &b| {
            let ta = rows[a].get(ts_column).cloned().unwrap_or(Value::Null);
            let tb = rows[b].get(ts_column).cloned().unwrap_or(Value::Null);
            ta.to_comparable_string().cmp(&tb.to_comparable_string())
        });

        for (pos, &idx) in ordered.iter().enumerate() {
            let mut row = rows[idx].clone();
            let effective_from = row.get(ts_column).cloned().unwrap_or(Value::Null);
            let is_last = pos + 1 == ordered.len();
            let effective_to = if is_last {
                Value::Null
            } else {
                rows[ordered[pos + 1]]
                    .get(ts_column)
                    .cloned()
                    .unwrap_or(Value::Null)
            };
            row.insert("effective_from", effective_from);
            row.insert("effective_to", effective_to);
            row.insert("is_current", Value::Int(if is_last { 1 } else { 0 }));
            out.push(row);
        }
    }

    out
}

/// `apply_cdc` (spec §4.6). A missing `operation_column` in the
/// configuration, or an operation value absent from the dataset, is a
/// fatal configuration error per spec.
pub fn apply_cdc(
    rows: &[Record],
    keys: &[String],
    ts_column: &str,
    delete_mode: DeleteMode,
    cdc: &CdcOptions,
) -> Result<Vec<Record>, PipelineError> {
    let op_column = cdc.operation_column.as_deref().ok_or_else(|| {
        PipelineError::config_ctx(
            "cdc_options.operation_column is required when load_pattern=cdc",
            ErrorContext::new(),
        )
    })?;

    let groups = group_by_keys(rows, keys);
    let mut out = Vec::with_capacity(groups.len());

    for (_, indices) in groups {
        let mut best_idx = indices[0];
        let mut best_ts = rows[best_idx].get(ts_column).cloned().unwrap_or(Value::Null);
        for &idx in &indices[1..] {
            let ts = rows[idx].get(ts_column).cloned().unwrap_or(Value::Null);
            if ts.to_comparable_string() > best_ts.to_comparable_string() {
                best_ts = ts;
                best_idx = idx;
            }
        }

        let latest = &rows[best_idx];
        let op_value = latest.get(op_column).ok_or_else(|| {
            PipelineError::config_ctx(
                format!("operation column `{op_column}` not present in dataset"),
                ErrorContext::new(),
            )
        })?;
        let op = op_value.to_comparable_string();
        let is_delete = op == cdc.delete_code;

        if is_delete {
            match delete_mode {
                DeleteMode::Ignore | DeleteMode::HardDelete => continue,
                DeleteMode::Tombstone => {
                    let mut row = latest.clone();
                    row.remove(op_column);
                    row.insert("_deleted", Value::Bool(true));
                    out.push(row);
                }
            }
        } else {
            let mut row = latest.clone();
            row.remove(op_column);
            if matches!(delete_mode, DeleteMode::Tombstone) {
                row.insert("_deleted", Value::Bool(false));
            }
            out.push(row);
        }
    }

    Ok(out)
}

/// `[ADD]` historized CDC (the `cdc_history*` presets). Not in spec.md's
/// `apply_cdc` directly — §9 Open Questions flags the interaction of
/// delete handling with SCD2 as implementation-defined and asks that the
/// composition be documented where the Silver writer merges, which is
/// here: insert/update operations are historized exactly like
/// [`build_history`]; a key's delete operation closes its last kept
/// version's `effective_to` at the delete's timestamp rather than leaving
/// it open, and (only in `tombstone` mode) appends one more version
/// carrying `_deleted = true` as the new current row. `ignore`/`hard_delete`
/// leave the key with no current row once deleted, matching
/// [`apply_cdc`]'s current-only behavior for the same delete modes.
pub fn apply_cdc_history(
    rows: &[Record],
    keys: &[String],
    ts_column: &str,
    delete_mode: DeleteMode,
    cdc: &CdcOptions,
) -> Result<Vec<Record>, PipelineError> {
    let op_column = cdc.operation_column.as_deref().ok_or_else(|| {
        PipelineError::config_ctx(
            "cdc_options.operation_column is required when load_pattern=cdc",
            ErrorContext::new(),
        )
    })?;

    let groups = group_by_keys(rows, keys);
    let mut out = Vec::new();

    for (_, indices) in groups {
        let mut ordered = indices.clone();
        ordered.sort_by(|&a, &b| {
            let ta = rows[a].get(ts_column).cloned().unwrap_or(Value::Null);
            let tb = rows[b].get(ts_column).cloned().unwrap_or(Value::Null);
            ta.to_comparable_string().cmp(&tb.to_comparable_string())
        });

        let mut kept: Vec<usize> = Vec::new();
        let mut delete_ts: Option<Value> = None;
        let mut delete_row_idx: Option<usize> = None;

        for &idx in &ordered {
            let op_value = rows[idx].get(op_column).ok_or_else(|| {
                PipelineError::config_ctx(
                    format!("operation column `{op_column}` not present in dataset"),
                    ErrorContext::new(),
                )
            })?;
            if op_value.to_comparable_string() == cdc.delete_code {
                delete_ts = Some(rows[idx].get(ts_column).cloned().unwrap_or(Value::Null));
                delete_row_idx = Some(idx);
            } else {
                kept.push(idx);
            }
        }

        for (pos, &idx) in kept.iter().enumerate() {
            let mut row = rows[idx].clone();
            row.remove(op_column);
            let effective_from = row.get(ts_column).cloned().unwrap_or(Value::Null);
            let is_last = pos + 1 == kept.len();

            let (effective_to, is_current) = if !is_last {
                (rows[kept[pos + 1]].get(ts_column).cloned().unwrap_or(Value::Null), false)
            } else if let Some(dts) = &delete_ts {
                (dts.clone(), false)
            } else {
                (Value::Null, true)
            };

            row.insert("effective_from", effective_from);
            row.insert("effective_to", effective_to);
            row.insert("is_current", Value::Int(if is_current { 1 } else { 0 }));
            if matches!(delete_mode, DeleteMode::Tombstone) {
                row.insert("_deleted", Value::Bool(false));
            }
            out.push(row);
        }

        if let (Some(dts), DeleteMode::Tombstone) = (&delete_ts, delete_mode) {
            let mut tomb = match kept.last() {
                Some(&last_idx) => rows[last_idx].clone(),
                None => rows[delete_row_idx.expect("delete_ts implies a delete row was seen")].clone(),
            };
            tomb.remove(op_column);
            tomb.insert("effective_from", dts.clone());
            tomb.insert("effective_to", Value::Null);
            tomb.insert("is_current", Value::Int(1));
            tomb.insert("_deleted", Value::Bool(true));
            out.push(tomb);
        }
    }

    Ok(out)
}

/// Column projection/rename (spec §4.6, order of operations 1-4).
pub fn project_and_rename(
    rows: &[Record],
    natural_keys: &[String],
    change_timestamp: Option<&str>,
    attributes: Option<&[String]>,
    exclude_columns: Option<&[String]>,
    column_mapping: &BTreeMap<String, String>,
) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            let projected = if let Some(attrs) = attributes {
                let mut wanted: Vec<&str> = natural_keys.iter().map(|s| s.as_str()).collect();
                if let Some(ts) = change_timestamp {
                    wanted.push(ts);
                }
                wanted.extend(attrs.iter().map(|s| s.as_str()));
                let mut out = Record::new();
                for col in wanted {
                    if let Some(v) = row.get(col) {
                        out.insert(col, v.clone());
                    }
                }
                out
            } else if let Some(exclude) = exclude_columns {
                let mut out = Record::new();
                for col in row.columns() {
                    if !exclude.iter().any(|e| e == col) {
                        out.insert(col, row.get(col).cloned().unwrap());
                    }
                }
                out
            } else {
                row.clone()
            };

            if column_mapping.is_empty() {
                projected
            } else {
                let mut renamed = Record::new();
                for col in projected.columns() {
                    let target = column_mapping.get(col).cloned().unwrap_or_else(|| col.to_string());
                    renamed.insert(target, projected.get(col).cloned().unwrap());
                }
                renamed
            }
        })
        .collect()
}

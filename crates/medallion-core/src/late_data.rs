//! Late-data classification (spec §4.11). Grounded on
//! `pipelines/lib/late_data.py`'s reference-time/threshold window, with the
//! four modes the spec names.

use crate::error::{ErrorContext, PipelineError};
use crate::record::{Record, Value};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LateDataMode {
    #[default]
    Allow,
    Warn,
    Reject,
    Quarantine,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LateDataConfig {
    #[serde(default)]
    pub mode: LateDataMode,
    pub event_time_column: String,
    #[serde(default = "default_threshold_days")]
    pub threshold_days: i64,
}

fn default_threshold_days() -> i64 {
    1
}

pub struct Classification {
    pub on_time: Vec<Record>,
    pub late: Vec<Record>,
    pub warning: Option<String>,
}

fn parse_event_time(row: &Record, column: &str) -> Option<DateTime<Utc>> {
    match row.get(column)? {
        Value::Timestamp(t) => Some(*t),
        Value::Str(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

/// Classify `rows` against `reference_time`. A record exactly at
/// `reference_time - threshold_days` is on-time (spec §4.11).
pub fn classify(
    rows: Vec<Record>,
    config: &LateDataConfig,
    reference_time: DateTime<Utc>,
) -> Result<Classification, PipelineError> {
    let cutoff = reference_time - Duration::days(config.threshold_days);

    let mut on_time = Vec::new();
    let mut late = Vec::new();

    for row in rows {
        let is_late = match parse_event_time(&row, &config.event_time_column) {
            Some(event_time) => event_time < cutoff,
            None => false,
        };
        if is_late {
            late.push(row);
        } else {
            on_time.push(row);
        }
    }

    if late.is_empty() {
        return Ok(Classification {
            on_time,
            late,
            warning: None,
        });
    }

    match config.mode {
        LateDataMode::Allow => {
            on_time.extend(late);
            Ok(Classification {
                on_time,
                late: Vec::new(),
                warning: None,
            })
        }
        LateDataMode::Warn => {
            let warning = format!("{} late record(s) (event_time < {cutoff})", late.len());
            on_time.extend(late);
            Ok(Classification {
                on_time,
                late: Vec::new(),
                warning: Some(warning),
            })
        }
        LateDataMode::Reject => Err(PipelineError::LateData {
            message: format!("{} late record(s) encountered in reject mode", late.len()),
            ctx: ErrorContext::new().detail("threshold_days", config.threshold_days.to_string()),
        }),
        LateDataMode::Quarantine => Ok(Classification {
            on_time,
            late,
            warning: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row_at(ts: &str) -> Record {
        let mut r = Record::new();
        r.insert("event_ts", Value::Str(ts.to_string()));
        r
    }

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap()
    }

    fn config(mode: LateDataMode) -> LateDataConfig {
        LateDataConfig {
            mode,
            event_time_column: "event_ts".to_string(),
            threshold_days: 2,
        }
    }

    #[test]
    fn allow_includes_everything_with_no_warning() {
        let rows = vec![row_at("2025-01-01T00:00:00Z"), row_at("2025-01-15T00:00:00Z")];
        let result = classify(rows, &config(LateDataMode::Allow), reference()).unwrap();
        assert_eq!(result.on_time.len(), 2);
        assert!(result.warning.is_none());
    }

    #[test]
    fn reject_errors_when_late_records_present() {
        let rows = vec![row_at("2025-01-01T00:00:00Z")];
        let err = classify(rows, &config(LateDataMode::Reject), reference()).unwrap_err();
        assert!(matches!(err, PipelineError::LateData { .. }));
    }

    #[test]
    fn quarantine_splits_on_time_and_late() {
        let rows = vec![
            row_at("2025-01-01T00:00:00Z"),
            row_at("2025-01-14T00:00:00Z"),
        ];
        let result = classify(rows, &config(LateDataMode::Quarantine), reference()).unwrap();
        assert_eq!(result.late.len(), 1);
        assert_eq!(result.on_time.len(), 1);
    }

    #[test]
    fn boundary_exactly_at_cutoff_is_on_time() {
        let rows = vec![row_at("2025-01-13T00:00:00Z")];
        let result = classify(rows, &config(LateDataMode::Quarantine), reference()).unwrap();
        assert_eq!(result.on_time.len(), 1);
        assert!(result.late.is_empty());
    }
}

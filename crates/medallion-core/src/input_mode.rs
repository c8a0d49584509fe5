//! Input-mode resolution (spec §4.7): turns a templated, single-date Bronze
//! path into the set of partitions Silver should actually read. Grounded on
//! `pipelines/lib/silver.py`'s glob-expansion of `dt=...` segments.

use crate::config::{EntityKind, InputMode};
use regex::Regex;

/// Matches a `dt=YYYY-MM-DD` or `dt=YYYYMMDD` path segment.
fn dt_segment_re() -> Regex {
    Regex::new(r"dt=(\d{4}-\d{2}-\d{2}|\d{8})").unwrap()
}

/// Resolve the glob pattern Silver should read for a rendered Bronze path.
///
/// - `replace_daily`: the rendered path is returned unchanged (the caller
///   already substituted `{run_date}`), since the latest partition is the
///   only input.
/// - `append_log`: the `dt=...` segment is rewritten to `dt=*`. A path with
///   no `dt=...` segment is passed through unchanged, with the caller
///   expected to log the warning spec.md calls for.
pub fn resolve_read_pattern(rendered_path: &str, mode: InputMode) -> ResolvedPattern {
    match mode {
        InputMode::ReplaceDaily => ResolvedPattern {
            pattern: rendered_path.to_string(),
            warning: None,
        },
        InputMode::AppendLog => {
            let re = dt_segment_re();
            if let Some(m) = re.find(rendered_path) {
                let expanded = format!("{}{}{}", &rendered_path[..m.start()], "dt=*", &rendered_path[m.end()..]);
                ResolvedPattern {
                    pattern: expanded,
                    warning: None,
                }
            } else {
                ResolvedPattern {
                    pattern: rendered_path.to_string(),
                    warning: Some(format!(
                        "append_log input_mode requested but `{rendered_path}` has no dt=... partition segment; reading as-is"
                    )),
                }
            }
        }
    }
}

pub struct ResolvedPattern {
    pub pattern: String,
    pub warning: Option<String>,
}

/// Auto-wiring: if Silver leaves `input_mode` unset, inherit Bronze's. If
/// both are unset, default by `entity_kind` (spec §4.7).
pub fn effective_input_mode(
    silver_input_mode: Option<InputMode>,
    bronze_input_mode: Option<InputMode>,
    entity_kind: EntityKind,
) -> InputMode {
    silver_input_mode.or(bronze_input_mode).unwrap_or(match entity_kind {
        EntityKind::State => InputMode::ReplaceDaily,
        EntityKind::Event => InputMode::AppendLog,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_daily_passes_through() {
        let r = resolve_read_pattern("/data/system=s/entity=e/dt=2025-01-15/", InputMode::ReplaceDaily);
        assert_eq!(r.pattern, "/data/system=s/entity=e/dt=2025-01-15/");
        assert!(r.warning.is_none());
    }

    #[test]
    fn append_log_expands_dt_segment() {
        let r = resolve_read_pattern("/data/system=s/entity=e/dt=2025-01-15/", InputMode::AppendLog);
        assert_eq!(r.pattern, "/data/system=s/entity=e/dt=*/");
        assert!(r.warning.is_none());
    }

    #[test]
    fn append_log_expands_compact_date_form() {
        let r = resolve_read_pattern("/data/dt=20250115/file.parquet", InputMode::AppendLog);
        assert_eq!(r.pattern, "/data/dt=*/file.parquet");
    }

    #[test]
    fn append_log_without_dt_segment_warns() {
        let r = resolve_read_pattern("/data/flat/file.parquet", InputMode::AppendLog);
        assert_eq!(r.pattern, "/data/flat/file.parquet");
        assert!(r.warning.is_some());
    }

    #[test]
    fn auto_wiring_prefers_silver_then_bronze_then_entity_default() {
        assert_eq!(
            effective_input_mode(Some(InputMode::AppendLog), Some(InputMode::ReplaceDaily), EntityKind::State),
            InputMode::AppendLog
        );
        assert_eq!(
            effective_input_mode(None, Some(InputMode::AppendLog), EntityKind::State),
            InputMode::AppendLog
        );
        assert_eq!(effective_input_mode(None, None, EntityKind::State), InputMode::ReplaceDaily);
        assert_eq!(effective_input_mode(None, None, EntityKind::Event), InputMode::AppendLog);
    }
}

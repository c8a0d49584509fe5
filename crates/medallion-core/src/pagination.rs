//! Pagination state machines (spec §4.3). Grounded on
//! `core/domain/adapters/extractors/pagination.py`; the source's
//! inheritance hierarchy (`PaginationState` subclasses) becomes a closed
//! tagged union per design note §9 ("Dynamic dispatch → tagged unions").

use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaginationConfig {
    None,
    Offset {
        #[serde(default = "default_offset_param")]
        offset_param: String,
        #[serde(default = "default_limit_param")]
        limit_param: String,
        #[serde(default = "default_page_size")]
        page_size: u64,
        #[serde(default)]
        max_records: u64,
    },
    Page {
        #[serde(default = "default_page_param")]
        page_param: String,
        #[serde(default = "default_page_size_param")]
        page_size_param: String,
        #[serde(default = "default_page_size")]
        page_size: u64,
        #[serde(default)]
        max_pages: u64,
        #[serde(default)]
        max_records: u64,
    },
    Cursor {
        #[serde(default = "default_cursor_param")]
        cursor_param: String,
        #[serde(default = "default_cursor_path")]
        cursor_path: String,
        #[serde(default)]
        max_records: u64,
    },
}

fn default_offset_param() -> String {
    "offset".into()
}
fn default_limit_param() -> String {
    "limit".into()
}
fn default_page_size() -> u64 {
    100
}
fn default_page_param() -> String {
    "page".into()
}
fn default_page_size_param() -> String {
    "page_size".into()
}
fn default_cursor_param() -> String {
    "cursor".into()
}
fn default_cursor_path() -> String {
    "next_cursor".into()
}

impl Default for PaginationConfig {
    fn default() -> Self {
        PaginationConfig::None
    }
}

/// Per-run mutable pagination state (spec §3 "Pagination state (per-run,
/// ephemeral)").
pub struct PaginationState {
    config: PaginationConfig,
    base_params: BTreeMap<String, String>,
    offset: u64,
    page: u64,
    cursor: Option<String>,
    max_pages_reached: bool,
    records_seen: u64,
}

impl PaginationState {
    pub fn new(config: PaginationConfig, base_params: BTreeMap<String, String>) -> Self {
        Self {
            config,
            base_params,
            offset: 0,
            page: 1,
            cursor: None,
            max_pages_reached: false,
            records_seen: 0,
        }
    }

    fn max_records(&self) -> u64 {
        match &self.config {
            PaginationConfig::None => 0,
            PaginationConfig::Offset { max_records, .. }
            | PaginationConfig::Page { max_records, .. }
            | PaginationConfig::Cursor { max_records, .. } => *max_records,
        }
    }

    pub fn should_fetch_more(&self) -> bool {
        let max_records = self.max_records();
        if max_records > 0 && self.records_seen >= max_records {
            return false;
        }
        match &self.config {
            PaginationConfig::Page { max_pages, .. } if *max_pages > 0 => self.page <= *max_pages,
            _ => true,
        }
    }

    pub fn build_params(&mut self) -> BTreeMap<String, String> {
        let mut params = self.base_params.clone();
        match &self.config {
            PaginationConfig::None => {}
            PaginationConfig::Offset {
                offset_param,
                limit_param,
                page_size,
                ..
            } => {
                params.insert(limit_param.clone(), page_size.to_string());
                params.insert(offset_param.clone(), self.offset.to_string());
            }
            PaginationConfig::Page {
                page_param,
                page_size_param,
                page_size,
                ..
            } => {
                params.insert(page_param.clone(), self.page.to_string());
                params.insert(page_size_param.clone(), page_size.to_string());
            }
            PaginationConfig::Cursor { cursor_param, .. } => {
                if let Some(cursor) = &self.cursor {
                    params.insert(cursor_param.clone(), cursor.clone());
                }
            }
        }
        params
    }

    /// Called after each page is fetched. Returns `true` if another page
    /// should be requested, and advances offset/page/cursor for the next
    /// `build_params` call. `response_body` is the full decoded JSON body
    /// (used by the cursor variant to walk `cursor_path`).
    pub fn on_records(&mut self, record_count: usize, response_body: &Json) -> bool {
        self.records_seen += record_count as u64;
        let max_records = self.max_records();
        if max_records > 0 && self.records_seen >= max_records {
            return false;
        }
        match &self.config {
            PaginationConfig::None => false,
            PaginationConfig::Offset { page_size, .. } => {
                if record_count == 0 || (record_count as u64) < *page_size {
                    false
                } else {
                    self.offset += page_size;
                    true
                }
            }
            PaginationConfig::Page {
                page_size,
                max_pages,
                ..
            } => {
                if record_count == 0 || (record_count as u64) < *page_size {
                    return false;
                }
                self.page += 1;
                if *max_pages > 0 && self.page > *max_pages {
                    self.max_pages_reached = true;
                    return false;
                }
                true
            }
            PaginationConfig::Cursor { cursor_path, .. } => {
                if record_count == 0 {
                    return false;
                }
                self.cursor = extract_dotted_path(response_body, cursor_path)
                    .and_then(|v| v.as_str().map(|s| s.to_string()));
                self.cursor.is_some()
            }
        }
    }

    pub fn describe(&self) -> String {
        match &self.config {
            PaginationConfig::None => "(no pagination)".to_string(),
            PaginationConfig::Offset { .. } => format!("at offset {}", self.offset),
            PaginationConfig::Page { .. } => format!("from page {}", self.page),
            PaginationConfig::Cursor { .. } => {
                format!("(cursor pagination, next_cursor={:?})", self.cursor)
            }
        }
    }

    pub fn max_pages_limit_hit(&self) -> bool {
        self.max_pages_reached
    }
}

/// Walk a dotted path (e.g. `"data.next_cursor"`) into a JSON value.
pub fn extract_dotted_path<'a>(value: &'a Json, path: &str) -> Option<&'a Json> {
    let mut cur = value;
    for segment in path.split('.') {
        cur = cur.as_object()?.get(segment)?;
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offset_terminates_on_short_page() {
        let mut state = PaginationState::new(
            PaginationConfig::Offset {
                offset_param: "offset".into(),
                limit_param: "limit".into(),
                page_size: 10,
                max_records: 0,
            },
            BTreeMap::new(),
        );
        assert!(state.on_records(10, &json!({})));
        assert_eq!(state.offset, 10);
        assert!(!state.on_records(5, &json!({})));
    }

    #[test]
    fn page_respects_max_pages() {
        let mut state = PaginationState::new(
            PaginationConfig::Page {
                page_param: "page".into(),
                page_size_param: "page_size".into(),
                page_size: 10,
                max_pages: 2,
                max_records: 0,
            },
            BTreeMap::new(),
        );
        assert!(state.should_fetch_more());
        assert!(state.on_records(10, &json!({})));
        assert_eq!(state.page, 2);
        assert!(!state.on_records(10, &json!({})));
        assert!(state.max_pages_limit_hit());
    }

    #[test]
    fn cursor_walks_dotted_path_and_terminates_when_absent() {
        let mut state = PaginationState::new(
            PaginationConfig::Cursor {
                cursor_param: "cursor".into(),
                cursor_path: "meta.next".into(),
                max_records: 0,
            },
            BTreeMap::new(),
        );
        let body = json!({"meta": {"next": "abc123"}});
        assert!(state.on_records(5, &body));
        assert_eq!(state.build_params().get("cursor"), Some(&"abc123".to_string()));

        let body_end = json!({"meta": {}});
        assert!(!state.on_records(3, &body_end));
    }

    #[test]
    fn max_records_caps_total_across_pages() {
        let mut state = PaginationState::new(
            PaginationConfig::Offset {
                offset_param: "offset".into(),
                limit_param: "limit".into(),
                page_size: 10,
                max_records: 15,
            },
            BTreeMap::new(),
        );
        assert!(state.on_records(10, &json!({})));
        assert!(!state.on_records(10, &json!({})));
    }
}

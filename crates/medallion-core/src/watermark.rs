//! Durable watermark store (spec §4.2). Grounded on
//! `pipelines/lib/watermark.py`: one JSON file per `(system, entity)` under
//! a configurable state directory, with crash-safe temp-file + rename
//! writes (the Python original writes directly; spec.md tightens this to
//! "writes must be crash-safe", which this module honors).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_STATE_DIR: &str = ".state";
pub const STATE_DIR_ENV: &str = "PIPELINE_STATE_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkType {
    Timestamp,
    Integer,
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkEntry {
    pub system: String,
    pub entity: String,
    pub last_value: String,
    #[serde(default)]
    pub watermark_type: Option<WatermarkType>,
    pub updated_at: DateTime<Utc>,
}

pub struct WatermarkStore {
    state_dir: PathBuf,
}

impl WatermarkStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Resolve the store root from `PIPELINE_STATE_DIR`, falling back to
    /// `.state`.
    pub fn from_env() -> Self {
        let dir = std::env::var(STATE_DIR_ENV).unwrap_or_else(|_| DEFAULT_STATE_DIR.to_string());
        Self::new(dir)
    }

    fn path_for(&self, system: &str, entity: &str) -> PathBuf {
        self.state_dir.join(format!("{system}_{entity}_watermark.json"))
    }

    /// Returns `None` for a missing or corrupted entry; corruption is
    /// logged as a warning, never fatal (spec §4.2).
    pub fn get(&self, system: &str, entity: &str) -> Option<WatermarkEntry> {
        let path = self.path_for(system, entity);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<WatermarkEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(
                    system,
                    entity,
                    error = %e,
                    "corrupted watermark entry, treating as absent"
                );
                None
            }
        }
    }

    /// Atomically replace the watermark for `(system, entity)`: write to a
    /// sibling temp file, then rename over the final path.
    pub fn save(
        &self,
        system: &str,
        entity: &str,
        value: &str,
        watermark_type: Option<WatermarkType>,
    ) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        let entry = WatermarkEntry {
            system: system.to_string(),
            entity: entity.to_string(),
            last_value: value.to_string(),
            watermark_type,
            updated_at: Utc::now(),
        };
        let body = serde_json::to_string_pretty(&entry)?;
        let final_path = self.path_for(system, entity);
        let tmp_path = final_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &final_path)?;
        tracing::info!(system, entity, value, "saved watermark");
        Ok(())
    }

    pub fn delete(&self, system: &str, entity: &str) -> bool {
        let path = self.path_for(system, entity);
        if path.exists() {
            let _ = std::fs::remove_file(&path);
            true
        } else {
            false
        }
    }

    /// Operator tooling: enumerate every persisted watermark.
    pub fn list_all(&self) -> Vec<WatermarkEntry> {
        let Ok(dir) = std::fs::read_dir(&self.state_dir) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(raw) = std::fs::read_to_string(&path) {
                if let Ok(wm) = serde_json::from_str::<WatermarkEntry>(&raw) {
                    out.push(wm);
                }
            }
        }
        out
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_is_monotone_across_two_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::new(dir.path());

        assert!(store.get("sys", "ent").is_none());

        store
            .save("sys", "ent", "2025-01-15T10:00:00Z", Some(WatermarkType::Timestamp))
            .unwrap();
        let first = store.get("sys", "ent").unwrap().last_value;

        store
            .save("sys", "ent", "2025-01-16T11:00:00Z", Some(WatermarkType::Timestamp))
            .unwrap();
        let second = store.get("sys", "ent").unwrap().last_value;

        assert!(second >= first);
    }

    #[test]
    fn corrupted_file_yields_none_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::new(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("sys_ent_watermark.json"), "{not json").unwrap();
        assert!(store.get("sys", "ent").is_none());
    }

    #[test]
    fn delete_reports_whether_it_existed() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::new(dir.path());
        assert!(!store.delete("sys", "ent"));
        store.save("sys", "ent", "1", None).unwrap();
        assert!(store.delete("sys", "ent"));
        assert!(!store.delete("sys", "ent"));
    }
}

//! Pipeline discovery (spec §6 `--list`): scan a directory of pipeline
//! config files (`.yaml`/`.yml`/`.toml`) and parse each into a
//! `PipelineConfig`, keyed by its declared `name`.

use medallion_core::config::{parse_toml, parse_yaml, PipelineConfig};
use std::path::{Path, PathBuf};

pub const PIPELINES_DIR_ENV: &str = "PIPELINES_DIR";
pub const DEFAULT_PIPELINES_DIR: &str = "pipelines";

pub struct DiscoveredPipeline {
    pub path: PathBuf,
    pub config: PipelineConfig,
}

fn pipelines_dir() -> PathBuf {
    std::env::var(PIPELINES_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PIPELINES_DIR))
}

fn load_config_file(path: &Path) -> anyhow::Result<PipelineConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yaml" | "yml" => {
            let bytes = std::fs::read(path)?;
            parse_yaml(&bytes)
        }
        "toml" => {
            let text = std::fs::read_to_string(path)?;
            parse_toml(&text)
        }
        other => Err(anyhow::anyhow!("unsupported pipeline config extension `.{other}`")),
    }
}

/// Discover every pipeline config file directly under `dir`, skipping
/// files that fail to parse (logged, not fatal, so one bad config doesn't
/// hide the rest from `--list`).
pub fn discover_pipelines(dir: &Path) -> Vec<DiscoveredPipeline> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "could not read pipelines directory");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_config = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml") | Some("toml")
        );
        if !is_config {
            continue;
        }
        match load_config_file(&path) {
            Ok(config) => found.push(DiscoveredPipeline { path, config }),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unparseable pipeline config"),
        }
    }
    found.sort_by(|a, b| a.config.name.cmp(&b.config.name));
    found
}

/// Find a single pipeline by name in the default (or `PIPELINES_DIR`)
/// directory.
pub fn find_pipeline(name: &str) -> Option<DiscoveredPipeline> {
    discover_pipelines(&pipelines_dir())
        .into_iter()
        .find(|p| p.config.name == name)
}

pub fn default_pipelines_dir() -> PathBuf {
    pipelines_dir()
}

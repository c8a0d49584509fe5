//! Custom extractor dispatch (spec §4.5.5). A `source_type: custom` bronze
//! config names a fully qualified implementation; the runner instantiates it
//! without extra parameters and the implementation reads its own portion of
//! `options` directly.
//!
//! Grounded on the REDESIGN FLAG against implicit registration (spec §9:
//! "Avoid implicit registration via module-import side effects; prefer an
//! explicit `register_builtins()` call so that initialization order is
//! observable") and on [`medallion_core::connections::ConnectionRegistry`]'s
//! `Mutex<HashMap<...>>` shape for a process-wide typed registry.

use crate::extractor::{Extractor, WatermarkColumnConfig};
use medallion_core::config::BronzeConfig;
use medallion_core::error::{ErrorContext, PipelineError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Named by the `custom` bronze config's `options.implementation` field
/// (spec §4.5.5: "names a fully qualified implementation"). This crate's
/// `custom` extractors implement `Extractor` directly; `CustomExtractor` is
/// the trait alias callers register concrete types against.
pub trait CustomExtractor: Extractor {}
impl<T: Extractor> CustomExtractor for T {}

pub type CustomExtractorFactory = Arc<dyn Fn() -> Arc<dyn Extractor> + Send + Sync>;

/// Process-wide name → factory map, populated once at startup via
/// [`CustomExtractorRegistry::register`] rather than import-time side
/// effects.
#[derive(Clone, Default)]
pub struct CustomExtractorRegistry {
    factories: Arc<Mutex<HashMap<String, CustomExtractorFactory>>>,
}

impl CustomExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, factory: CustomExtractorFactory) {
        self.factories.lock().expect("custom extractor registry poisoned").insert(name.into(), factory);
    }

    pub fn resolve(&self, config: &BronzeConfig) -> Result<Arc<dyn Extractor>> {
        let name = implementation_name(config)?;
        let factories = self.factories.lock().expect("custom extractor registry poisoned");
        let factory = factories.get(&name).ok_or_else(|| {
            PipelineError::config_ctx(
                format!("no custom extractor registered under `{name}`"),
                ErrorContext::with_system_entity(config.system.as_str(), config.entity.as_str())
                    .suggest("call CustomExtractorRegistry::register before running this pipeline"),
            )
        })?;
        Ok(factory())
    }

    pub fn len(&self) -> usize {
        self.factories.lock().expect("custom extractor registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn implementation_name(config: &BronzeConfig) -> Result<String> {
    config
        .options
        .get("implementation")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::config_ctx(
                "custom source requires `options.implementation`",
                ErrorContext::with_system_entity(config.system.as_str(), config.entity.as_str()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use medallion_core::config::{LoadPattern, SourceType};
    use medallion_core::record::Record;

    struct EchoExtractor;

    #[async_trait]
    impl Extractor for EchoExtractor {
        async fn fetch_records(
            &self,
            _config: &BronzeConfig,
            _run_date: &str,
            _prior_cursor: Option<&str>,
        ) -> Result<(Vec<Record>, Option<String>)> {
            Ok((vec![Record::new()], None))
        }

        fn get_watermark_config(&self, _config: &BronzeConfig) -> Option<WatermarkColumnConfig> {
            None
        }
    }

    fn config_naming(implementation: &str) -> BronzeConfig {
        BronzeConfig {
            system: "test".into(),
            entity: "widgets".into(),
            source_type: SourceType::Custom,
            load_pattern: LoadPattern::FullSnapshot,
            watermark_column: None,
            source_path: String::new(),
            target_path: String::new(),
            options: serde_json::json!({ "implementation": implementation }),
            input_mode: None,
            write_checksums: true,
            write_metadata: true,
            connection_ref: None,
            host: None,
            database: None,
            late_data: None,
        }
    }

    #[test]
    fn resolves_a_registered_implementation_by_name() {
        let registry = CustomExtractorRegistry::new();
        registry.register("echo", Arc::new(|| Arc::new(EchoExtractor) as Arc<dyn Extractor>));
        let resolved = registry.resolve(&config_naming("echo"));
        assert!(resolved.is_ok());
    }

    #[test]
    fn unregistered_name_is_a_configuration_error() {
        let registry = CustomExtractorRegistry::new();
        let err = registry.resolve(&config_naming("missing")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn missing_implementation_field_is_a_configuration_error() {
        let registry = CustomExtractorRegistry::new();
        let mut config = config_naming("echo");
        config.options = serde_json::json!({});
        let err = registry.resolve(&config).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }
}

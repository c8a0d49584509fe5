//! The `Extractor` contract (spec §4.5): every source adapter exposes
//! `fetch_records` and `get_watermark_config`; [`fetch_with_watermark`]
//! layers the watermark-store bookkeeping spec §4.5's base type describes
//! on top of any concrete adapter.

use async_trait::async_trait;
use medallion_core::config::BronzeConfig;
use medallion_core::error::Result;
use medallion_core::record::Record;
use medallion_core::watermark::{WatermarkStore, WatermarkType};

/// What a source contributes to the watermark store when it supports
/// incremental extraction: the column name plus the type used to interpret
/// its persisted cursor.
#[derive(Debug, Clone)]
pub struct WatermarkColumnConfig {
    pub column: String,
    pub watermark_type: WatermarkType,
}

/// Every concrete adapter (api, db, file, custom) implements this. `db_multi`
/// is the one exception (spec §4.5.3): it persists its own per-entity
/// watermarks internally and exposes a richer return shape via
/// [`crate::db_multi::DbMultiExtractor::fetch_multi`] instead.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Pull one batch of records for `run_date`. `prior_cursor` is the
    /// watermark last persisted for this `(system, entity)`, already
    /// resolved by the caller so adapters stay free of store access.
    async fn fetch_records(
        &self,
        config: &BronzeConfig,
        run_date: &str,
        prior_cursor: Option<&str>,
    ) -> Result<(Vec<Record>, Option<String>)>;

    /// `None` when this source never supports incremental watermarking
    /// (e.g. full snapshots).
    fn get_watermark_config(&self, config: &BronzeConfig) -> Option<WatermarkColumnConfig>;
}

/// Base-type convenience (spec §4.5): consult the watermark store, delegate
/// to `fetch_records`, and — only on success with non-zero rows — persist
/// the new cursor. A failed or empty extraction never advances the
/// watermark.
pub async fn fetch_with_watermark(
    extractor: &dyn Extractor,
    config: &BronzeConfig,
    run_date: &str,
    store: &WatermarkStore,
) -> Result<(Vec<Record>, Option<String>)> {
    let watermark_cfg = extractor.get_watermark_config(config);
    let prior = match &watermark_cfg {
        Some(_) => store.get(&config.system, &config.entity),
        None => None,
    };
    let prior_cursor = prior.as_ref().map(|w| w.last_value.as_str());

    let (records, new_cursor) = extractor.fetch_records(config, run_date, prior_cursor).await?;

    if !records.is_empty() {
        if let (Some(wc), Some(cursor)) = (&watermark_cfg, &new_cursor) {
            store.save(&config.system, &config.entity, cursor, Some(wc.watermark_type))?;
            tracing::info!(
                system = %config.system,
                entity = %config.entity,
                cursor,
                "watermark advanced after bronze extraction"
            );
        }
    }

    Ok((records, new_cursor))
}

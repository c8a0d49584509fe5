//! Concrete source adapters implementing the `Extractor` contract (spec
//! §4.5): `api` (REST), `db` (single-entity database), `db_multi`
//! (multi-entity fan-out), `file` (flat-file formats), and `custom`
//! (user-registered extractors). `medallion-core` owns everything
//! adapter-agnostic — resilience, watermarking, curation, partitioning; this
//! crate owns only the per-source-type fetch logic.

pub mod api;
pub mod connections;
pub mod custom;
pub mod db;
pub mod db_multi;
pub mod extractor;
pub mod file;
pub mod http_auth;
pub mod retry_config;

pub use api::ApiExtractor;
pub use custom::{CustomExtractor, CustomExtractorFactory, CustomExtractorRegistry};
pub use db::DbExtractor;
pub use db_multi::DbMultiExtractor;
pub use extractor::{fetch_with_watermark, Extractor, WatermarkColumnConfig};
pub use file::FileExtractor;

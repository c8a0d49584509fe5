//! Bronze→Silver orchestrator library (spec §4.10): the `medallion` binary
//! (`src/main.rs`) is a thin CLI wrapper over this crate; `tests/` exercises
//! the same entry points directly.

pub mod bronze;
pub mod discover;
pub mod result;
pub mod runner;
pub mod silver;

pub use bronze::{run_bronze, BronzeContext};
pub use discover::{discover_pipelines, find_pipeline, DiscoveredPipeline};
pub use result::{LayerOutcome, RunResult};
pub use runner::{describe_outcome, LayerSelection, RunOptions, Runner};
pub use silver::run_silver;

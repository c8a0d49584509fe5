//! Result shapes the runner hands back to its caller (spec §4.10): each
//! layer reports one of three outcomes, and the two layers are aggregated
//! into a single `RunResult` the CLI serializes as JSON.

use serde::Serialize;

/// One layer's (Bronze or Silver's) outcome for a single invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LayerOutcome {
    Executed {
        row_count: usize,
        target: String,
        columns: Vec<String>,
        new_watermark: Option<String>,
    },
    Skipped {
        reason: String,
    },
    DryRun {
        plan: String,
    },
}

impl LayerOutcome {
    pub fn target(&self) -> Option<&str> {
        match self {
            LayerOutcome::Executed { target, .. } => Some(target.as_str()),
            _ => None,
        }
    }
}

/// Aggregate result of one `bronze, silver` pipeline invocation (spec §4.10
/// step 3).
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub bronze: Option<LayerOutcome>,
    pub silver: Option<LayerOutcome>,
    pub elapsed_seconds: f64,
    pub pipeline_name: String,
    pub error: Option<String>,
}

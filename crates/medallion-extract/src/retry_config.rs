//! Deserializable shape for the per-source `retry` config block (spec
//! §4.1/§4.5), shared by the api and db extractors so both parse the same
//! five knobs from their `options` bag.

use medallion_core::resilience::retry::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY_SECS, DEFAULT_JITTER, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_SECS,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_secs() -> f64 {
    DEFAULT_BASE_DELAY_SECS
}
fn default_max_delay_secs() -> f64 {
    DEFAULT_MAX_DELAY_SECS
}
fn default_backoff_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}
fn default_jitter() -> f64 {
    DEFAULT_JITTER
}

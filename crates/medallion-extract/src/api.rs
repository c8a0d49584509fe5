//! REST API extractor (spec §4.5.1). Grounded on
//! `core/domain/adapters/extractors/api_extractor.py`'s fetch loop; pooling
//! parameters and the sync/async duality come from
//! `core/infrastructure/io/http/pool.py` (SPEC_FULL §4.0's pooled-client
//! note). Pagination is strictly sequential in both modes (spec §5); only
//! [`get_many`]'s individual GETs are ever issued concurrently.

use crate::extractor::{Extractor, WatermarkColumnConfig};
use crate::http_auth::{resolve_auth, ApiAuthConfig};
use crate::retry_config::RetryConfig;
use async_trait::async_trait;
use medallion_core::config::BronzeConfig;
use medallion_core::error::{ErrorContext, PipelineError, Result};
use medallion_core::pagination::{extract_dotted_path, PaginationConfig, PaginationState};
use medallion_core::record::{Record, Value};
use medallion_core::resilience::{execute_with_resilience_async, BreakerRegistry, RetryPolicy};
use medallion_core::watermark::WatermarkType;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const COMMON_DATA_KEYS: [&str; 4] = ["items", "data", "results", "records"];

#[derive(Debug, Clone, Deserialize)]
pub struct HttpPoolConfig {
    #[serde(default = "default_pool_connections")]
    pub pool_connections: usize,
    #[serde(default = "default_pool_maxsize")]
    pub pool_maxsize: usize,
    #[serde(default)]
    pub pool_block: bool,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            pool_connections: default_pool_connections(),
            pool_maxsize: default_pool_maxsize(),
            pool_block: false,
        }
    }
}

fn default_pool_connections() -> usize {
    10
}
fn default_pool_maxsize() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsyncPoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_keepalive_connections")]
    pub max_keepalive_connections: usize,
    #[serde(default = "default_keepalive_expiry_secs")]
    pub keepalive_expiry_secs: u64,
    #[serde(default)]
    pub http2: bool,
}

impl Default for AsyncPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_keepalive_connections: default_keepalive_connections(),
            keepalive_expiry_secs: default_keepalive_expiry_secs(),
            http2: false,
        }
    }
}

fn default_max_connections() -> usize {
    100
}
fn default_keepalive_connections() -> usize {
    20
}
fn default_keepalive_expiry_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRateLimitConfig {
    pub rps: Option<f64>,
    pub burst: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSourceOptions {
    pub base_url: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(flatten)]
    pub auth: ApiAuthConfig,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub pagination: PaginationConfig,
    pub data_path: Option<String>,
    pub cursor_field: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    pub rate_limit: Option<ApiRateLimitConfig>,
    #[serde(default)]
    pub http_pool: HttpPoolConfig,
    #[serde(default)]
    pub async_pool: AsyncPoolConfig,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_max_concurrency() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    60
}
fn default_half_open_max_calls() -> u32 {
    1
}

impl ApiSourceOptions {
    fn parse(config: &BronzeConfig) -> Result<Self> {
        serde_json::from_value(config.options.clone()).map_err(|e| {
            PipelineError::config_ctx(
                format!("invalid api source options: {e}"),
                ErrorContext::with_system_entity(config.system.as_str(), config.entity.as_str()),
            )
        })
    }
}

/// Retryable per spec §4.5.1: connect/timeout errors, HTTP 429, HTTP 5xx.
fn is_retryable(error: &PipelineError) -> bool {
    match error {
        PipelineError::Connection { ctx, .. } => {
            let Some(status) = ctx.details.get("status") else {
                return true; // connect/timeout errors carry no status
            };
            status == "429" || status.starts_with('5')
        }
        _ => false,
    }
}

/// `Retry-After` (seconds) preempts the computed backoff delay.
fn delay_from_response(error: &PipelineError, _attempt: u32, default: Duration) -> Option<Duration> {
    if let PipelineError::Connection { ctx, .. } = error {
        if let Some(secs) = ctx.details.get("retry_after_secs") {
            if let Ok(secs) = secs.parse::<f64>() {
                return Some(Duration::from_secs_f64(secs));
            }
        }
    }
    Some(default)
}

pub struct ApiExtractor {
    breakers: BreakerRegistry,
}

impl ApiExtractor {
    pub fn new() -> Self {
        Self {
            breakers: BreakerRegistry::new(
                default_failure_threshold(),
                Duration::from_secs(default_cooldown_secs()),
                default_half_open_max_calls(),
            ),
        }
    }

    fn build_client(opts: &ApiSourceOptions) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(opts.timeout_seconds));
        if opts.is_async {
            builder = builder
                .pool_max_idle_per_host(opts.async_pool.max_keepalive_connections)
                .pool_idle_timeout(Duration::from_secs(opts.async_pool.keepalive_expiry_secs));
            if opts.async_pool.http2 {
                builder = builder.http2_prior_knowledge();
            }
        } else {
            builder = builder.pool_max_idle_per_host(opts.http_pool.pool_maxsize);
        }
        builder
            .build()
            .map_err(|e| PipelineError::Other(anyhow::anyhow!("building http client: {e}")))
    }

    fn retry_policy(opts: &ApiSourceOptions) -> RetryPolicy {
        RetryPolicy {
            max_attempts: opts.retry.max_attempts,
            base_delay: Duration::from_secs_f64(opts.retry.base_delay_secs),
            max_delay: Duration::from_secs_f64(opts.retry.max_delay_secs),
            backoff_multiplier: opts.retry.backoff_multiplier,
            jitter: opts.retry.jitter,
            retry_if: Box::new(is_retryable),
            delay_from_exception: Some(Box::new(delay_from_response)),
        }
    }
}

impl Default for ApiExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the record array from a decoded response body (spec §4.5.1 step
/// 4): prefer `data_path`, fall back to common keys, wrap a lone object as a
/// single-row list.
pub fn extract_records_from_body(body: &Json, data_path: Option<&str>) -> Vec<Record> {
    let located = data_path
        .and_then(|path| extract_dotted_path(body, path).cloned())
        .or_else(|| {
            COMMON_DATA_KEYS
                .iter()
                .find_map(|key| body.get(key).cloned())
        })
        .unwrap_or_else(|| body.clone());

    match located {
        Json::Array(items) => items.iter().map(json_value_to_record).collect(),
        Json::Object(_) => vec![json_value_to_record(&located)],
        _ => Vec::new(),
    }
}

fn json_value_to_record(value: &Json) -> Record {
    let mut record = Record::new();
    if let Json::Object(map) = value {
        for (k, v) in map {
            record.insert(k.clone(), json_scalar_to_value(v));
        }
    }
    record
}

fn json_scalar_to_value(v: &Json) -> Value {
    match v {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => Value::Str(s.clone()),
        other => Value::Str(other.to_string()),
    }
}

#[async_trait]
impl Extractor for ApiExtractor {
    async fn fetch_records(
        &self,
        config: &BronzeConfig,
        _run_date: &str,
        _prior_cursor: Option<&str>,
    ) -> Result<(Vec<Record>, Option<String>)> {
        let opts = ApiSourceOptions::parse(config)?;
        let client = Self::build_client(&opts)?;
        let auth = resolve_auth(&opts.auth)?;

        let mut headers = auth.headers.clone();
        for (k, v) in &opts.headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }

        let mut base_params = opts.params.clone();
        if let Some((param, value)) = &auth.query_param {
            base_params.insert(param.clone(), value.clone());
        }

        let rate_limiter = medallion_core::resilience::rate_limiter::resolve_rate_limit(
            opts.rate_limit.as_ref().and_then(|r| r.rps),
            opts.rate_limit.as_ref().and_then(|r| r.burst),
            None,
            Some("BRONZE_API_RPS"),
        )
        .map(|(rps, burst)| Arc::new(medallion_core::resilience::RateLimiter::new(rps, burst.map(|b| b as f64))));

        let component_key = format!("{}.{}", config.system, config.entity);
        let breaker = self.breakers.get_or_create(&component_key);
        let policy = Self::retry_policy(&opts);
        let url = format!("{}{}", opts.base_url.trim_end_matches('/'), opts.endpoint);

        let mut pagination = PaginationState::new(opts.pagination.clone(), base_params);
        let mut all_records: Vec<Record> = Vec::new();
        let mut max_cursor: Option<String> = None;

        loop {
            if let Some(limiter) = &rate_limiter {
                limiter.acquire_async().await;
            }

            let params = pagination.build_params();
            let url_ref = &url;
            let headers_ref = &headers;
            let basic_ref = &auth.basic;
            let client_ref = &client;
            let body = execute_with_resilience_async(
                &breaker,
                "api_extractor",
                Some(component_key.as_str()),
                &policy,
                || async {
                    let req = client_ref.get(url_ref.as_str()).headers(headers_ref.clone()).query(&params);
                    let req = if let Some((user, pass)) = basic_ref {
                        req.basic_auth(user, pass.as_deref())
                    } else {
                        req
                    };
                    let response = req.send().await.map_err(|e| PipelineError::Connection {
                        message: format!("request to {url_ref} failed: {e}"),
                        ctx: ErrorContext::new().detail("host", url_ref.clone()),
                    })?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(status_error(url_ref, status, response.headers()));
                    }
                    response.json::<Json>().await.map_err(|e| PipelineError::Connection {
                        message: format!("decoding json body from {url_ref} failed: {e}"),
                        ctx: ErrorContext::new().detail("host", url_ref.clone()),
                    })
                },
            )
            .await?;

            let records = extract_records_from_body(&body, opts.data_path.as_deref());
            let record_count = records.len();

            if let Some(cursor_field) = &opts.cursor_field {
                for record in &records {
                    if let Some(v) = record.get(cursor_field) {
                        let s = v.to_comparable_string();
                        if max_cursor.as_deref().map(|c| s.as_str() > c).unwrap_or(true) {
                            max_cursor = Some(s);
                        }
                    }
                }
            }

            all_records.extend(records);

            let should_continue = pagination.should_fetch_more() && pagination.on_records(record_count, &body);
            if !should_continue {
                break;
            }
        }

        Ok((all_records, max_cursor))
    }

    fn get_watermark_config(&self, config: &BronzeConfig) -> Option<WatermarkColumnConfig> {
        config.watermark_column.as_ref().map(|column| WatermarkColumnConfig {
            column: column.clone(),
            watermark_type: WatermarkType::String,
        })
    }
}

fn status_error(url: &str, status: StatusCode, headers: &reqwest::header::HeaderMap) -> PipelineError {
    let retry_after = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok());
    let mut ctx = ErrorContext::new().detail("host", url).detail("status", status.as_u16().to_string());
    if let Some(secs) = retry_after {
        ctx = ctx.detail("retry_after_secs", secs.to_string());
    }
    PipelineError::Connection {
        message: format!("request to {url} returned status {status}"),
        ctx,
    }
}

/// Bounded-concurrency convenience for issuing several independent GETs at
/// once (spec §9 design note: "only the individual GETs when issuing the
/// `get_many` convenience operation" — pagination itself is never
/// multiplexed this way).
pub async fn get_many(client: &reqwest::Client, urls: Vec<String>, max_concurrency: usize) -> Vec<Result<Json>> {
    use tokio::sync::Semaphore;
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let tasks: Vec<_> = urls
        .into_iter()
        .map(|url| {
            let client = client.clone();
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let response = client.get(url.as_str()).send().await.map_err(|e| PipelineError::Connection {
                    message: format!("request to {url} failed: {e}"),
                    ctx: ErrorContext::new().detail("host", url.clone()),
                })?;
                response.json::<Json>().await.map_err(|e| PipelineError::Connection {
                    message: format!("decoding json body from {url} failed: {e}"),
                    ctx: ErrorContext::new().detail("host", url),
                })
            })
        })
        .collect();

    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(task.await.unwrap_or_else(|e| {
            Err(PipelineError::Other(anyhow::anyhow!("get_many task panicked: {e}")))
        }));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_from_data_path() {
        let body = json!({"payload": {"rows": [{"id": 1}, {"id": 2}]}});
        let records = extract_records_from_body(&body, Some("payload.rows"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn falls_back_to_common_keys_in_order() {
        let body = json!({"data": [{"id": 1}]});
        let records = extract_records_from_body(&body, None);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn wraps_lone_object_as_single_row() {
        let body = json!({"id": 7, "name": "solo"});
        let records = extract_records_from_body(&body, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("id"), Some(&Value::Int(7)));
    }

    #[test]
    fn status_5xx_and_429_are_retryable_but_4xx_is_not() {
        let make = |status: u16| PipelineError::Connection {
            message: "x".into(),
            ctx: ErrorContext::new().detail("status", status.to_string()),
        };
        assert!(is_retryable(&make(503)));
        assert!(is_retryable(&make(429)));
        assert!(!is_retryable(&make(404)));
    }

    #[test]
    fn connect_error_with_no_status_is_retryable() {
        let err = PipelineError::Connection {
            message: "timed out".into(),
            ctx: ErrorContext::new(),
        };
        assert!(is_retryable(&err));
    }
}

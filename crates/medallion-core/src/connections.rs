//! Connection registry (spec §4.4): a process-wide, named map of live
//! database connections with `${VAR}`-expansion of credential fields.
//! Grounded on `pipelines/lib/connections.py`; the registry itself is
//! driver-agnostic (spec §1 scopes concrete drivers out), expressed as a
//! `DbConnection` trait object per design note §9 ("registry → typed map
//! with explicit lifecycle").

use crate::error::{ErrorContext, PipelineError};
use crate::record::Record;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Everything the registry needs to open a new connection. `host`/`database`
/// are plain values; `password_env`/`user_env` name environment variables
/// whose values are substituted at open time so that raw secrets never
/// appear inline in configuration (spec §4.4).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub driver: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user_env: Option<String>,
    pub password_env: Option<String>,
}

/// Expand a `${VAR}` token in `template` by looking it up in the process
/// environment. A bare value with no `${...}` wrapper passes through
/// unchanged.
pub fn expand_env_token(template: &str) -> Result<String, PipelineError> {
    if let Some(var_name) = template.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).map_err(|_| {
            PipelineError::Authentication {
                message: format!("environment variable `{var_name}` is not set"),
                ctx: ErrorContext::new().detail("var", var_name),
            }
        })
    } else {
        Ok(template.to_string())
    }
}

/// Resolve a `*_env` field (the name of an environment variable) to its
/// value. Missing variables are an authentication error at open time, not
/// at startup (spec §4.4).
pub fn resolve_env_var(name: &str) -> Result<String, PipelineError> {
    std::env::var(name).map_err(|_| {
        PipelineError::Authentication {
            message: format!("credential environment variable `{name}` is not set"),
            ctx: ErrorContext::new().detail("env_var", name),
        }
    })
}

/// Resolve `user_env`/`password_env` into their actual credential values.
/// Used by `medallion-extract`'s concrete adapters right before opening a
/// connection.
pub fn resolve_credentials(config: &ConnectionConfig) -> Result<(Option<String>, Option<String>), PipelineError> {
    let user = config.user_env.as_deref().map(resolve_env_var).transpose()?;
    let password = config.password_env.as_deref().map(resolve_env_var).transpose()?;
    Ok((user, password))
}

/// A live, queryable connection. `medallion-extract` provides the concrete
/// `rusqlite`-backed adapter; tests use `MockConnection`.
pub trait DbConnection: Send + Sync {
    fn query_rows(&self, sql: &str) -> Result<Vec<Record>, PipelineError>;
    fn close(&self) {}
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<String, Arc<dyn DbConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached connection for `name`, or open and cache a new one
    /// via `opener` (typically `medallion_extract::connections::open`).
    /// Serialized behind a single mutex (spec §5 "single-writer discipline"
    /// for registry map mutations).
    pub fn get_or_open<F>(&self, name: &str, opener: F) -> Result<Arc<dyn DbConnection>, PipelineError>
    where
        F: FnOnce() -> Result<Arc<dyn DbConnection>, PipelineError>,
    {
        let mut guard = self.inner.lock().expect("connection registry mutex poisoned");
        if let Some(conn) = guard.get(name) {
            return Ok(Arc::clone(conn));
        }
        let conn = opener()?;
        guard.insert(name.to_string(), Arc::clone(&conn));
        Ok(conn)
    }

    /// Best-effort close of a single named connection.
    pub fn close(&self, name: &str) {
        if let Some(conn) = self.inner.lock().expect("connection registry mutex poisoned").remove(name) {
            conn.close();
        }
    }

    /// Best-effort close-all, e.g. at process shutdown.
    pub fn close_all(&self) {
        let mut guard = self.inner.lock().expect("connection registry mutex poisoned");
        for (_, conn) in guard.drain() {
            conn.close();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("connection registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub struct MockConnection {
    pub rows: Vec<Record>,
}

#[cfg(test)]
impl DbConnection for MockConnection {
    fn query_rows(&self, _sql: &str) -> Result<Vec<Record>, PipelineError> {
        Ok(self.rows.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_open_caches_across_calls() {
        let registry = ConnectionRegistry::new();
        let opens = std::sync::atomic::AtomicUsize::new(0);

        let open = || -> Result<Arc<dyn DbConnection>, PipelineError> {
            opens.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Arc::new(MockConnection { rows: vec![] }))
        };

        registry.get_or_open("primary", open).unwrap();
        registry.get_or_open("primary", open).unwrap();
        assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn close_removes_from_registry() {
        let registry = ConnectionRegistry::new();
        registry
            .get_or_open("primary", || Ok(Arc::new(MockConnection { rows: vec![] })))
            .unwrap();
        assert_eq!(registry.len(), 1);
        registry.close("primary");
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_env_var_is_authentication_error() {
        let err = resolve_env_var("MEDALLION_TEST_DOES_NOT_EXIST_VAR").unwrap_err();
        assert!(matches!(err, PipelineError::Authentication { .. }));
    }

    #[test]
    fn expand_env_token_passes_through_plain_values() {
        assert_eq!(expand_env_token("literal-value").unwrap(), "literal-value");
    }
}

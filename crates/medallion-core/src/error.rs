//! Structured error taxonomy (spec §7). Every variant carries the context
//! fields the spec names so the runner can surface a domain error without
//! losing the underlying cause.

use std::collections::BTreeMap;
use thiserror::Error;

/// Free-form structured context attached to most error variants.
pub type Details = BTreeMap<String, String>;

#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub system: Option<String>,
    pub entity: Option<String>,
    pub details: Details,
    pub suggestion: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_entity(system: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            entity: Some(entity.into()),
            ..Default::default()
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.system.is_some() || self.entity.is_some() {
            write!(
                f,
                "[{}.{}]",
                self.system.as_deref().unwrap_or("?"),
                self.entity.as_deref().unwrap_or("?")
            )?;
        }
        for (k, v) in &self.details {
            write!(f, " {k}={v}")?;
        }
        if let Some(s) = &self.suggestion {
            write!(f, " (suggestion: {s})")?;
        }
        Ok(())
    }
}

/// One enumerated structural/cross-layer validation issue (spec §4.12).
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub is_warning: bool,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_warning { "warning" } else { "error" };
        write!(f, "[{kind}] {}: {}", self.path, self.message)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("bronze extraction failed{ctx}: {message}")]
    BronzeExtraction {
        message: String,
        ctx: ErrorContext,
        #[source]
        cause: Option<Box<PipelineError>>,
    },

    #[error("silver curation failed{ctx}: {message}")]
    SilverCuration {
        message: String,
        ctx: ErrorContext,
        #[source]
        cause: Option<Box<PipelineError>>,
    },

    #[error("connection failed{ctx}: {message}")]
    Connection { message: String, ctx: ErrorContext },

    #[error("authentication failed{ctx}: {message}")]
    Authentication { message: String, ctx: ErrorContext },

    #[error("configuration error{ctx}: {message}")]
    Configuration { message: String, ctx: ErrorContext },

    #[error("validation failed with {} issue(s)", .issues.len())]
    Validation { issues: Vec<ValidationIssue> },

    #[error("checksum mismatch{ctx}: {message}")]
    Checksum { message: String, ctx: ErrorContext },

    #[error("source not found{ctx}: {message}")]
    SourceNotFound { message: String, ctx: ErrorContext },

    #[error("retry exhausted after {attempts} attempt(s){ctx}")]
    RetryExhausted {
        attempts: u32,
        ctx: ErrorContext,
        #[source]
        cause: Box<PipelineError>,
    },

    #[error("circuit open for component `{component}`{breaker_key}")]
    CircuitOpen {
        component: String,
        breaker_key: DisplayOpt,
    },

    #[error("late data rejected{ctx}: {message}")]
    LateData { message: String, ctx: ErrorContext },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("other: {0}")]
    Other(#[from] anyhow::Error),
}

/// Tiny helper so `Option<String>` renders as `(on <key>)` or nothing in a
/// `#[error(...)]` format string without allocating a formatter impl per
/// variant.
#[derive(Debug)]
pub struct DisplayOpt(pub Option<String>);

impl std::fmt::Display for DisplayOpt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(k) => write!(f, " (breaker_key={k})"),
            None => Ok(()),
        }
    }
}

impl PipelineError {
    pub fn bronze(message: impl Into<String>, ctx: ErrorContext) -> Self {
        PipelineError::BronzeExtraction {
            message: message.into(),
            ctx,
            cause: None,
        }
    }

    pub fn bronze_caused(
        message: impl Into<String>,
        ctx: ErrorContext,
        cause: PipelineError,
    ) -> Self {
        PipelineError::BronzeExtraction {
            message: message.into(),
            ctx,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn silver(message: impl Into<String>, ctx: ErrorContext) -> Self {
        PipelineError::SilverCuration {
            message: message.into(),
            ctx,
            cause: None,
        }
    }

    pub fn silver_caused(message: impl Into<String>, ctx: ErrorContext, cause: PipelineError) -> Self {
        PipelineError::SilverCuration {
            message: message.into(),
            ctx,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
            ctx: ErrorContext::new(),
        }
    }

    pub fn config_ctx(message: impl Into<String>, ctx: ErrorContext) -> Self {
        PipelineError::Configuration {
            message: message.into(),
            ctx,
        }
    }

    pub fn retry_exhausted(attempts: u32, ctx: ErrorContext, cause: PipelineError) -> Self {
        PipelineError::RetryExhausted {
            attempts,
            ctx,
            cause: Box::new(cause),
        }
    }

    pub fn circuit_open(component: impl Into<String>, breaker_key: Option<&str>) -> Self {
        PipelineError::CircuitOpen {
            component: component.into(),
            breaker_key: DisplayOpt(breaker_key.map(|s| s.to_string())),
        }
    }

    /// True for errors that the resilience envelope should treat as
    /// terminal rather than retry further (breaker-open never retries in
    /// the same call, per spec §7 Recovery policy).
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PipelineError::CircuitOpen { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

//! HTTP auth resolution for the API extractor (SPEC_FULL §4.5.6). Grounded
//! on `core/infrastructure/io/http/auth.py`: four auth types, each reading
//! its credential from an environment variable named in the source config
//! rather than carrying a raw secret inline.

use medallion_core::connections::resolve_env_var;
use medallion_core::error::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Bearer,
    ApiKey,
    Basic,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiAuthConfig {
    #[serde(default)]
    pub auth_type: AuthType,
    pub auth_token_env: Option<String>,
    pub auth_key_env: Option<String>,
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    pub auth_key_param: Option<String>,
    pub auth_user_env: Option<String>,
    pub auth_pass_env: Option<String>,
}

fn default_auth_header() -> String {
    "X-API-Key".to_string()
}

/// The resolved product of [`ApiAuthConfig`]: headers to merge into every
/// request, an optional basic-auth `(user, pass)` tuple, and an optional
/// `(param, value)` pair when `api_key` is configured to ride as a query
/// parameter instead of a header.
#[derive(Debug, Default)]
pub struct ResolvedAuth {
    pub headers: HeaderMap,
    pub basic: Option<(String, Option<String>)>,
    pub query_param: Option<(String, String)>,
}

/// Resolve credentials at request-build time, not at startup — a source may
/// be configured but never invoked in a given run (SPEC_FULL §4.5.6).
pub fn resolve_auth(auth: &ApiAuthConfig) -> Result<ResolvedAuth> {
    let mut resolved = ResolvedAuth::default();
    match auth.auth_type {
        AuthType::None => {}
        AuthType::Bearer => {
            let token_env = auth.auth_token_env.as_deref().unwrap_or("API_TOKEN");
            let token = resolve_env_var(token_env)?;
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| anyhow::anyhow!("invalid bearer token header value: {e}"))?;
            resolved.headers.insert(AUTHORIZATION, value);
        }
        AuthType::ApiKey => {
            let key_env = auth.auth_key_env.as_deref().unwrap_or("API_KEY");
            let key = resolve_env_var(key_env)?;
            if let Some(param) = &auth.auth_key_param {
                resolved.query_param = Some((param.clone(), key));
            } else {
                let header_name = HeaderName::from_bytes(auth.auth_header.as_bytes())
                    .map_err(|e| anyhow::anyhow!("invalid api key header name: {e}"))?;
                let value = HeaderValue::from_str(&key)
                    .map_err(|e| anyhow::anyhow!("invalid api key header value: {e}"))?;
                resolved.headers.insert(header_name, value);
            }
        }
        AuthType::Basic => {
            let user_env = auth.auth_user_env.as_deref().unwrap_or("API_USER");
            let pass_env = auth.auth_pass_env.as_deref();
            let user = resolve_env_var(user_env)?;
            let pass = pass_env.map(resolve_env_var).transpose()?;
            resolved.basic = Some((user, pass));
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_auth_resolves_to_empty() {
        let resolved = resolve_auth(&ApiAuthConfig::default()).unwrap();
        assert!(resolved.headers.is_empty());
        assert!(resolved.basic.is_none());
        assert!(resolved.query_param.is_none());
    }

    #[test]
    fn bearer_reads_token_from_named_env_var() {
        std::env::set_var("MEDALLION_TEST_BEARER_TOKEN", "s3cr3t");
        let auth = ApiAuthConfig {
            auth_type: AuthType::Bearer,
            auth_token_env: Some("MEDALLION_TEST_BEARER_TOKEN".to_string()),
            ..Default::default()
        };
        let resolved = resolve_auth(&auth).unwrap();
        assert_eq!(
            resolved.headers.get(AUTHORIZATION).unwrap(),
            "Bearer s3cr3t"
        );
        std::env::remove_var("MEDALLION_TEST_BEARER_TOKEN");
    }

    #[test]
    fn api_key_as_query_param_when_configured() {
        std::env::set_var("MEDALLION_TEST_API_KEY", "abc123");
        let auth = ApiAuthConfig {
            auth_type: AuthType::ApiKey,
            auth_key_env: Some("MEDALLION_TEST_API_KEY".to_string()),
            auth_key_param: Some("api_key".to_string()),
            ..Default::default()
        };
        let resolved = resolve_auth(&auth).unwrap();
        assert_eq!(resolved.query_param, Some(("api_key".to_string(), "abc123".to_string())));
        std::env::remove_var("MEDALLION_TEST_API_KEY");
    }

    #[test]
    fn missing_env_var_is_authentication_error() {
        let auth = ApiAuthConfig {
            auth_type: AuthType::Bearer,
            auth_token_env: Some("MEDALLION_TEST_DOES_NOT_EXIST".to_string()),
            ..Default::default()
        };
        let err = resolve_auth(&auth).unwrap_err();
        assert!(matches!(err, medallion_core::error::PipelineError::Authentication { .. }));
    }
}

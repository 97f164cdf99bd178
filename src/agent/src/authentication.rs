//! HTTP Basic authentication of operator and executor requests.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::HeaderMap;

use a3s_agent_core::config::Credential;

use crate::error::ApiError;

/// Checks `Authorization: Basic` credentials against a static list.
///
/// When disabled every request is anonymous and accepted.
#[derive(Debug, Clone, Default)]
pub struct BasicAuthenticator {
    credentials: Option<HashMap<String, String>>,
}

impl BasicAuthenticator {
    pub fn new(credentials: &[Credential]) -> Self {
        Self {
            credentials: Some(
                credentials
                    .iter()
                    .map(|c| (c.principal.clone(), c.secret.clone()))
                    .collect(),
            ),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// The authenticated principal, `None` for anonymous requests.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Option<String>, ApiError> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };

        let header = headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::Unauthorized("Missing 'Authorization' header".to_string()))?
            .to_str()
            .map_err(|_| ApiError::Unauthorized("Malformed 'Authorization' header".to_string()))?;

        let encoded = header
            .strip_prefix("Basic ")
            .ok_or_else(|| ApiError::Unauthorized("Expecting Basic authentication".to_string()))?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| ApiError::Unauthorized("Malformed Basic credentials".to_string()))?;
        let (principal, secret) = decoded
            .split_once(':')
            .ok_or_else(|| ApiError::Unauthorized("Malformed Basic credentials".to_string()))?;

        match credentials.get(principal) {
            Some(expected) if expected == secret => Ok(Some(principal.to_string())),
            _ => {
                tracing::debug!(principal, "Rejected HTTP credentials");
                Err(ApiError::Unauthorized("Authentication failed".to_string()))
            }
        }
    }
}

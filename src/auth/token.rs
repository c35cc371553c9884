//! Access token model and token response parsing
//!
//! Value types for the bearer token produced by the identity provider and
//! the resource scope it is valid for.

use crate::error::{KeywardenError, Result};
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// A bearer access token and its absolute expiry time.
///
/// Immutable once constructed; a refresh replaces the token wholesale.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new<S: Into<String>>(token: S, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    /// True if the token expires within the next `slack` interval.
    pub fn expires_within(&self, slack: Duration) -> bool {
        Utc::now() + slack >= self.expires_at
    }
}

// The token value never appears in Debug output.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The target resource/audience a token must be valid for,
/// e.g. `https://vault.azure.net`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope(String);

impl ResourceScope {
    pub fn new<S: Into<String>>(resource: S) -> Self {
        Self(resource.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scope parameter for the v2.0 token endpoint. The client-credentials
    /// grant requires the `/.default` suffix.
    pub fn as_scope(&self) -> String {
        if self.0.ends_with("/.default") {
            self.0.clone()
        } else {
            format!("{}/.default", self.0.trim_end_matches('/'))
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceScope {
    fn from(resource: &str) -> Self {
        Self::new(resource)
    }
}

/// Parse a token endpoint response body into an [`AccessToken`].
///
/// The expiry is computed from the response's `expires_in` duration plus
/// the time the response was received. A malformed body or a missing field
/// is a protocol error, distinct from an authentication rejection.
pub(crate) fn parse_token_response(
    body: &str,
    received_at: DateTime<Utc>,
) -> Result<AccessToken> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| KeywardenError::protocol(format!("Malformed token response: {}", e)))?;

    let token = value
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            KeywardenError::protocol("Token response is missing the access_token field")
        })?;

    let expires_in = value
        .get("expires_in")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| {
            KeywardenError::protocol("Token response is missing the expires_in field")
        })?;

    Ok(AccessToken::new(
        token,
        received_at + Duration::seconds(expires_in as i64),
    ))
}

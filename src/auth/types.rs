// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a token's expiration instant came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationSource {
    /// Explicit expiration field in the identity response
    ServerDeclared,
    /// `exp` claim decoded from the token payload
    Claim,
    /// No claim present; a fixed validity window was assumed
    Fallback,
}

/// A bearer token together with the instant it stops being valid
///
/// Tokens are immutable. A refresh produces a new `Token` rather than
/// updating an existing one.
#[derive(Clone, PartialEq)]
pub struct Token {
    value: String,
    expiration: DateTime<Utc>,
    source: ExpirationSource,
}

impl Token {
    pub fn new(value: String, expiration: DateTime<Utc>, source: ExpirationSource) -> Self {
        Self {
            value,
            expiration,
            source,
        }
    }

    /// The credential presented in the `Authorization: Bearer` header
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    pub fn source(&self) -> ExpirationSource {
        self.source
    }

    /// True iff `now` is at or past the expiration instant
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration
    }

    /// Check expiry against the current wall clock, sampled once
    pub fn is_expired(&self) -> bool {
        self.expired_at(Utc::now())
    }

    /// Remaining lifetime, zero once expired
    pub fn expires_in(&self, now: DateTime<Utc>) -> Duration {
        (self.expiration - now).max(Duration::zero())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[censored]")
            .field("expiration", &self.expiration)
            .field("source", &self.source)
            .finish()
    }
}

/// IAM token response
#[derive(Deserialize)]
pub struct IamTokenResponse {
    #[serde(default)]
    pub access_token: String,
    /// Seconds since the Unix epoch; required
    pub expiration: i64,
}

/// IAM error response
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IamErrorResponse {
    pub error_message: Option<String>,
}

/// CPD authorize request
#[derive(Serialize)]
pub struct CpdAuthRequest<'a> {
    pub username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<&'a str>,
}

/// CPD authorize response; `exception` is only present on failure
#[derive(Deserialize, Default)]
pub struct CpdAuthResponse {
    #[serde(default)]
    pub token: String,
    pub exception: Option<String>,
}

// Token expiration inference from a compact signed-token payload
//
// Only the `exp` claim is read. Signatures are not verified.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use super::types::ExpirationSource;
use crate::error::{AuthError, Result};

/// Validity assumed for tokens that carry no `exp` claim.
/// This is a refresh policy, not something the server promises.
pub const FALLBACK_VALIDITY_HOURS: i64 = 12;

/// Infer when `token` expires, using the current time for the fallback window
pub fn extract_expiration(token: &str) -> Result<(DateTime<Utc>, ExpirationSource)> {
    extract_expiration_at(token, Utc::now())
}

/// Infer when `token` expires relative to `now`
///
/// Decoding or parsing failures are hard errors. A missing or zero `exp` is not:
/// the token is given [`FALLBACK_VALIDITY_HOURS`] from `now`.
pub fn extract_expiration_at(
    token: &str,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, ExpirationSource)> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::MalformedToken("token has no payload segment".to_string()))?;

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    let claims: Map<String, Value> = serde_json::from_slice(&decoded)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not a claims object: {}", e)))?;

    let exp = match claims.get("exp") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(other) => {
            return Err(AuthError::MalformedToken(format!(
                "exp claim is not a number: {}",
                other
            )))
        }
    };

    match exp {
        Some(exp) if exp != 0.0 => Ok((timestamp_from_secs(exp)?, ExpirationSource::Claim)),
        _ => {
            tracing::debug!(
                "Token carries no exp claim, assuming {}h validity",
                FALLBACK_VALIDITY_HOURS
            );
            Ok((
                now + Duration::hours(FALLBACK_VALIDITY_HOURS),
                ExpirationSource::Fallback,
            ))
        }
    }
}

/// Convert fractional epoch seconds, keeping nanosecond precision
fn timestamp_from_secs(exp: f64) -> Result<DateTime<Utc>> {
    if !exp.is_finite() {
        return Err(AuthError::MalformedToken(format!("exp claim is not finite: {}", exp)));
    }

    let whole = exp.floor();
    let secs = whole as i64;
    let nanos = (((exp - whole) * 1_000_000_000.0) as u32).min(999_999_999);

    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| AuthError::MalformedToken(format!("exp claim out of range: {}", exp)))
}

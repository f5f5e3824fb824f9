// Cloud Pak for Data authenticator: username plus password or API key

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Request};
use std::fmt;
use std::sync::Arc;

use super::expiry::extract_expiration;
use super::types::{CpdAuthRequest, CpdAuthResponse, Token};
use super::Authenticator;
use crate::error::{AuthError, Result};
use crate::http_client::{endpoint_url, HttpTransport};

pub const CPD_AUTHORIZE_PATH: &str = "/icp4d-api/v1/authorize";

/// Trades CPD user credentials for a bearer token
///
/// The authorize endpoint does not report an expiry, so it is read from the
/// token's own `exp` claim.
pub struct CpdAuthenticator {
    transport: Arc<dyn HttpTransport>,
    cpd_host: String,
    username: String,
    password: Option<String>,
    api_key: Option<String>,
}

impl CpdAuthenticator {
    /// Empty `password`/`api_key` strings count as unset. Supplying both is
    /// rejected; supplying neither is left for the server to refuse.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cpd_host: impl Into<String>,
        username: impl Into<String>,
        password: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let cpd_host = cpd_host.into();
        let username = username.into();
        let password = password.filter(|p| !p.is_empty());
        let api_key = api_key.filter(|k| !k.is_empty());

        if password.is_some() && api_key.is_some() {
            return Err(AuthError::InvalidConfiguration(
                "CPD password and API key must not both be set".to_string(),
            ));
        }
        if cpd_host.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "CPD host must not be empty".to_string(),
            ));
        }
        if username.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "CPD username must not be empty".to_string(),
            ));
        }

        Ok(Self {
            transport,
            cpd_host,
            username,
            password,
            api_key,
        })
    }

    pub fn cpd_host(&self) -> &str {
        &self.cpd_host
    }

    fn build_request(&self) -> Result<Request> {
        let url = endpoint_url(&self.cpd_host, CPD_AUTHORIZE_PATH)?;

        let payload = CpdAuthRequest {
            username: &self.username,
            password: self.password.as_deref(),
            api_key: self.api_key.as_deref(),
        };
        let body = serde_json::to_vec(&payload).map_err(|e| {
            AuthError::InvalidConfiguration(format!("failed to encode CPD request: {}", e))
        })?;

        let mut request = Request::new(Method::POST, url);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(body.into());
        Ok(request)
    }
}

#[async_trait]
impl Authenticator for CpdAuthenticator {
    async fn generate_token(&self) -> Result<Token> {
        tracing::debug!(
            cpd_host = %self.cpd_host,
            username = %self.username,
            "Requesting CPD token"
        );

        let request = self.build_request()?;
        let response = self.transport.execute(request).await?;

        if !response.status.is_success() {
            let message = serde_json::from_slice::<CpdAuthResponse>(&response.body)
                .ok()
                .and_then(|r| r.exception)
                .unwrap_or_else(|| response.text());
            tracing::error!(
                status = response.status.as_u16(),
                "CPD authorize request failed: {}",
                message
            );
            return Err(AuthError::AuthenticationFailed {
                status: response.status.as_u16(),
                message,
            });
        }

        let data: CpdAuthResponse = serde_json::from_slice(&response.body).map_err(|e| {
            AuthError::MalformedResponse(format!("failed to parse CPD authorize response: {}", e))
        })?;

        if data.token.is_empty() {
            return Err(AuthError::MalformedResponse(
                "CPD response does not contain token".to_string(),
            ));
        }

        let (expiration, source) = extract_expiration(&data.token)?;

        tracing::info!(
            "CPD token issued, expires: {} ({:?})",
            expiration.to_rfc3339(),
            source
        );

        Ok(Token::new(data.token, expiration, source))
    }
}

impl fmt::Debug for CpdAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpdAuthenticator")
            .field("cpd_host", &self.cpd_host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[censored]"))
            .field("api_key", &self.api_key.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

// IBM Cloud IAM authenticator: API key exchange

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Request};
use std::fmt;
use std::sync::Arc;

use super::types::{ExpirationSource, IamErrorResponse, IamTokenResponse, Token};
use super::Authenticator;
use crate::error::{AuthError, Result};
use crate::http_client::{endpoint_url, HttpTransport};

pub const IAM_TOKEN_PATH: &str = "/identity/token";
pub const DEFAULT_IAM_HOST: &str = "iam.cloud.ibm.com";

const API_KEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Trades an API key for a bearer token whose expiry the server declares
pub struct IamAuthenticator {
    transport: Arc<dyn HttpTransport>,
    api_key: String,
    iam_host: String,
}

impl IamAuthenticator {
    /// `iam_host` falls back to [`DEFAULT_IAM_HOST`] when `None` or empty
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_key: impl Into<String>,
        iam_host: Option<&str>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "IAM API key must not be empty".to_string(),
            ));
        }

        let iam_host = iam_host
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_IAM_HOST)
            .to_string();

        Ok(Self {
            transport,
            api_key,
            iam_host,
        })
    }

    pub fn iam_host(&self) -> &str {
        &self.iam_host
    }

    fn build_request(&self) -> Result<Request> {
        let url = endpoint_url(&self.iam_host, IAM_TOKEN_PATH)?;

        let form = [
            ("grant_type", API_KEY_GRANT_TYPE),
            ("apikey", self.api_key.as_str()),
        ];
        let body = encode_form(&form);

        let mut request = Request::new(Method::POST, url);
        request.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        *request.body_mut() = Some(body.into());
        Ok(request)
    }
}

fn encode_form(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[async_trait]
impl Authenticator for IamAuthenticator {
    async fn generate_token(&self) -> Result<Token> {
        tracing::debug!(iam_host = %self.iam_host, "Requesting IAM token");

        let request = self.build_request()?;
        let response = self.transport.execute(request).await?;

        if !response.status.is_success() {
            let message = serde_json::from_slice::<IamErrorResponse>(&response.body)
                .ok()
                .and_then(|e| e.error_message)
                .unwrap_or_else(|| response.text());
            tracing::error!(
                status = response.status.as_u16(),
                "IAM token request failed: {}",
                message
            );
            return Err(AuthError::AuthenticationFailed {
                status: response.status.as_u16(),
                message,
            });
        }

        let data: IamTokenResponse = serde_json::from_slice(&response.body).map_err(|e| {
            AuthError::MalformedResponse(format!("failed to parse IAM token response: {}", e))
        })?;

        if data.access_token.is_empty() {
            return Err(AuthError::MalformedResponse(
                "IAM response does not contain access_token".to_string(),
            ));
        }

        if data.expiration <= 0 {
            return Err(AuthError::MalformedResponse(format!(
                "IAM response carries no usable expiration: {}",
                data.expiration
            )));
        }

        let expiration = DateTime::from_timestamp(data.expiration, 0).ok_or_else(|| {
            AuthError::MalformedResponse(format!(
                "IAM expiration out of range: {}",
                data.expiration
            ))
        })?;

        tracing::info!("IAM token issued, expires: {}", expiration.to_rfc3339());

        Ok(Token::new(
            data.access_token,
            expiration,
            ExpirationSource::ServerDeclared,
        ))
    }
}

impl fmt::Debug for IamAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamAuthenticator")
            .field("api_key", &"[censored]")
            .field("iam_host", &self.iam_host)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{ReqwestTransport, TransportConfig};
    use chrono::Utc;
    use mockito::Matcher;

    fn transport() -> Arc<dyn HttpTransport> {
        Arc::new(ReqwestTransport::new(TransportConfig::default()).unwrap())
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let err = IamAuthenticator::new(transport(), "", None).unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_default_host() {
        let auth = IamAuthenticator::new(transport(), "key", None).unwrap();
        assert_eq!(auth.iam_host(), DEFAULT_IAM_HOST);

        let auth = IamAuthenticator::new(transport(), "key", Some("")).unwrap();
        assert_eq!(auth.iam_host(), DEFAULT_IAM_HOST);

        let auth = IamAuthenticator::new(transport(), "key", Some("iam.test.cloud.ibm.com")).unwrap();
        assert_eq!(auth.iam_host(), "iam.test.cloud.ibm.com");
    }

    #[test]
    fn test_debug_censors_api_key() {
        let auth = IamAuthenticator::new(transport(), "super-secret-key", None).unwrap();
        let got = format!("{auth:?}");
        assert!(!got.contains("super-secret-key"), "{got}");
    }

    #[test]
    fn test_form_encoding() {
        let body = encode_form(&[("grant_type", API_KEY_GRANT_TYPE), ("apikey", "a b&c")]);
        assert_eq!(
            body,
            "grant_type=urn%3Aibm%3Aparams%3Aoauth%3Agrant-type%3Aapikey&apikey=a+b%26c"
        );
    }

    #[tokio::test]
    async fn test_generate_token_success() {
        let mut server = mockito::Server::new_async().await;
        let expiration = Utc::now().timestamp() + 3600;
        let mock = server
            .mock("POST", IAM_TOKEN_PATH)
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), API_KEY_GRANT_TYPE.into()),
                Matcher::UrlEncoded("apikey".into(), "my-key".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"access_token":"iam-bearer","refresh_token":"not_supported","token_type":"Bearer","expires_in":3600,"expiration":{}}}"#,
                expiration
            ))
            .expect(1)
            .create_async()
            .await;

        let auth = IamAuthenticator::new(transport(), "my-key", Some(server.url().as_str())).unwrap();
        let token = auth.generate_token().await.unwrap();

        assert_eq!(token.value(), "iam-bearer");
        assert_eq!(token.expiration().timestamp(), expiration);
        assert_eq!(token.source(), ExpirationSource::ServerDeclared);
        assert!(!token.is_expired());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_token_failure_carries_error_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", IAM_TOKEN_PATH)
            .with_status(400)
            .with_body(
                r#"{"errorCode":"BXNIM0415E","errorMessage":"Provided API key could not be found."}"#,
            )
            .create_async()
            .await;

        let auth = IamAuthenticator::new(transport(), "bad-key", Some(server.url().as_str())).unwrap();
        let err = auth.generate_token().await.unwrap_err();

        assert_eq!(
            err,
            AuthError::AuthenticationFailed {
                status: 400,
                message: "Provided API key could not be found.".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_generate_token_failure_with_plain_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", IAM_TOKEN_PATH)
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let auth = IamAuthenticator::new(transport(), "key", Some(server.url().as_str())).unwrap();
        let err = auth.generate_token().await.unwrap_err();

        assert_eq!(
            err,
            AuthError::AuthenticationFailed {
                status: 503,
                message: "upstream unavailable".to_string(),
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_generate_token_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", IAM_TOKEN_PATH)
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let auth = IamAuthenticator::new(transport(), "key", Some(server.url().as_str())).unwrap();
        let err = auth.generate_token().await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_generate_token_missing_access_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", IAM_TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"expiration":1761929596}"#)
            .create_async()
            .await;

        let auth = IamAuthenticator::new(transport(), "key", Some(server.url().as_str())).unwrap();
        let err = auth.generate_token().await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_generate_token_missing_expiration() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", IAM_TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;

        let auth = IamAuthenticator::new(transport(), "key", Some(server.url().as_str())).unwrap();
        let err = auth.generate_token().await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_generate_token_zero_expiration() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", IAM_TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token":"tok","expiration":0}"#)
            .create_async()
            .await;

        let auth = IamAuthenticator::new(transport(), "key", Some(server.url().as_str())).unwrap();
        let err = auth.generate_token().await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)), "{err:?}");
    }
}

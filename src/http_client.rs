use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Request, StatusCode, Url};
use std::fmt;
use std::time::Duration;

use crate::error::{AuthError, TransportError};

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Body decoded as UTF-8, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outbound HTTP capability injected into authenticators
///
/// Implementations own pooling, TLS and retry policy. Both methods must
/// return the response with its body already read.
#[async_trait]
pub trait HttpTransport: fmt::Debug + Send + Sync {
    /// Send the request once
    async fn execute(&self, request: Request) -> Result<HttpResponse, TransportError>;

    /// Send the request, retrying transient failures
    async fn execute_with_retry(&self, request: Request) -> Result<HttpResponse, TransportError>;
}

/// Settings for [`ReqwestTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// HTTP transport backed by a pooled reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    max_retries: u32,
    base_delay_ms: u64,
    request_timeout: Duration,
}

/// Upper bound on a single backoff sleep, before jitter
const MAX_BACKOFF_DELAY_MS: u64 = 30_000;

impl ReqwestTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_connections)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay.as_millis() as u64,
            request_timeout: config.request_timeout,
        })
    }

    async fn execute_internal(
        &self,
        request: Request,
        enable_retry: bool,
    ) -> Result<HttpResponse, TransportError> {
        let max_retries = if enable_retry { self.max_retries } else { 0 };
        let mut attempt = 0;

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "Sending HTTP request");

        loop {
            // Only the last attempt may consume the original request
            let req = if attempt < max_retries {
                request.try_clone().ok_or_else(|| {
                    TransportError::Request("request body is not cloneable".to_string())
                })?
            } else {
                return self.finish(request, attempt, &url).await;
            };

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();
                    if is_retryable_status(status) {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            "Received {}, retrying after {}ms (attempt {}/{})",
                            status,
                            delay,
                            attempt + 1,
                            max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    return read_response(response, self.request_timeout).await;
                }
                Err(e) => {
                    let delay = self.calculate_backoff_delay(attempt);
                    tracing::warn!(
                        error = %e,
                        url = %url,
                        "Request failed, retrying after {}ms (attempt {}/{})",
                        delay,
                        attempt + 1,
                        max_retries
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn finish(
        &self,
        request: Request,
        attempt: u32,
        url: &Url,
    ) -> Result<HttpResponse, TransportError> {
        match self.client.execute(request).await {
            Ok(response) => {
                let response = read_response(response, self.request_timeout).await?;
                tracing::debug!(status = %response.status, "Received HTTP response");
                Ok(response)
            }
            Err(e) => {
                let err = TransportError::from_reqwest(e, self.request_timeout);
                tracing::error!(
                    error = %err,
                    url = %url,
                    total_attempts = attempt + 1,
                    "HTTP request failed"
                );
                Err(err)
            }
        }
    }

    /// Exponential backoff: base_delay * 2^attempt, capped, plus up to 10% jitter
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let delay = 2_u64
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay_ms.checked_mul(factor))
            .unwrap_or(u64::MAX)
            .min(MAX_BACKOFF_DELAY_MS);
        let jitter = (delay as f64 * 0.1 * rand::random::<f64>()) as u64;
        delay + jitter
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<HttpResponse, TransportError> {
        self.execute_internal(request, false).await
    }

    async fn execute_with_retry(&self, request: Request) -> Result<HttpResponse, TransportError> {
        self.execute_internal(request, true).await
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn read_response(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<HttpResponse, TransportError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| TransportError::from_reqwest(e, timeout))?;
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Join a host and path into an absolute URL
///
/// Bare hosts get the `https` scheme. A host that already names its scheme
/// is used as the base as-is.
pub fn endpoint_url(host: &str, path: &str) -> Result<Url, AuthError> {
    let base = if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    };
    let raw = format!("{}{}", base, path);
    Url::parse(&raw)
        .map_err(|e| AuthError::InvalidConfiguration(format!("invalid host '{}': {}", host, e)))
}

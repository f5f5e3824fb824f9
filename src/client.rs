// Client composition root
// Validates resolved options, selects the credential backend and owns the token slot

use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    Authenticator, CpdAuthenticator, IamAuthenticator, Token, TokenManager,
    DEFAULT_REFRESH_TIMEOUT,
};
use crate::error::{AuthError, Result};
use crate::http_client::{endpoint_url, HttpTransport};

pub const DEFAULT_REGION: &str = US_SOUTH;
pub const DEFAULT_API_VERSION: &str = "2024-05-20";

pub const US_SOUTH: &str = "us-south";
pub const DALLAS: &str = US_SOUTH;
pub const EU_DE: &str = "eu-de";
pub const FRANKFURT: &str = EU_DE;
pub const JP_TOK: &str = "jp-tok";
pub const TOKYO: &str = JP_TOK;

/// Public watsonx.ai API host for a region
pub fn region_host(region: &str) -> String {
    format!("{}.ml.cloud.ibm.com", region)
}

/// Resource scope that API calls are billed against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Project(String),
    Space(String),
}

impl Scope {
    pub fn id(&self) -> &str {
        match self {
            Scope::Project(id) | Scope::Space(id) => id,
        }
    }
}

/// Already-resolved client settings
///
/// Empty strings are treated the same as `None`.
#[derive(Clone, Default)]
pub struct ClientOptions {
    pub url: Option<String>,
    pub iam_host: Option<String>,
    pub region: Option<String>,
    pub api_version: Option<String>,

    pub api_key: Option<String>,

    pub cpd_host: Option<String>,
    pub cpd_username: Option<String>,
    pub cpd_password: Option<String>,
    pub cpd_api_key: Option<String>,

    pub project_id: Option<String>,
    pub space_id: Option<String>,

    pub refresh_timeout: Option<Duration>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_iam(mut self, iam_host: impl Into<String>) -> Self {
        self.iam_host = Some(iam_host.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_cpd(mut self, cpd_host: impl Into<String>, username: impl Into<String>) -> Self {
        self.cpd_host = Some(cpd_host.into());
        self.cpd_username = Some(username.into());
        self
    }

    pub fn with_cpd_password(mut self, password: impl Into<String>) -> Self {
        self.cpd_password = Some(password.into());
        self
    }

    pub fn with_cpd_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.cpd_api_key = Some(api_key.into());
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_space_id(mut self, space_id: impl Into<String>) -> Self {
        self.space_id = Some(space_id.into());
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    /// Resolve the project/space scope; exactly one must be set
    pub fn scope(&self) -> Result<Scope> {
        match (non_empty(&self.project_id), non_empty(&self.space_id)) {
            (Some(project), None) => Ok(Scope::Project(project.to_string())),
            (None, Some(space)) => Ok(Scope::Space(space.to_string())),
            (None, None) => Err(AuthError::InvalidConfiguration(
                "no watsonx project ID or space ID provided".to_string(),
            )),
            (Some(_), Some(_)) => Err(AuthError::InvalidConfiguration(
                "either project ID or space ID should be provided, not both".to_string(),
            )),
        }
    }

    /// Build the authenticator for whichever credential path is selected
    pub fn authenticator(&self, transport: Arc<dyn HttpTransport>) -> Result<Arc<dyn Authenticator>> {
        let api_key = non_empty(&self.api_key);
        let cpd_password = non_empty(&self.cpd_password);
        let cpd_api_key = non_empty(&self.cpd_api_key);

        match non_empty(&self.cpd_host) {
            Some(cpd_host) => {
                if api_key.is_some() {
                    return Err(AuthError::InvalidConfiguration(
                        "IAM API key and CPD host must not both be set".to_string(),
                    ));
                }
                if cpd_password.is_none() && cpd_api_key.is_none() {
                    return Err(AuthError::InvalidConfiguration(
                        "no CPD password or API key provided".to_string(),
                    ));
                }
                let username = non_empty(&self.cpd_username).unwrap_or_default();
                let auth = CpdAuthenticator::new(
                    transport,
                    cpd_host,
                    username,
                    cpd_password.map(str::to_string),
                    cpd_api_key.map(str::to_string),
                )?;
                Ok(Arc::new(auth))
            }
            None => {
                let api_key = api_key.ok_or_else(|| {
                    AuthError::InvalidConfiguration("no API key or password provided".to_string())
                })?;
                let auth = IamAuthenticator::new(transport, api_key, non_empty(&self.iam_host))?;
                Ok(Arc::new(auth))
            }
        }
    }

    /// API host: explicit url, else the CPD host, else the regional host
    pub fn base_url(&self) -> String {
        if let Some(url) = non_empty(&self.url) {
            return url.to_string();
        }
        if let Some(cpd_host) = non_empty(&self.cpd_host) {
            return cpd_host.to_string();
        }
        region_host(non_empty(&self.region).unwrap_or(DEFAULT_REGION))
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let censor = |v: &Option<String>| v.as_ref().map(|_| "[censored]");
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("iam_host", &self.iam_host)
            .field("region", &self.region)
            .field("api_version", &self.api_version)
            .field("api_key", &censor(&self.api_key))
            .field("cpd_host", &self.cpd_host)
            .field("cpd_username", &self.cpd_username)
            .field("cpd_password", &censor(&self.cpd_password))
            .field("cpd_api_key", &censor(&self.cpd_api_key))
            .field("project_id", &self.project_id)
            .field("space_id", &self.space_id)
            .field("refresh_timeout", &self.refresh_timeout)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Authenticated watsonx client
///
/// Construction fetches a token, so a `Client` is never unauthenticated.
pub struct Client {
    tokens: TokenManager,
    scope: Scope,
    base_url: String,
    api_version: String,
}

impl Client {
    /// Validate options, build the matching authenticator and fetch the first token
    pub async fn new(options: ClientOptions, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let scope = options.scope()?;
        let authenticator = options.authenticator(transport)?;
        let refresh_timeout = options.refresh_timeout.unwrap_or(DEFAULT_REFRESH_TIMEOUT);
        let api_version = non_empty(&options.api_version)
            .unwrap_or(DEFAULT_API_VERSION)
            .to_string();

        let tokens = TokenManager::new(authenticator, refresh_timeout).await?;

        Ok(Self {
            tokens,
            scope,
            base_url: options.base_url(),
            api_version,
        })
    }

    /// Build a client around a caller-supplied credential backend
    pub async fn with_authenticator(
        authenticator: Arc<dyn Authenticator>,
        scope: Scope,
        base_url: impl Into<String>,
        refresh_timeout: Duration,
    ) -> Result<Self> {
        let tokens = TokenManager::new(authenticator, refresh_timeout).await?;
        Ok(Self {
            tokens,
            scope,
            base_url: base_url.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        })
    }

    /// Refresh the token if it has expired; call before every outbound request
    pub async fn check_and_refresh_token(&self) -> Result<()> {
        self.tokens.check_and_refresh_token().await
    }

    /// Replace the token unconditionally
    pub async fn refresh_token(&self) -> Result<()> {
        self.tokens.refresh_token().await
    }

    /// Snapshot of the current token
    pub async fn token(&self) -> Arc<Token> {
        self.tokens.token().await
    }

    /// Bearer value for the `Authorization` header, refreshed if expired
    pub async fn access_token(&self) -> Result<String> {
        self.tokens.access_token().await
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Absolute URL for an API path, with the `version` query parameter
    pub fn endpoint_url(&self, path: &str) -> Result<Url> {
        let mut url = endpoint_url(&self.base_url, path)?;
        url.query_pairs_mut()
            .append_pair("version", &self.api_version);
        Ok(url)
    }
}

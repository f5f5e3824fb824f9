// Authentication module
// Credential backends, token model and the refreshing token slot

mod cpd;
mod expiry;
mod iam;
mod manager;
mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use cpd::{CpdAuthenticator, CPD_AUTHORIZE_PATH};
pub use expiry::{extract_expiration, extract_expiration_at, FALLBACK_VALIDITY_HOURS};
pub use iam::{IamAuthenticator, DEFAULT_IAM_HOST, IAM_TOKEN_PATH};
pub use manager::{TokenManager, DEFAULT_REFRESH_TIMEOUT};
pub use types::{ExpirationSource, Token};

/// A credential backend that can mint bearer tokens
///
/// Implementations hold only immutable configuration, so concurrent calls are
/// independent. Each successful call returns a new token.
#[async_trait]
pub trait Authenticator: std::fmt::Debug + Send + Sync {
    async fn generate_token(&self) -> Result<Token>;
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::types::Token;
use super::Authenticator;
use crate::error::{AuthError, Result};

/// Deadline applied to each token request unless overridden
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Token manager
/// Holds one authenticator and the most recently issued token
pub struct TokenManager {
    /// Credential backend, fixed for the manager's lifetime
    authenticator: Arc<dyn Authenticator>,

    /// Current token; replaced wholesale on refresh
    token: RwLock<Arc<Token>>,

    /// Serialises check-and-refresh and forced refresh; holds the last outcome
    refresh_gate: Mutex<Option<AuthError>>,

    /// Number of completed refresh attempts
    attempts: AtomicU64,

    /// Deadline for a single generate_token call
    refresh_timeout: Duration,
}

impl TokenManager {
    /// Fetch the first token and build the manager around it
    ///
    /// Fails if that first fetch fails, so a manager always holds a token.
    pub async fn new(
        authenticator: Arc<dyn Authenticator>,
        refresh_timeout: Duration,
    ) -> Result<Self> {
        tracing::info!("Fetching initial token via {:?}", authenticator);
        let token = generate_with_deadline(authenticator.as_ref(), refresh_timeout).await?;

        Ok(Self {
            authenticator,
            token: RwLock::new(Arc::new(token)),
            refresh_gate: Mutex::new(None),
            attempts: AtomicU64::new(0),
            refresh_timeout,
        })
    }

    /// Snapshot of the current token
    pub async fn token(&self) -> Arc<Token> {
        self.token.read().await.clone()
    }

    /// Refresh if the current token has expired; otherwise do nothing
    ///
    /// Concurrent callers that all observe an expired token trigger a single
    /// refresh and all end up with its result, including its error.
    pub async fn check_and_refresh_token(&self) -> Result<()> {
        if !self.token.read().await.is_expired() {
            return Ok(());
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut last_error = self.refresh_gate.lock().await;

        // Another caller may have refreshed while we waited on the gate
        if !self.token.read().await.is_expired() {
            tracing::debug!("Token already refreshed by a concurrent caller");
            return Ok(());
        }

        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(e) = last_error.as_ref() {
                tracing::debug!("Concurrent refresh failed, not retrying: {}", e);
                return Err(e.clone());
            }
        }

        self.refresh_locked(&mut last_error).await
    }

    /// Obtain a new token unconditionally
    ///
    /// On failure the previously stored token is kept.
    pub async fn refresh_token(&self) -> Result<()> {
        let mut last_error = self.refresh_gate.lock().await;
        self.refresh_locked(&mut last_error).await
    }

    /// Current bearer value, refreshing first when expired
    pub async fn access_token(&self) -> Result<String> {
        self.check_and_refresh_token().await?;
        Ok(self.token().await.value().to_string())
    }

    /// `last_error` is the guarded contents of `refresh_gate`
    async fn refresh_locked(&self, last_error: &mut Option<AuthError>) -> Result<()> {
        tracing::debug!("Refreshing access token...");

        let result = generate_with_deadline(self.authenticator.as_ref(), self.refresh_timeout).await;
        *last_error = result.as_ref().err().cloned();
        self.attempts.fetch_add(1, Ordering::Release);

        match result {
            Ok(token) => {
                let token = Arc::new(token);
                *self.token.write().await = token;
                Ok(())
            }
            Err(e) => {
                let current = self.token().await;
                tracing::warn!(
                    "Token refresh failed, keeping cached token (expired: {}): {}",
                    current.is_expired(),
                    e
                );
                Err(e)
            }
        }
    }
}

async fn generate_with_deadline(
    authenticator: &dyn Authenticator,
    deadline: Duration,
) -> Result<Token> {
    match tokio::time::timeout(deadline, authenticator.generate_token()).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("Token request exceeded {:?}", deadline);
            Err(AuthError::Timeout(deadline))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::ExpirationSource;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio_test::{assert_err, assert_ok};

    /// Replays scripted outcomes and counts calls
    #[derive(Debug)]
    struct ScriptedAuthenticator {
        calls: AtomicUsize,
        script: StdMutex<VecDeque<Result<Token>>>,
        delay: Duration,
    }

    impl ScriptedAuthenticator {
        fn new(script: Vec<Result<Token>>) -> Arc<Self> {
            Self::with_delay(script, Duration::ZERO)
        }

        fn with_delay(script: Vec<Result<Token>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: StdMutex::new(script.into()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for ScriptedAuthenticator {
        async fn generate_token(&self) -> Result<Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(token_expiring_in(&format!("token-{n}"), 3600)))
        }
    }

    fn token_expiring_in(value: &str, secs: i64) -> Token {
        Token::new(
            value.to_string(),
            Utc::now() + ChronoDuration::seconds(secs),
            ExpirationSource::ServerDeclared,
        )
    }

    #[tokio::test]
    async fn test_new_fetches_initial_token() {
        let auth = ScriptedAuthenticator::new(vec![Ok(token_expiring_in("first", 3600))]);
        let manager = TokenManager::new(auth.clone(), DEFAULT_REFRESH_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(auth.calls(), 1);
        assert_eq!(manager.token().await.value(), "first");
    }

    #[tokio::test]
    async fn test_new_fails_when_initial_fetch_fails() {
        let auth = ScriptedAuthenticator::new(vec![Err(AuthError::AuthenticationFailed {
            status: 400,
            message: "bad key".to_string(),
        })]);
        let result = TokenManager::new(auth, DEFAULT_REFRESH_TIMEOUT).await;
        assert!(matches!(
            result,
            Err(AuthError::AuthenticationFailed { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_check_on_fresh_token_makes_no_calls() {
        let auth = ScriptedAuthenticator::new(vec![Ok(token_expiring_in("fresh", 3600))]);
        let manager = TokenManager::new(auth.clone(), DEFAULT_REFRESH_TIMEOUT)
            .await
            .unwrap();

        for _ in 0..5 {
            assert_ok!(manager.check_and_refresh_token().await);
        }
        assert_eq!(auth.calls(), 1);
        assert_eq!(manager.token().await.value(), "fresh");
    }

    #[tokio::test]
    async fn test_check_on_expired_token_refreshes() {
        let auth = ScriptedAuthenticator::new(vec![
            Ok(token_expiring_in("stale", -10)),
            Ok(token_expiring_in("renewed", 3600)),
        ]);
        let manager = TokenManager::new(auth.clone(), DEFAULT_REFRESH_TIMEOUT)
            .await
            .unwrap();

        manager.check_and_refresh_token().await.unwrap();
        assert_eq!(auth.calls(), 2);
        assert_eq!(manager.token().await.value(), "renewed");
        assert_eq!(manager.access_token().await.unwrap(), "renewed");
    }

    #[tokio::test]
    async fn test_concurrent_checks_refresh_once() {
        let auth = ScriptedAuthenticator::with_delay(
            vec![
                Ok(token_expiring_in("stale", -10)),
                Ok(token_expiring_in("shared", 3600)),
            ],
            Duration::from_millis(20),
        );
        let manager = Arc::new(
            TokenManager::new(auth.clone(), DEFAULT_REFRESH_TIMEOUT)
                .await
                .unwrap(),
        );

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager.check_and_refresh_token().await.unwrap();
                    manager.token().await
                })
            })
            .collect();

        let observed: Vec<Arc<Token>> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        // One initial fetch plus exactly one refresh
        assert_eq!(auth.calls(), 2);
        assert!(observed.iter().all(|t| t.value() == "shared"));
        assert!(observed.iter().all(|t| Arc::ptr_eq(t, &observed[0])));
    }

    #[tokio::test]
    async fn test_forced_refresh_always_calls_authenticator() {
        let auth = ScriptedAuthenticator::new(vec![
            Ok(token_expiring_in("a", 3600)),
            Ok(token_expiring_in("b", 3600)),
        ]);
        let manager = TokenManager::new(auth.clone(), DEFAULT_REFRESH_TIMEOUT)
            .await
            .unwrap();

        manager.refresh_token().await.unwrap();
        assert_eq!(auth.calls(), 2);
        assert_eq!(manager.token().await.value(), "b");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_token() {
        let auth = ScriptedAuthenticator::new(vec![
            Ok(token_expiring_in("stale", -10)),
            Err(AuthError::AuthenticationFailed {
                status: 500,
                message: "internal".to_string(),
            }),
        ]);
        let manager = TokenManager::new(auth.clone(), DEFAULT_REFRESH_TIMEOUT)
            .await
            .unwrap();
        let before = manager.token().await;

        let err = assert_err!(manager.check_and_refresh_token().await);
        assert!(matches!(err, AuthError::AuthenticationFailed { status: 500, .. }));

        let after = manager.token().await;
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.value(), "stale");
        assert!(after.is_expired());

        // Next check retries and succeeds
        manager.check_and_refresh_token().await.unwrap();
        assert_eq!(auth.calls(), 3);
        assert!(!manager.token().await.is_expired());
    }

    #[tokio::test]
    async fn test_concurrent_checks_share_one_failed_refresh() {
        let auth = ScriptedAuthenticator::with_delay(
            vec![
                Ok(token_expiring_in("stale", -10)),
                Err(AuthError::AuthenticationFailed {
                    status: 503,
                    message: "unavailable".to_string(),
                }),
            ],
            Duration::from_millis(20),
        );
        let manager = Arc::new(
            TokenManager::new(auth.clone(), DEFAULT_REFRESH_TIMEOUT)
                .await
                .unwrap(),
        );

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.check_and_refresh_token().await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            let err = assert_err!(result.unwrap());
            assert!(matches!(err, AuthError::AuthenticationFailed { status: 503, .. }));
        }

        // One initial fetch plus exactly one failed refresh
        assert_eq!(auth.calls(), 2);
        assert_eq!(manager.token().await.value(), "stale");

        // A later check is a fresh attempt
        assert_ok!(manager.check_and_refresh_token().await);
        assert_eq!(auth.calls(), 3);
        assert!(!manager.token().await.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_timeout_keeps_previous_token() {
        let auth = ScriptedAuthenticator::with_delay(
            vec![Ok(token_expiring_in("first", 3600))],
            Duration::ZERO,
        );
        let manager = TokenManager::new(auth, Duration::from_millis(50))
            .await
            .unwrap();

        // Swap in a backend that cannot answer before the deadline
        let slow = ScriptedAuthenticator::with_delay(vec![], Duration::from_secs(5));
        let manager = TokenManager {
            authenticator: slow.clone(),
            ..manager
        };

        let err = manager.refresh_token().await.unwrap_err();
        assert_eq!(err, AuthError::Timeout(Duration::from_millis(50)));
        assert_eq!(manager.token().await.value(), "first");
        assert_eq!(slow.calls(), 1);
    }
}

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;

use watsonx_auth::config::Config;
use watsonx_auth::http_client::{HttpTransport, ReqwestTransport};
use watsonx_auth::{Client, Token};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("Client options: {:?}", config.client);

    let transport: Arc<dyn HttpTransport> = Arc::new(
        ReqwestTransport::new(config.transport_config())
            .context("Failed to create HTTP transport")?,
    );

    tracing::info!("Authenticating...");
    let client = Client::new(config.client_options(), transport)
        .await
        .context("Authentication failed")?;

    tracing::info!(
        "✅ Authenticated for {:?} at {}",
        client.scope(),
        client.base_url()
    );
    report(client.token().await.as_ref());

    let Some(interval) = config.watch_interval else {
        return Ok(());
    };

    tracing::info!("Checking token every {}s (Ctrl-C to stop)", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let before = client.token().await;
                match client.check_and_refresh_token().await {
                    Ok(()) => {
                        let after = client.token().await;
                        if !Arc::ptr_eq(&before, &after) {
                            tracing::info!("Token refreshed");
                            report(&after);
                        }
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::warn!("Refresh failed, will retry next tick: {}", e);
                    }
                    Err(e) => {
                        tracing::error!("❌ Refresh failed: {}", e);
                        return Err(e.into());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}

fn report(token: &Token) {
    let remaining = token.expires_in(Utc::now());
    tracing::info!(
        "Token expires {} ({:?}, {}m remaining)",
        token.expiration().to_rfc3339(),
        token.source(),
        remaining.num_minutes()
    );
}

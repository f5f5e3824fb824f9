use anyhow::Result;
use clap::Parser;
use std::time::Duration;

use crate::client::{ClientOptions, DEFAULT_API_VERSION, DEFAULT_REGION};
use crate::http_client::TransportConfig;

/// watsonx credential checker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// IBM Cloud API key (IAM authentication)
    #[arg(short = 'k', long, env = "WATSONX_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the IAM host
    #[arg(long, env = "WATSONX_IAM_HOST")]
    pub iam_host: Option<String>,

    /// Override the watsonx.ai API host
    #[arg(long, env = "WATSONX_URL_HOST")]
    pub url: Option<String>,

    /// IBM Cloud region (us-south, eu-de, jp-tok)
    #[arg(short = 'r', long, env = "WATSONX_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// API version date
    #[arg(long, env = "WATSONX_API_VERSION", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Cloud Pak for Data host
    #[arg(long, env = "WATSONX_CPD_HOST")]
    pub cpd_host: Option<String>,

    /// Cloud Pak for Data username
    #[arg(long, env = "WATSONX_CPD_USERNAME")]
    pub cpd_username: Option<String>,

    /// Cloud Pak for Data password
    #[arg(long, env = "WATSONX_CPD_PASSWORD", hide_env_values = true)]
    pub cpd_password: Option<String>,

    /// Cloud Pak for Data API key
    #[arg(long, env = "WATSONX_CPD_API_KEY", hide_env_values = true)]
    pub cpd_api_key: Option<String>,

    /// Project ID
    #[arg(short = 'p', long, env = "WATSONX_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Deployment space ID
    #[arg(short = 's', long, env = "WATSONX_SPACE_ID")]
    pub space_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "30")]
    pub http_connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,

    /// HTTP max retries
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value = "3")]
    pub http_retries: u32,

    /// Deadline for a single token request in seconds
    #[arg(long, env = "TOKEN_REFRESH_TIMEOUT", default_value = "30")]
    pub token_timeout: u64,

    /// Keep running and check the token every N seconds
    #[arg(long, value_name = "SECS")]
    pub watch: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub client: ClientOptions,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,

    pub log_level: String,
    pub watch_interval: Option<Duration>,
}

impl Config {
    /// Load configuration with priority: CLI > ENV (.env included) > defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        if args.token_timeout == 0 {
            anyhow::bail!("TOKEN_REFRESH_TIMEOUT must be greater than zero");
        }
        if matches!(args.watch, Some(0)) {
            anyhow::bail!("--watch interval must be greater than zero");
        }

        let client = ClientOptions {
            url: args.url,
            iam_host: args.iam_host,
            region: Some(args.region),
            api_version: Some(args.api_version),
            api_key: args.api_key,
            cpd_host: args.cpd_host,
            cpd_username: args.cpd_username,
            cpd_password: args.cpd_password,
            cpd_api_key: args.cpd_api_key,
            project_id: args.project_id,
            space_id: args.space_id,
            refresh_timeout: Some(Duration::from_secs(args.token_timeout)),
        };

        Ok(Config {
            client,
            http_connect_timeout: args.http_connect_timeout,
            http_request_timeout: args.http_timeout,
            http_max_retries: args.http_retries,
            log_level: args.log_level,
            watch_interval: args.watch.map(Duration::from_secs),
        })
    }

    /// Resolved options for the client core
    pub fn client_options(&self) -> ClientOptions {
        self.client.clone()
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
            max_retries: self.http_max_retries,
            ..TransportConfig::default()
        }
    }
}

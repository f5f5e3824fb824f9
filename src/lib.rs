// watsonx-auth - credential and token lifecycle for the watsonx.ai API

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http_client;

pub use auth::{Authenticator, ExpirationSource, Token};
pub use client::{Client, ClientOptions, Scope};
pub use error::{AuthError, Result};

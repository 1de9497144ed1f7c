// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;
use crate::models::CacheConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_client(config: &CacheConfig) -> Result<reqwest::Client> {
    create_client_with_timeout(config.timeout())
}

/// Create an asynchronous HTTP client with an explicit timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("reconciler/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

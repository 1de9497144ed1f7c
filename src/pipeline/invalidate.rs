//! Backend cache invalidation.
//!
//! The report backend caches the aggregate; after a regeneration it can be
//! told to drop that cache with a bare POST. A backend that is not running
//! is a normal situation and is reported as such, not as an error.

use crate::error::Result;
use crate::models::CacheConfig;
use crate::utils::http;

/// Result of an invalidation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// The backend answered 200
    Invalidated,
    /// The backend answered with another status
    Rejected { status: u16, body: String },
    /// No backend could be reached
    Unreachable(String),
    /// The request failed for another reason
    Failed(String),
}

impl InvalidationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvalidationOutcome::Invalidated)
    }

    pub fn log(&self, url: &str) {
        match self {
            InvalidationOutcome::Invalidated => log::info!("Backend cache invalidated"),
            InvalidationOutcome::Rejected { status, body } => {
                log::warn!("Cache invalidation rejected with status {}: {}", status, body)
            }
            InvalidationOutcome::Unreachable(reason) => {
                log::warn!("Backend not reachable at {}: {}", url, reason)
            }
            InvalidationOutcome::Failed(reason) => {
                log::error!("Cache invalidation failed: {}", reason)
            }
        }
    }
}

/// Client for the backend's invalidation endpoint.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    client: reqwest::Client,
    url: String,
}

impl CacheInvalidator {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_client(config)?,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST to the endpoint and classify the answer.
    pub async fn invalidate(&self) -> InvalidationOutcome {
        let response = match self.client.post(&self.url).send().await {
            Ok(response) => response,
            // Only a refused connection means no backend is running.
            Err(e) if e.is_connect() && !e.is_timeout() => {
                return InvalidationOutcome::Unreachable(e.to_string());
            }
            Err(e) => return InvalidationOutcome::Failed(e.to_string()),
        };

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return InvalidationOutcome::Invalidated;
        }
        let body = response.text().await.unwrap_or_default();
        InvalidationOutcome::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

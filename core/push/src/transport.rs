//! HTTP transport client for the usage service.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use meterlog_common::{Error, Result};

use crate::credentials::CredentialProvider;
use crate::wire::{PushRequest, PushResponse};

/// Total per-request timeout. A stalled connection surfaces as a
/// whole-batch network error instead of hanging the session.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Transport seam between the session controller and the network.
///
/// The session controller only talks to this trait; tests substitute a
/// scripted implementation.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Lightweight authenticated health check.
    async fn health_check(&self) -> Result<()>;

    /// Transmit one batch and parse the structured verdict.
    async fn push_batch(&self, request: &PushRequest) -> Result<PushResponse>;
}

/// Usage service API client.
pub struct ApiClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("meterlog/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String> {
        let token = self.credentials.access_token().await?;
        Ok(format!("Bearer {}", token))
    }

    /// Handle API response with error classification.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Server(format!("Failed to parse response: {}", e)))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(Error::Authentication(
                "Invalid or expired credential".to_string(),
            ))
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound("Endpoint not found".to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Server(format!("API error: {} - {}", status, body)))
        }
    }
}

#[async_trait]
impl PushTransport for ApiClient {
    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/health", self.base_url);
        let auth = self.auth_header().await?;

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Health check failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("Health check ok");
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(Error::Authentication(
                "Invalid or expired credential".to_string(),
            ))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Server(format!(
                "Health check failed: {} - {}",
                status, body
            )))
        }
    }

    async fn push_batch(&self, request: &PushRequest) -> Result<PushResponse> {
        let url = format!("{}/api/usage/messages/batch", self.base_url);
        let auth = self.auth_header().await?;

        debug!("Pushing batch of {} messages", request.messages.len());

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to push batch: {}", e)))?;

        self.handle_response(response).await
    }
}

//! HTTP client for a running snapshot server.
//!
//! Configuration is via environment variables:
//! - `DSNAP_URL` - Base URL (default: `http://127.0.0.1:5000`)

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::*;

/// Default URL for a local server.
const DEFAULT_URL: &str = "http://127.0.0.1:5000";

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotClient {
    base_url: String,
    client: Client,
}

impl SnapshotClient {
    /// Create client from environment variables.
    pub fn from_env() -> Self {
        let base_url = std::env::var("DSNAP_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        Self::new(base_url)
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        match status {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(message)),
            StatusCode::BAD_REQUEST => Err(ClientError::BadRequest(message)),
            _ => Err(ClientError::Server(format!("{}: {}", status, message))),
        }
    }

    /// Submit a document; the server archives, activates and snapshots it.
    pub async fn submit(
        &self,
        input: &SubmitDocumentInput,
    ) -> Result<SubmitDocumentResponse, ClientError> {
        let response = self
            .client
            .post(self.url("/api/save"))
            .json(input)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn latest(&self) -> Result<LatestDocumentResponse, ClientError> {
        let response = self.client.get(self.url("/api/latest")).send().await?;
        self.handle_response(response).await
    }

    pub async fn versions(&self) -> Result<Vec<SnapshotEntry>, ClientError> {
        let response = self.client.get(self.url("/api/versions")).send().await?;
        self.handle_response(response).await
    }
}

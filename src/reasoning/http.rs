//! HTTP reasoning client.
//!
//! POSTs `{"check_id", "prompt", "request"}` as JSON to `REASONING_ENDPOINT`
//! with `Authorization: Bearer $REASONING_API_KEY`. The response body may be
//! the raw claim JSON, or an object whose `"output"` string holds it.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::ConfigError;
use super::{ReasoningClient, ReasoningRequest, ReasoningTransportError};

/// Max body bytes kept in a status error.
const ERROR_BODY_LIMIT: usize = 512;

/// Reasoning client backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpReasoningClient {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl HttpReasoningClient {
    /// Create a client.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let endpoint = endpoint.into();
        let api_key = api_key.into();
        if endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("REASONING_ENDPOINT"));
        }
        if api_key.trim().is_empty() {
            return Err(ConfigError::Missing("REASONING_API_KEY"));
        }
        Ok(Self {
            endpoint,
            api_key,
            client: Client::new(),
        })
    }

    /// Create a client from `REASONING_ENDPOINT` and `REASONING_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = std::env::var("REASONING_ENDPOINT")
            .map_err(|_| ConfigError::Missing("REASONING_ENDPOINT"))?;
        let api_key = std::env::var("REASONING_API_KEY")
            .map_err(|_| ConfigError::Missing("REASONING_API_KEY"))?;
        Self::new(endpoint, api_key)
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn extract_output(body: String) -> String {
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(serde_json::Value::Object(map)) => match map.get("output") {
            Some(serde_json::Value::String(output)) => output.clone(),
            _ => body,
        },
        _ => body,
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningTransportError> {
        let payload = json!({
            "check_id": request.check_id,
            "prompt": request.render(),
            "request": request,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ReasoningTransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ReasoningTransportError::Other(e.to_string()))?;

        if !status.is_success() {
            let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(ReasoningTransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(extract_output(body))
    }

    fn name(&self) -> &str {
        "http"
    }
}

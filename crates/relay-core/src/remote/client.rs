//! Thin JSON client for the agents REST API.

use std::time::Duration;

use crate::config::RelayConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct AgentsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_version: String,
}

impl AgentsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            api_version: api_version.into(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.api_key.clone(),
            config.api_version.clone(),
            config.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .query(&[("api-version", self.api_version.as_str())])
            .header("content-type", "application/json");
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    pub async fn get(&self, path: &str) -> Result<serde_json::Value, PipelineError> {
        let request = self.authorize(self.client.get(self.url(path)));
        self.send(request).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, PipelineError> {
        let request = self.authorize(self.client.post(self.url(path))).json(body);
        self.send(request).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, PipelineError> {
        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            PipelineError::transport(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            return Err(PipelineError::transport_status(
                status.as_u16(),
                format!("API returned {}: {}", status, response_text),
            ));
        }

        if response_text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&response_text)
            .map_err(|e| PipelineError::transport(format!("Failed to parse response JSON: {}", e)))
    }
}

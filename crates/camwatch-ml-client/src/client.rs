//! ML service HTTP client.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MlError, MlResult};
use crate::types::{
    CaptionRequest, CaptionResponse, DetectRequest, DetectResponse, HealthResponse,
    LoadModelRequest, LoadModelResponse,
};

/// Configuration for ML client.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL of ML service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            // Model loads on a cold GPU are slow
            timeout: Duration::from_secs(300),
            max_retries: 2,
        }
    }
}

impl MlClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ML_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("ML_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            max_retries: std::env::var("ML_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// Client for the model service.
pub struct MlClient {
    http: Client,
    config: MlClientConfig,
}

impl MlClient {
    /// Create a new ML client.
    pub fn new(config: MlClientConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MlResult<Self> {
        Self::new(MlClientConfig::from_env())
    }

    pub fn config(&self) -> &MlClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Check if ML service is healthy.
    pub async fn health_check(&self) -> MlResult<bool> {
        let url = self.url("/health");

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("ML service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ML service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Load a model onto `device`, returning its handle.
    pub async fn load_model(&self, model: &str, device: &str) -> MlResult<String> {
        let request = LoadModelRequest {
            model: model.to_string(),
            device: device.to_string(),
        };
        let response: LoadModelResponse = self.post_json("/models/load", &request).await?;
        debug!(model, device, handle = %response.handle, "Model loaded");
        Ok(response.handle)
    }

    /// Unload a model and free its device memory.
    pub async fn unload_model(&self, handle: &str) -> MlResult<()> {
        let url = self.url(&format!("/models/{}/unload", urlencoding::encode(handle)));
        let response = self
            .with_retry(|| async { self.http.post(&url).send().await.map_err(MlError::Network) })
            .await?;

        // Already gone is fine
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    /// Run detection over base64-encoded images.
    pub async fn detect(&self, handle: &str, images: Vec<String>) -> MlResult<DetectResponse> {
        let expected = images.len();
        let request = DetectRequest {
            handle: handle.to_string(),
            images,
        };
        let response: DetectResponse = self.post_json("/detect", &request).await?;
        if response.results.len() != expected {
            return Err(MlError::InvalidResponse(format!(
                "expected {} detection results, got {}",
                expected,
                response.results.len()
            )));
        }
        Ok(response)
    }

    /// Caption base64-encoded images.
    pub async fn caption(
        &self,
        handle: &str,
        images: Vec<String>,
        num_beams: u32,
        max_length: u32,
    ) -> MlResult<Vec<String>> {
        let expected = images.len();
        let request = CaptionRequest {
            handle: handle.to_string(),
            images,
            num_beams,
            max_length,
        };
        let response: CaptionResponse = self.post_json("/caption", &request).await?;
        if response.captions.len() != expected {
            return Err(MlError::InvalidResponse(format!(
                "expected {} captions, got {}",
                expected,
                response.captions.len()
            )));
        }
        Ok(response.captions)
    }

    async fn post_json<Req, Resp>(&self, path: &str, request: &Req) -> MlResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("Sending ML request to {}", url);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(request)
                    .send()
                    .await
                    .map_err(MlError::Network)?;
                // 503 is worth retrying, other failures are not
                if response.status() == StatusCode::SERVICE_UNAVAILABLE {
                    return Err(MlError::ServiceUnavailable(url.clone()));
                }
                Ok(response)
            })
            .await?;

        let response = check_status(response).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| MlError::InvalidResponse(e.to_string()))
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> MlResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MlResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "ML request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(MlError::RequestFailed("Unknown error".to_string())))
    }
}

async fn check_status(response: reqwest::Response) -> MlResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(MlError::RequestFailed(format!(
        "ML service returned {}: {}",
        status, body
    )))
}

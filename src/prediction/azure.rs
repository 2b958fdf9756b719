//! Azure Face API predictor

use super::{ImagePredictor, PredictionError, PredictionOutcome};
use crate::config::BridgeConfig;
use crate::error::{sanitize_error_message, BridgeError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

/// Keys shorter than this are rejected before any request
const MIN_KEY_LENGTH: usize = 10;

const DETECT_PATH: &str = "/face/v1.0/detect";

const DETECT_PARAMS: [(&str, &str); 3] = [
    ("returnFaceId", "true"),
    ("returnFaceLandmarks", "false"),
    ("returnFaceAttributes", "age,gender,glasses,facialHair"),
];

#[derive(Debug, Clone)]
pub struct AzureFaceConfig {
    pub subscription_key: String,
    /// Scheme and host, e.g. `https://westus.api.cognitive.microsoft.com`
    pub endpoint: String,
    pub timeout: Duration,
}

impl AzureFaceConfig {
    pub fn new(subscription_key: impl Into<String>, uri_base: &str) -> Self {
        Self {
            subscription_key: subscription_key.into(),
            endpoint: format!("https://{}", uri_base.trim_end_matches('/')),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build from the `[prediction]` section; the key comes from the environment
    pub fn from_bridge_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let section = config
            .prediction
            .as_ref()
            .ok_or_else(|| BridgeError::prediction("no [prediction] section configured"))?;
        let key = config.get_prediction_key()?;
        Ok(Self::new(key, &section.uri_base))
    }
}

pub struct AzureFacePredictor {
    config: AzureFaceConfig,
    client: Client,
}

impl AzureFacePredictor {
    pub fn new(config: AzureFaceConfig) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BridgeError::prediction(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn detect_url(&self) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), DETECT_PATH)
    }

    async fn detect_faces(&self, image: Bytes) -> Result<Vec<Value>, PredictionError> {
        if self.config.subscription_key.len() < MIN_KEY_LENGTH {
            return Err(PredictionError::InvalidKey);
        }

        let response = self
            .client
            .post(self.detect_url())
            .query(&DETECT_PARAMS)
            .header("Content-Type", "application/octet-stream")
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .body(image)
            .send()
            .await
            .map_err(|e| PredictionError::Network(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(PredictionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let faces: Value = response
            .json()
            .await
            .map_err(|e| PredictionError::InvalidResponse(e.to_string()))?;
        debug!(response = %faces, "Got face detection data");

        match faces {
            Value::Array(faces) => Ok(faces),
            other => Err(PredictionError::InvalidResponse(format!(
                "expected a list of faces, got {other}"
            ))),
        }
    }
}

#[async_trait]
impl ImagePredictor for AzureFacePredictor {
    async fn predict(&self, image: Bytes) -> PredictionOutcome {
        let result = self.detect_faces(image).await;
        if let Err(e) = &result {
            error!("Error getting prediction: {}", sanitize_error_message(&e.to_string()));
        }
        result.into()
    }
}

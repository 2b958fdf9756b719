//! Image prediction collaborator
//!
//! Upstream collection modules call a predictor with raw image bytes and put
//! the outcome into a message's `extendedData`, where the face attribute
//! publish strategy picks it up.

pub mod azure;

use crate::bridge::publish::{ERROR_KEY, PREDICTIONS_KEY};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

pub use azure::{AzureFaceConfig, AzureFacePredictor};

/// Result of a prediction call; failures are carried as text, never raised
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    /// One record per detected face
    Predictions(Vec<Value>),
    Error(String),
}

impl PredictionOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, PredictionOutcome::Error(_))
    }

    /// `{"predictions": [...]}` or `{"error": "..."}` for a message's `extendedData`
    pub fn into_extended_data(self) -> Map<String, Value> {
        let mut data = Map::new();
        match self {
            PredictionOutcome::Predictions(faces) => {
                data.insert(PREDICTIONS_KEY.to_string(), Value::Array(faces));
            }
            PredictionOutcome::Error(message) => {
                data.insert(ERROR_KEY.to_string(), Value::String(message));
            }
        }
        data
    }
}

impl From<Result<Vec<Value>, PredictionError>> for PredictionOutcome {
    fn from(result: Result<Vec<Value>, PredictionError>) -> Self {
        match result {
            Ok(faces) => PredictionOutcome::Predictions(faces),
            Err(e) => PredictionOutcome::Error(e.to_string()),
        }
    }
}

/// Reasons a prediction call fails
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Subscription key is not valid")]
    InvalidKey,
    #[error("Request failed: {0}")]
    Network(String),
    #[error("Prediction service returned an error {status}, the response is: {body}")]
    Api { status: u16, body: String },
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

/// Stateless call-out producing predictions for an image
#[async_trait]
pub trait ImagePredictor: Send + Sync {
    async fn predict(&self, image: Bytes) -> PredictionOutcome;
}

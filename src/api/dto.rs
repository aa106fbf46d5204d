//! REST API request/response data transfer objects

use serde::Serialize;

use crate::engine::{BatchItemOutcome, BatchResult, PredictionResult};

/// Root response
#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub num_classes: usize,
}

/// Single image prediction response
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub filename: String,
    pub prediction: PredictionResult,
}

/// One entry of a batch response; carries either `prediction` or `error`
#[derive(Debug, Serialize)]
pub struct BatchItemDto {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<BatchItemOutcome> for BatchItemDto {
    fn from(outcome: BatchItemOutcome) -> Self {
        match outcome {
            BatchItemOutcome::Success { filename, prediction } => Self {
                filename,
                success: true,
                prediction: Some(prediction),
                error: None,
            },
            BatchItemOutcome::Failure { filename, error } => Self {
                filename,
                success: false,
                prediction: None,
                error: Some(error),
            },
        }
    }
}

/// Batch prediction response
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<BatchItemDto>,
    pub total_files: usize,
}

impl From<BatchResult> for BatchResponse {
    fn from(batch: BatchResult) -> Self {
        Self {
            success: true,
            total_files: batch.total_files,
            results: batch.results.into_iter().map(BatchItemDto::from).collect(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}

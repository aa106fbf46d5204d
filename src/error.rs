//! Error taxonomy for the inference pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the model handle, preprocessing and prediction.
///
/// Per-item batch failures never surface as this type; they are folded into
/// [`crate::engine::BatchItemOutcome::Failure`] using the error's display text.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Weights artifact missing, unreadable or not a recognized checkpoint.
    #[error("failed to load model from {}: {reason}", path.display())]
    ModelLoad {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A prediction arrived before a model was installed.
    #[error("Model not loaded")]
    ModelNotReady,

    /// Request rejected before any preprocessing happened.
    #[error("{message}")]
    InvalidInput { message: String },

    /// Bytes could not be decoded as an image.
    #[error("cannot identify image file: {0}")]
    InvalidImage(#[source] image::ImageError),

    /// Upload larger than the configured limit.
    #[error("File too large: {size} bytes (max {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    /// Forward pass or tensor conversion failed.
    #[error("inference failed: {context}")]
    Inference {
        context: String,
        #[source]
        source: candle_core::Error,
    },

    /// The blocking task running the pipeline panicked or was cancelled.
    #[error("inference worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

impl InferenceError {
    pub fn model_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn model_load_with(
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn inference(context: impl Into<String>, source: candle_core::Error) -> Self {
        Self::Inference {
            context: context.into(),
            source,
        }
    }

    /// True for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::InvalidImage(_) | Self::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;

//! Classifier Service - request-facing operations
//!
//! Wraps the synchronous inference core: readiness checks, input screening
//! and moving CPU-bound work off the async runtime.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::config::Config;
use crate::engine::batch::{is_image_content_type, predict_batch_screened, NOT_AN_IMAGE};
use crate::engine::{predict, preprocess, BatchInput, BatchResult, ModelSlot, PredictionResult};
use crate::error::{InferenceError, Result};

use super::policy::UploadPolicy;
use super::types::HealthResult;

/// Health status reported while the process is serving
pub const HEALTHY: &str = "healthy 😊";

/// Image classification service
pub struct ClassifierService {
    slot: Arc<ModelSlot>,
    class_names: Arc<[String]>,
    policy: UploadPolicy,
}

impl ClassifierService {
    /// Create a new classifier service
    pub fn new(slot: Arc<ModelSlot>, class_names: Vec<String>, policy: UploadPolicy) -> Self {
        Self {
            slot,
            class_names: class_names.into(),
            policy,
        }
    }

    pub fn from_config(slot: Arc<ModelSlot>, config: &Config) -> Self {
        Self::new(
            slot,
            config.model.class_names.clone(),
            UploadPolicy::from_config(&config.upload),
        )
    }

    pub fn slot(&self) -> &Arc<ModelSlot> {
        &self.slot
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Get health status
    pub fn health(&self) -> HealthResult {
        HealthResult {
            status: HEALTHY.to_string(),
            model_loaded: self.slot.is_loaded(),
            num_classes: self.slot.num_classes(),
        }
    }

    /// Classify one uploaded image
    pub async fn predict_one(
        &self,
        data: Vec<u8>,
        content_type: &str,
        filename: &str,
    ) -> Result<PredictionResult> {
        let handle = self.slot.get()?;

        if !is_image_content_type(content_type) {
            return Err(InferenceError::invalid_input(NOT_AN_IMAGE));
        }
        self.policy.check(filename, data.len())?;

        let start = Instant::now();
        let class_names = self.class_names.clone();
        let prediction = tokio::task::spawn_blocking(move || {
            let tensor = preprocess(&data)?;
            predict(&handle, &tensor, &class_names)
        })
        .await??;

        debug!(
            "Predicted {} as class {} ({:.4}) in {}ms",
            filename,
            prediction.predicted_class_idx,
            prediction.confidence,
            start.elapsed().as_millis()
        );
        Ok(prediction)
    }

    /// Classify a sequence of uploads, isolating failures per file
    pub async fn predict_many(&self, files: Vec<BatchInput>) -> Result<BatchResult> {
        let handle = self.slot.get()?;

        let start = Instant::now();
        let class_names = self.class_names.clone();
        let policy = self.policy.clone();
        let batch = tokio::task::spawn_blocking(move || {
            predict_batch_screened(&handle, &files, &class_names, |input| {
                policy.check(&input.filename, input.data.len())
            })
        })
        .await?;

        debug!(
            "Batch of {} processed in {}ms",
            batch.total_files,
            start.elapsed().as_millis()
        );
        Ok(batch)
    }
}

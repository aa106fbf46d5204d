//! Forward pass and output interpretation

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use super::model::ModelHandle;
use super::preprocess::NormalizedTensor;
use crate::error::{InferenceError, Result};
use crate::utils::math::{argmax, softmax};

/// Outcome of classifying a single image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class_idx: usize,
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_class_name: Option<String>,
}

/// Classify a preprocessed image.
///
/// `class_names` may be empty or shorter than the class count; the name is then
/// left out rather than failing the request.
pub fn predict(
    handle: &ModelHandle,
    tensor: &NormalizedTensor,
    class_names: &[String],
) -> Result<PredictionResult> {
    let input = to_device_tensor(handle, tensor)?;
    let output = handle.forward(&input)?;

    let logits = output
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(|e| InferenceError::inference("read logits", e))?;

    if logits.len() != handle.num_classes() {
        return Err(InferenceError::inference(
            "read logits",
            candle_core::Error::Msg(format!(
                "expected {} class scores, got {}",
                handle.num_classes(),
                logits.len()
            )),
        ));
    }

    interpret_logits(&logits, class_names)
}

/// Turn raw class scores into a prediction.
pub fn interpret_logits(logits: &[f32], class_names: &[String]) -> Result<PredictionResult> {
    if logits.is_empty() || logits.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::inference(
            "interpret logits",
            candle_core::Error::Msg(format!("non-finite or empty class scores: {:?}", logits)),
        ));
    }

    let probabilities = softmax(logits);
    let predicted_class_idx = argmax(&probabilities);
    let confidence = probabilities[predicted_class_idx];
    let predicted_class_name = class_names.get(predicted_class_idx).cloned();

    Ok(PredictionResult {
        predicted_class_idx,
        confidence,
        probabilities,
        predicted_class_name,
    })
}

fn to_device_tensor(handle: &ModelHandle, tensor: &NormalizedTensor) -> Result<Tensor> {
    let array = tensor.as_array();
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_vec(data, array.shape(), handle.device())
        .map_err(|e| InferenceError::inference("build input tensor", e))
}

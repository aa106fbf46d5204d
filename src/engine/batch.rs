//! Batch prediction with per-item failure isolation
//!
//! Every input produces exactly one outcome, in input order. A failing item
//! is recorded and processing moves on to the next one.

use tracing::{debug, warn};

use super::model::ModelHandle;
use super::predictor::{predict, PredictionResult};
use super::preprocess::preprocess;
use crate::error::{InferenceError, Result};

/// Message recorded for inputs whose content type is not an image
pub const NOT_AN_IMAGE: &str = "File must be an image";

/// One uploaded file
#[derive(Debug, Clone)]
pub struct BatchInput {
    pub filename: String,
    pub data: Vec<u8>,
    pub content_type: String,
}

impl BatchInput {
    pub fn new(filename: impl Into<String>, data: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            data,
            content_type: content_type.into(),
        }
    }
}

/// Result for a single batch item
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItemOutcome {
    Success {
        filename: String,
        prediction: PredictionResult,
    },
    Failure {
        filename: String,
        error: String,
    },
}

impl BatchItemOutcome {
    pub fn filename(&self) -> &str {
        match self {
            BatchItemOutcome::Success { filename, .. } | BatchItemOutcome::Failure { filename, .. } => filename,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchItemOutcome::Success { .. })
    }
}

/// All outcomes of a batch; `results.len() == total_files` always
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub results: Vec<BatchItemOutcome>,
    pub total_files: usize,
}

impl BatchResult {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}

/// True if a MIME type names an image (`image/*`).
pub fn is_image_content_type(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

/// Classify every input.
pub fn predict_batch(handle: &ModelHandle, inputs: &[BatchInput], class_names: &[String]) -> BatchResult {
    predict_batch_screened(handle, inputs, class_names, |_| Ok(()))
}

/// Classify every input, running `screen` on image inputs before decoding.
///
/// A screen error fails that item only, like any other per-item error.
pub fn predict_batch_screened<F>(
    handle: &ModelHandle,
    inputs: &[BatchInput],
    class_names: &[String],
    screen: F,
) -> BatchResult
where
    F: Fn(&BatchInput) -> Result<()>,
{
    let results: Vec<BatchItemOutcome> = inputs
        .iter()
        .map(|input| match predict_item(handle, input, class_names, &screen) {
            Ok(prediction) => BatchItemOutcome::Success {
                filename: input.filename.clone(),
                prediction,
            },
            Err(e) => {
                warn!("Batch item {} failed: {}", input.filename, e);
                BatchItemOutcome::Failure {
                    filename: input.filename.clone(),
                    error: e.to_string(),
                }
            }
        })
        .collect();

    let batch = BatchResult {
        total_files: inputs.len(),
        results,
    };
    debug!(
        "Batch finished: {}/{} succeeded",
        batch.success_count(),
        batch.total_files
    );
    batch
}

fn predict_item<F>(
    handle: &ModelHandle,
    input: &BatchInput,
    class_names: &[String],
    screen: &F,
) -> Result<PredictionResult>
where
    F: Fn(&BatchInput) -> Result<()>,
{
    if !is_image_content_type(&input.content_type) {
        return Err(InferenceError::invalid_input(NOT_AN_IMAGE));
    }
    screen(input)?;

    let tensor = preprocess(&input.data)?;
    predict(handle, &tensor, class_names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::predictor::tests::red_vs_green_handle;
    use crate::engine::preprocess::tests::{encode_png, red_pixel_png};
    use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};

    fn names() -> Vec<String> {
        vec!["cats".to_string(), "dogs".to_string()]
    }

    fn green_png() -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_pixel(8, 8, Rgb([0u8, 255, 0]));
        encode_png(&DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn test_order_and_count_preserved() {
        let handle = red_vs_green_handle();
        let inputs = vec![
            BatchInput::new("red.png", red_pixel_png(), "image/png"),
            BatchInput::new("green.png", green_png(), "image/png"),
            BatchInput::new("red2.png", red_pixel_png(), "image/png"),
        ];

        let batch = predict_batch(&handle, &inputs, &names());
        assert_eq!(batch.total_files, 3);
        assert_eq!(batch.results.len(), 3);

        let filenames: Vec<&str> = batch.results.iter().map(|r| r.filename()).collect();
        assert_eq!(filenames, vec!["red.png", "green.png", "red2.png"]);

        let classes: Vec<usize> = batch
            .results
            .iter()
            .map(|r| match r {
                BatchItemOutcome::Success { prediction, .. } => prediction.predicted_class_idx,
                BatchItemOutcome::Failure { error, .. } => panic!("unexpected failure: {}", error),
            })
            .collect();
        assert_eq!(classes, vec![0, 1, 0]);
    }

    #[test]
    fn test_corrupt_item_isolated() {
        let handle = red_vs_green_handle();
        let inputs = vec![
            BatchInput::new("a.png", red_pixel_png(), "image/png"),
            BatchInput::new("broken.jpg", b"\xff\xd8 truncated".to_vec(), "image/jpeg"),
            BatchInput::new("b.png", green_png(), "image/png"),
            BatchInput::new("c.png", red_pixel_png(), "image/png"),
        ];

        let batch = predict_batch(&handle, &inputs, &names());
        assert_eq!(batch.total_files, 4);
        assert_eq!(batch.success_count(), 3);
        assert!(!batch.results[1].is_success());
        assert_eq!(batch.results[1].filename(), "broken.jpg");
        assert!(batch.results[2].is_success());
    }

    #[test]
    fn test_non_image_content_type() {
        let handle = red_vs_green_handle();
        // Valid PNG bytes, but declared as text: never decoded
        let inputs = vec![BatchInput::new("notes.txt", red_pixel_png(), "text/plain")];

        let batch = predict_batch(&handle, &inputs, &names());
        assert_eq!(
            batch.results,
            vec![BatchItemOutcome::Failure {
                filename: "notes.txt".to_string(),
                error: NOT_AN_IMAGE.to_string(),
            }]
        );
    }

    #[test]
    fn test_screen_failure_is_per_item() {
        let handle = red_vs_green_handle();
        let inputs = vec![
            BatchInput::new("keep.png", red_pixel_png(), "image/png"),
            BatchInput::new("drop.gif", red_pixel_png(), "image/png"),
        ];

        let batch = predict_batch_screened(&handle, &inputs, &names(), |input| {
            if input.filename.ends_with(".gif") {
                Err(InferenceError::invalid_input("extension not allowed"))
            } else {
                Ok(())
            }
        });

        assert!(batch.results[0].is_success());
        assert_eq!(
            batch.results[1],
            BatchItemOutcome::Failure {
                filename: "drop.gif".to_string(),
                error: "extension not allowed".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_batch() {
        let handle = red_vs_green_handle();
        let batch = predict_batch(&handle, &[], &names());
        assert_eq!(batch.total_files, 0);
        assert!(batch.results.is_empty());
    }
}

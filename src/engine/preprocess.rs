//! Image preprocessing for the classifier
//!
//! Decode, force RGB, resize to the network input, scale to [0, 1] and apply
//! ImageNet channel normalization. Output is NCHW with a batch of one.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;

use crate::error::{InferenceError, Result};

/// Network input size (width, height).
///
/// 244 rather than the usual 224: shipped weights were trained against this size.
pub const CLASSIFIER_INPUT_SIZE: (u32, u32) = (244, 244);

/// Per-channel mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Bilinear resampling, fixed so preprocessing is reproducible.
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// A normalized 1x3xHxW input tensor.
#[derive(Debug, Clone)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.0
    }
}

/// Turn raw image bytes into the classifier input tensor.
pub fn preprocess(data: &[u8]) -> Result<NormalizedTensor> {
    let image = decode_image(data)?;
    Ok(preprocess_image(&image))
}

/// Preprocess an already decoded image.
pub fn preprocess_image(image: &DynamicImage) -> NormalizedTensor {
    // Lossy: alpha is dropped, grayscale is replicated across channels,
    // and 16-bit/float images are quantized to 8 bits.
    let rgb = image.to_rgb8();
    let (target_w, target_h) = CLASSIFIER_INPUT_SIZE;

    // Resize, never crop: aspect ratio is not preserved
    let resized = imageops::resize(&rgb, target_w, target_h, RESIZE_FILTER);

    NormalizedTensor(image_to_nchw(&resized))
}

/// Decode image bytes; the format is guessed from the content.
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(data).map_err(InferenceError::InvalidImage)
}

/// Scale to [0, 1], normalize per channel and lay out as NCHW.
fn image_to_nchw(rgb: &RgbImage) -> Array4<f32> {
    let (width, height) = rgb.dimensions();

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    tensor
}

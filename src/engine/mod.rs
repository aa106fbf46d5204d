//! Inference engine module
//!
//! Provides the classification pipeline:
//! - Checkpoint decoding and the frozen model handle
//! - Deterministic image preprocessing
//! - Prediction and batch orchestration with per-item failure isolation

pub mod batch;
pub mod checkpoint;
pub mod model;
pub mod predictor;
pub mod preprocess;
pub mod slot;

pub use batch::{predict_batch, BatchInput, BatchItemOutcome, BatchResult};
pub use model::{Classifier, ModelHandle, ResNet18};
pub use predictor::{predict, PredictionResult};
pub use preprocess::{preprocess, NormalizedTensor};
pub use slot::ModelSlot;

//! Service layer types

use serde::{Deserialize, Serialize};

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: String,
    pub model_loaded: bool,
    pub num_classes: usize,
}

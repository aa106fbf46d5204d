//! Model Slot
//!
//! Write-once holder for the process-wide model handle. The binary installs
//! the handle before it starts serving; request handlers only ever read it.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use candle_core::Device;
use parking_lot::RwLock;
use tracing::info;

use super::model::ModelHandle;
use crate::error::{InferenceError, Result};

pub struct ModelSlot {
    handle: RwLock<Option<Arc<ModelHandle>>>,
    num_classes: usize,
}

impl ModelSlot {
    /// Create an empty slot for a model with `num_classes` outputs
    pub fn new(num_classes: usize) -> Self {
        Self {
            handle: RwLock::new(None),
            num_classes,
        }
    }

    /// Install the handle. Fails if one is already installed.
    pub fn install(&self, handle: ModelHandle) -> Result<()> {
        let mut guard = self.handle.write();
        if guard.is_some() {
            return Err(InferenceError::model_load(
                handle.source().unwrap_or_else(|| Path::new("<memory>")),
                "model already loaded",
            ));
        }
        if handle.num_classes() != self.num_classes {
            return Err(InferenceError::model_load(
                handle.source().unwrap_or_else(|| Path::new("<memory>")),
                format!(
                    "model has {} classes, expected {}",
                    handle.num_classes(),
                    self.num_classes
                ),
            ));
        }
        *guard = Some(Arc::new(handle));
        Ok(())
    }

    /// Load weights from `path` and install them
    pub fn load_from(&self, path: impl AsRef<Path>, device: &Device) -> Result<()> {
        let path = path.as_ref();
        info!("Loading model from {}", path.display());
        let start = Instant::now();

        let handle = ModelHandle::load(path, self.num_classes, device)?;
        self.install(handle)?;

        info!("Model loaded in {:?}", start.elapsed());
        Ok(())
    }

    /// Shared handle, or `ModelNotReady` before installation
    pub fn get(&self) -> Result<Arc<ModelHandle>> {
        self.handle.read().clone().ok_or(InferenceError::ModelNotReady)
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.read().is_some()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

//! Upload screening: size limit and extension allow-list

use std::path::Path;

use crate::config::UploadConfig;
use crate::error::{InferenceError, Result};

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    max_file_size: usize,
    allowed_extensions: Vec<String>,
}

impl UploadPolicy {
    pub fn new(max_file_size: usize, allowed_extensions: &[String]) -> Self {
        Self {
            max_file_size,
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.max_file_size, &config.allowed_extensions)
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Check one upload. Filenames without an extension are let through.
    pub fn check(&self, filename: &str, size: usize) -> Result<()> {
        if size > self.max_file_size {
            return Err(InferenceError::PayloadTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        if let Some(ext) = Path::new(filename).extension().and_then(|e| e.to_str()) {
            let ext = ext.to_lowercase();
            if !self.allowed_extensions.iter().any(|allowed| *allowed == ext) {
                return Err(InferenceError::invalid_input(format!(
                    "File extension .{} is not allowed",
                    ext
                )));
            }
        }

        Ok(())
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

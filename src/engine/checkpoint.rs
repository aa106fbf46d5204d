//! Checkpoint decoding
//!
//! Training scripts save weights in one of three shapes: the bare parameter
//! mapping, or a dictionary wrapping it under `state_dict` or
//! `model_state_dict`. Each shape is tried in that order and all of them end up
//! as the same flat name -> tensor map.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::error::{InferenceError, Result};

/// Where the parameter mapping lives inside a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    /// `{"state_dict": {...}, ...}`
    StateDict,
    /// `{"model_state_dict": {...}, ...}`
    ModelStateDict,
    /// The parameter mapping itself
    Raw,
}

impl CheckpointLayout {
    /// Resolution order
    pub const PRIORITY: [CheckpointLayout; 3] = [
        CheckpointLayout::StateDict,
        CheckpointLayout::ModelStateDict,
        CheckpointLayout::Raw,
    ];

    pub fn key(&self) -> Option<&'static str> {
        match self {
            CheckpointLayout::StateDict => Some("state_dict"),
            CheckpointLayout::ModelStateDict => Some("model_state_dict"),
            CheckpointLayout::Raw => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointLayout::StateDict => "state_dict",
            CheckpointLayout::ModelStateDict => "model_state_dict",
            CheckpointLayout::Raw => "raw",
        }
    }
}

/// On-disk container format, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// PyTorch pickle (`torch.save`)
    Pickle,
    SafeTensors,
}

impl ArtifactFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("safetensors") => ArtifactFormat::SafeTensors,
            _ => ArtifactFormat::Pickle,
        }
    }
}

/// A decoded parameter mapping
#[derive(Debug)]
pub struct Checkpoint {
    pub layout: CheckpointLayout,
    pub tensors: HashMap<String, Tensor>,
}

/// Read a checkpoint and resolve its layout.
pub fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    if !path.is_file() {
        return Err(InferenceError::model_load(path, "model file not found"));
    }

    match ArtifactFormat::from_path(path) {
        ArtifactFormat::Pickle => read_pickle(path),
        ArtifactFormat::SafeTensors => read_safetensors(path),
    }
}

fn read_pickle(path: &Path) -> Result<Checkpoint> {
    let mut last_error = None;

    for layout in CheckpointLayout::PRIORITY {
        // A missing wrapper key is an error from the reader; move on to the next shape
        match candle_core::pickle::read_all_with_key(path, layout.key()) {
            Ok(entries) if !entries.is_empty() => {
                debug!("Checkpoint {} resolved as {}", path.display(), layout.as_str());
                return Ok(Checkpoint {
                    layout,
                    tensors: entries.into_iter().collect(),
                });
            }
            Ok(_) => debug!("No tensors under layout {}", layout.as_str()),
            Err(e) => {
                debug!("Layout {} rejected: {}", layout.as_str(), e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => InferenceError::model_load_with(path, "unrecognized checkpoint format", e),
        None => InferenceError::model_load(path, "checkpoint contains no tensors"),
    })
}

fn read_safetensors(path: &Path) -> Result<Checkpoint> {
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)
        .map_err(|e| InferenceError::model_load_with(path, "unreadable safetensors file", e))?;

    resolve_flat(tensors).ok_or_else(|| InferenceError::model_load(path, "checkpoint contains no tensors"))
}

/// Resolve the layout of an already flat mapping.
///
/// Flat formats cannot nest dictionaries, so a wrapper shows up as a
/// `state_dict.` / `model_state_dict.` prefix on every parameter name.
pub fn resolve_flat(tensors: HashMap<String, Tensor>) -> Option<Checkpoint> {
    for layout in CheckpointLayout::PRIORITY {
        match layout.key() {
            Some(key) => {
                let prefix = format!("{}.", key);
                if !tensors.keys().any(|name| name.starts_with(&prefix)) {
                    continue;
                }
                let unwrapped: HashMap<String, Tensor> = tensors
                    .into_iter()
                    .filter_map(|(name, t)| name.strip_prefix(&prefix).map(|n| (n.to_string(), t)))
                    .collect();
                return Some(Checkpoint {
                    layout,
                    tensors: unwrapped,
                });
            }
            None if !tensors.is_empty() => {
                return Some(Checkpoint { layout, tensors });
            }
            None => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn params(names: &[&str]) -> HashMap<String, Tensor> {
        names
            .iter()
            .map(|n| (n.to_string(), Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap()))
            .collect()
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(
            CheckpointLayout::PRIORITY,
            [CheckpointLayout::StateDict, CheckpointLayout::ModelStateDict, CheckpointLayout::Raw]
        );
        assert_eq!(CheckpointLayout::Raw.key(), None);
    }

    #[test]
    fn test_resolve_raw() {
        let ckpt = resolve_flat(params(&["fc.weight", "fc.bias"])).unwrap();
        assert_eq!(ckpt.layout, CheckpointLayout::Raw);
        assert!(ckpt.tensors.contains_key("fc.weight"));
    }

    #[test]
    fn test_resolve_wrapped() {
        let ckpt = resolve_flat(params(&["model_state_dict.fc.weight", "epoch"])).unwrap();
        assert_eq!(ckpt.layout, CheckpointLayout::ModelStateDict);
        assert_eq!(ckpt.tensors.len(), 1);
        assert!(ckpt.tensors.contains_key("fc.weight"));
    }

    #[test]
    fn test_state_dict_wins_over_model_state_dict() {
        let ckpt = resolve_flat(params(&["state_dict.a", "model_state_dict.b"])).unwrap();
        assert_eq!(ckpt.layout, CheckpointLayout::StateDict);
        assert!(ckpt.tensors.contains_key("a"));
        assert!(!ckpt.tensors.contains_key("b"));
    }

    #[test]
    fn test_empty_is_unrecognized() {
        assert!(resolve_flat(HashMap::new()).is_none());
    }

    #[test]
    fn test_missing_file() {
        let err = read_checkpoint(Path::new("no/such/model.pth")).unwrap_err();
        assert!(matches!(err, InferenceError::ModelLoad { .. }));
    }

    #[test]
    fn test_garbage_pickle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pth");
        std::fs::write(&path, b"this is not a torch checkpoint").unwrap();

        let err = read_checkpoint(&path).unwrap_err();
        assert!(matches!(err, InferenceError::ModelLoad { .. }));
    }

    /// Small `torch.save` archives holding `fc.weight` (2x3) and `fc.bias` (2)
    fn torch_fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("testdata/checkpoints")
            .join(name)
    }

    fn bias(ckpt: &Checkpoint) -> Vec<f32> {
        ckpt.tensors["fc.bias"].to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_pickle_layouts() {
        let cases = [
            ("raw.pth", CheckpointLayout::Raw),
            ("state_dict.pth", CheckpointLayout::StateDict),
            ("model_state_dict.pth", CheckpointLayout::ModelStateDict),
        ];

        for (file, expected) in cases {
            let ckpt = read_checkpoint(&torch_fixture(file)).unwrap();
            assert_eq!(ckpt.layout, expected, "{}", file);
            assert_eq!(ckpt.tensors.len(), 2, "{}", file);
            assert_eq!(ckpt.tensors["fc.weight"].dims(), &[2, 3]);
            assert_eq!(bias(&ckpt), vec![0.5, -0.5]);
        }
    }

    #[test]
    fn test_pickle_state_dict_wins_over_model_state_dict() {
        // model_state_dict comes first in the file and carries a bias of [9, 9]
        let ckpt = read_checkpoint(&torch_fixture("both_wrappers.pth")).unwrap();
        assert_eq!(ckpt.layout, CheckpointLayout::StateDict);
        assert_eq!(bias(&ckpt), vec![0.5, -0.5]);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ArtifactFormat::from_path(Path::new("m.safetensors")), ArtifactFormat::SafeTensors);
        assert_eq!(ArtifactFormat::from_path(Path::new("m.pth")), ArtifactFormat::Pickle);
        assert_eq!(ArtifactFormat::from_path(Path::new("model")), ArtifactFormat::Pickle);
    }
}

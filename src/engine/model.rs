//! Model handle and the ResNet-18 classifier
//!
//! The handle is built once from a weights artifact and only read afterwards.
//! Batch norm always runs on its running statistics and forward outputs are
//! detached, so inference never builds an autograd graph.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{batch_norm, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, VarBuilder};
use tracing::info;

use super::checkpoint::{read_checkpoint, CheckpointLayout};
use crate::error::{InferenceError, Result};

const BN_EPS: f64 = 1e-5;

/// (in channels, out channels, stride) of the first block in each stage
const STAGES: [(usize, usize, usize); 4] = [(64, 64, 1), (64, 128, 2), (128, 256, 2), (256, 512, 2)];

/// A network mapping a 1x3xHxW input to 1xC class scores.
///
/// Implementations must be safe to call concurrently through `&self`.
pub trait Classifier: Send + Sync {
    fn num_classes(&self) -> usize;

    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor>;
}

/// Parse a device string: `cpu`, `cuda`/`gpu`, or `cuda:N`.
pub fn parse_device(device: &str) -> anyhow::Result<Device> {
    match device.to_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        #[cfg(feature = "cuda")]
        "cuda" | "gpu" => Ok(Device::new_cuda(0)?),
        #[cfg(feature = "cuda")]
        other if other.starts_with("cuda:") => {
            let ordinal: usize = other["cuda:".len()..].parse()?;
            Ok(Device::new_cuda(ordinal)?)
        }
        #[cfg(not(feature = "cuda"))]
        other if other == "cuda" || other == "gpu" || other.starts_with("cuda:") => {
            anyhow::bail!("CUDA support not enabled. Compile with --features cuda")
        }
        other => anyhow::bail!("unknown device {:?}", other),
    }
}

/// Residual block with two 3x3 convolutions
struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl BasicBlock {
    fn load(c_in: usize, c_out: usize, stride: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv1 = conv2d_no_bias(c_in, c_out, 3, conv_cfg(1, stride), vb.pp("conv1"))?;
        let bn1 = batch_norm(c_out, BN_EPS, vb.pp("bn1"))?;
        let conv2 = conv2d_no_bias(c_out, c_out, 3, conv_cfg(1, 1), vb.pp("conv2"))?;
        let bn2 = batch_norm(c_out, BN_EPS, vb.pp("bn2"))?;

        let downsample = if stride != 1 || c_in != c_out {
            let ds = vb.pp("downsample");
            Some((
                conv2d_no_bias(c_in, c_out, 1, conv_cfg(0, stride), ds.pp("0"))?,
                batch_norm(c_out, BN_EPS, ds.pp("1"))?,
            ))
        } else {
            None
        };

        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let ys = xs
            .apply(&self.conv1)?
            .apply_t(&self.bn1, false)?
            .relu()?
            .apply(&self.conv2)?
            .apply_t(&self.bn2, false)?;

        let shortcut = match &self.downsample {
            Some((conv, bn)) => xs.apply(conv)?.apply_t(bn, false)?,
            None => xs.clone(),
        };

        (ys + shortcut)?.relu()
    }
}

fn conv_cfg(padding: usize, stride: usize) -> Conv2dConfig {
    Conv2dConfig {
        padding,
        stride,
        ..Default::default()
    }
}

/// ResNet-18 with torchvision parameter names and a replaced `fc` head.
pub struct ResNet18 {
    conv1: Conv2d,
    bn1: BatchNorm,
    blocks: Vec<BasicBlock>,
    fc: Linear,
    num_classes: usize,
}

impl ResNet18 {
    pub fn load(num_classes: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv1 = conv2d_no_bias(3, 64, 7, conv_cfg(3, 2), vb.pp("conv1"))?;
        let bn1 = batch_norm(64, BN_EPS, vb.pp("bn1"))?;

        let mut blocks = Vec::with_capacity(STAGES.len() * 2);
        for (i, &(c_in, c_out, stride)) in STAGES.iter().enumerate() {
            let stage = vb.pp(format!("layer{}", i + 1));
            blocks.push(BasicBlock::load(c_in, c_out, stride, stage.pp("0"))?);
            blocks.push(BasicBlock::load(c_out, c_out, 1, stage.pp("1"))?);
        }

        let fc = linear(512, num_classes, vb.pp("fc"))?;

        Ok(Self {
            conv1,
            bn1,
            blocks,
            fc,
            num_classes,
        })
    }
}

impl Classifier for ResNet18 {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        // Stem: 7x7/2 conv, then 3x3/2 max pool with one pixel of padding.
        // Zero padding is equivalent to -inf here because inputs are post-ReLU.
        let mut xs = input
            .apply(&self.conv1)?
            .apply_t(&self.bn1, false)?
            .relu()?
            .pad_with_zeros(D::Minus1, 1, 1)?
            .pad_with_zeros(D::Minus2, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;

        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }

        // Global average pool -> (batch, 512)
        let pooled = xs.mean(D::Minus1)?.mean(D::Minus1)?;
        self.fc.forward(&pooled)
    }
}

/// Loaded, frozen classifier shared by every request.
pub struct ModelHandle {
    classifier: Box<dyn Classifier>,
    device: Device,
    source: Option<PathBuf>,
    layout: Option<CheckpointLayout>,
}

impl ModelHandle {
    /// Load ResNet-18 weights from a checkpoint.
    pub fn load(path: impl AsRef<Path>, num_classes: usize, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let checkpoint = read_checkpoint(path)?;
        let layout = checkpoint.layout;

        let vb = VarBuilder::from_tensors(checkpoint.tensors, DType::F32, device);
        let network = ResNet18::load(num_classes, vb).map_err(|e| {
            InferenceError::model_load_with(path, "checkpoint does not match the ResNet-18 layout", e)
        })?;

        info!(
            "Loaded ResNet-18 ({} classes) from {} [{} checkpoint]",
            num_classes,
            path.display(),
            layout.as_str()
        );

        Ok(Self {
            classifier: Box::new(network),
            device: device.clone(),
            source: Some(path.to_path_buf()),
            layout: Some(layout),
        })
    }

    /// Wrap an already constructed classifier.
    pub fn from_classifier(classifier: impl Classifier + 'static, device: Device) -> Self {
        Self {
            classifier: Box::new(classifier),
            device,
            source: None,
            layout: None,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn layout(&self) -> Option<CheckpointLayout> {
        self.layout
    }

    /// Run one forward pass; the result carries no autograd history.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.classifier
            .forward(input)
            .map(|t| t.detach())
            .map_err(|e| InferenceError::inference("forward pass", e))
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("num_classes", &self.num_classes())
            .field("device", &self.device)
            .field("source", &self.source)
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use candle_nn::VarMap;
    use std::collections::HashMap;

    /// A handle whose parameters are all zero; every input scores 0 for each class.
    pub(crate) fn zero_resnet_handle() -> ModelHandle {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let network = ResNet18::load(2, vb).unwrap();
        ModelHandle::from_classifier(network, Device::Cpu)
    }

    /// Write freshly initialized ResNet-18 weights, optionally under a wrapper prefix.
    fn write_weights(path: &Path, prefix: Option<&str>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        ResNet18::load(2, vb).unwrap();

        let tensors: HashMap<String, Tensor> = varmap
            .data()
            .lock()
            .unwrap()
            .iter()
            .map(|(name, var)| {
                let name = match prefix {
                    Some(p) => format!("{}.{}", p, name),
                    None => name.clone(),
                };
                (name, var.as_tensor().clone())
            })
            .collect();

        candle_core::safetensors::save(&tensors, path).unwrap();
    }

    #[test]
    fn test_zero_network_output_shape() {
        let handle = zero_resnet_handle();
        let input = Tensor::zeros((1, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
        let logits = handle.forward(&input).unwrap();

        assert_eq!(logits.dims(), &[1, 2]);
        assert_eq!(logits.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_load_each_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            (None, CheckpointLayout::Raw),
            (Some("state_dict"), CheckpointLayout::StateDict),
            (Some("model_state_dict"), CheckpointLayout::ModelStateDict),
        ];

        for (i, (prefix, expected)) in cases.into_iter().enumerate() {
            let path = dir.path().join(format!("weights_{}.safetensors", i));
            write_weights(&path, prefix);

            let handle = ModelHandle::load(&path, 2, &Device::Cpu).unwrap();
            assert_eq!(handle.layout(), Some(expected));
            assert_eq!(handle.num_classes(), 2);
            assert_eq!(handle.source(), Some(path.as_path()));
        }
    }

    #[test]
    fn test_wrong_head_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");
        write_weights(&path, None);

        // fc has 2 outputs on disk
        let err = ModelHandle::load(&path, 3, &Device::Cpu).unwrap_err();
        assert!(matches!(err, InferenceError::ModelLoad { .. }));
    }

    #[test]
    fn test_foreign_parameters_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.safetensors");
        let tensors: HashMap<String, Tensor> = [(
            "encoder.weight".to_string(),
            Tensor::zeros((4, 4), DType::F32, &Device::Cpu).unwrap(),
        )]
        .into_iter()
        .collect();
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let err = ModelHandle::load(&path, 2, &Device::Cpu).unwrap_err();
        assert!(matches!(err, InferenceError::ModelLoad { .. }));
    }

    #[test]
    fn test_missing_artifact() {
        let err = ModelHandle::load("models/absent.pth", 2, &Device::Cpu).unwrap_err();
        assert!(matches!(err, InferenceError::ModelLoad { .. }));
    }

    #[test]
    fn test_parse_device() {
        assert!(matches!(parse_device("CPU").unwrap(), Device::Cpu));
        assert!(parse_device("tpu").is_err());
    }
}

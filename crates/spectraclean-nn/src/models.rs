//! Encoder/decoder networks for hyperspectral cubes.
//!
//! Both models share one body: `depth` blocks of conv + ReLU + 2x2 max-pool,
//! mirrored by `depth` stride-2 transpose convolutions. They differ only in
//! the head: the denoiser maps back to the input bands through a sigmoid,
//! the segmenter emits raw per-class logits.

use crate::conv::{Conv2D, ConvTranspose2D, MaxPool2D};
use crate::error::{NnError, NnResult};
use crate::layers::{ReLULayer, SigmoidLayer};
use crate::sequential::Sequential;
use log::debug;
use serde::{Deserialize, Serialize};
use spectraclean_autodiff::{with_no_grad, Variable};
use spectraclean_core::Tensor;

/// What a model is trained to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Reconstruct the (normalized) input cube.
    Denoise,
    /// Per-pixel class logits.
    Segment,
}

/// Architecture description, stored alongside weights in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub task: Task,
    pub in_channels: usize,
    /// Input bands for [`Task::Denoise`], number of classes for [`Task::Segment`].
    pub out_channels: usize,
    pub hidden_channels: Vec<usize>,
    pub seed: u64,
}

impl ModelSpec {
    pub fn denoising(in_channels: usize, hidden_channels: Vec<usize>, seed: u64) -> Self {
        ModelSpec {
            task: Task::Denoise,
            in_channels,
            out_channels: in_channels,
            hidden_channels,
            seed,
        }
    }

    pub fn segmentation(
        in_channels: usize,
        num_classes: usize,
        hidden_channels: Vec<usize>,
        seed: u64,
    ) -> Self {
        ModelSpec {
            task: Task::Segment,
            in_channels,
            out_channels: num_classes,
            hidden_channels,
            seed,
        }
    }

    /// Number of pooling stages.
    pub fn depth(&self) -> usize {
        self.hidden_channels.len()
    }

    /// Height and width must be multiples of this.
    pub fn spatial_multiple(&self) -> usize {
        1 << self.depth()
    }

    pub fn validate(&self) -> NnResult<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(NnError::InvalidSpec("channel counts must be positive".into()));
        }
        if self.hidden_channels.is_empty() || self.hidden_channels.contains(&0) {
            return Err(NnError::InvalidSpec(format!(
                "hidden widths must be a non-empty list of positive values, got {:?}",
                self.hidden_channels
            )));
        }
        if self.task == Task::Denoise && self.out_channels != self.in_channels {
            return Err(NnError::InvalidSpec(
                "a denoiser must output as many bands as it reads".into(),
            ));
        }
        Ok(())
    }
}

/// Common interface the training loop and checkpointing work against.
pub trait Model {
    fn spec(&self) -> &ModelSpec;

    /// `[B, C, H, W]` in, `[B, out_channels, H, W]` out.
    fn forward(&self, input: &Variable) -> NnResult<Variable>;

    fn named_parameters(&self) -> Vec<(String, &Variable)>;

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Variable)>;

    fn parameters_mut(&mut self) -> Vec<&mut Variable> {
        self.named_parameters_mut().into_iter().map(|(_, p)| p).collect()
    }

    /// Re-register every parameter on the current tape. Call after each
    /// graph reset, before the forward pass.
    fn attach_parameters(&mut self) {
        for p in self.parameters_mut() {
            p.reattach();
        }
    }

    /// Snapshot of all parameters by name.
    fn state_dict(&self) -> Vec<(String, Tensor<f64>)> {
        self.named_parameters()
            .into_iter()
            .map(|(name, p)| (name, p.data.clone()))
            .collect()
    }

    /// Overwrite parameters from a snapshot. Every parameter must be present
    /// with a matching shape; extra entries are ignored.
    fn load_state_dict(&mut self, state: &[(String, Tensor<f64>)]) -> NnResult<()> {
        for (name, param) in self.named_parameters_mut() {
            let (_, tensor) = state
                .iter()
                .find(|(n, _)| *n == name)
                .ok_or_else(|| NnError::MissingParameter(name.clone()))?;
            if tensor.shape_vec() != param.shape_vec() {
                return Err(NnError::ParameterShape {
                    name,
                    expected: param.shape_vec(),
                    got: tensor.shape_vec(),
                });
            }
            param.data = tensor.clone();
        }
        Ok(())
    }

    fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.numel()).sum()
    }
}

// ─── Shared body ────────────────────────────────────────────────────────────

struct EncoderDecoder {
    spec: ModelSpec,
    encoder: Sequential,
    decoder: Sequential,
}

impl EncoderDecoder {
    fn build(spec: ModelSpec) -> NnResult<Self> {
        spec.validate()?;
        let hidden = &spec.hidden_channels;
        let mut layer_seed = spec.seed;
        let mut next_seed = || {
            let s = layer_seed;
            layer_seed = layer_seed.wrapping_add(1);
            s
        };

        let mut encoder = Sequential::new();
        let mut prev = spec.in_channels;
        for &width in hidden {
            encoder = encoder
                .add(Box::new(Conv2D::new(prev, width, 3, 1, 1, next_seed())))
                .add(Box::new(ReLULayer::new()))
                .add(Box::new(MaxPool2D::new(2)));
            prev = width;
        }

        let mut decoder = Sequential::new();
        for i in (0..hidden.len()).rev() {
            let out = if i == 0 { spec.out_channels } else { hidden[i - 1] };
            let up = ConvTranspose2D::new(hidden[i], out, 2, 2, 0, next_seed());
            decoder = decoder.add(Box::new(up));
            if i > 0 {
                decoder = decoder.add(Box::new(ReLULayer::new()));
            } else if spec.task == Task::Denoise {
                decoder = decoder.add(Box::new(SigmoidLayer::new()));
            }
        }

        debug!(
            "built {:?} network: {} -> {:?} -> {}",
            spec.task, spec.in_channels, spec.hidden_channels, spec.out_channels
        );
        Ok(EncoderDecoder {
            spec,
            encoder,
            decoder,
        })
    }

    fn check_input(&self, input: &Variable) -> NnResult<()> {
        let (_, c, h, w) = input.data.shape().nchw()?;
        if c != self.spec.in_channels {
            return Err(NnError::Channels {
                expected: self.spec.in_channels,
                got: c,
            });
        }
        let multiple = self.spec.spatial_multiple();
        if h == 0 || w == 0 || h % multiple != 0 || w % multiple != 0 {
            return Err(NnError::SpatialSize {
                height: h,
                width: w,
                multiple,
                depth: self.spec.depth(),
            });
        }
        Ok(())
    }

    fn forward(&self, input: &Variable) -> NnResult<Variable> {
        self.check_input(input)?;
        let code = self.encoder.forward(input)?;
        Ok(self.decoder.forward(&code)?)
    }

    fn named_parameters(&self) -> Vec<(String, &Variable)> {
        let enc = self.encoder.named_parameters().into_iter();
        let dec = self.decoder.named_parameters().into_iter();
        let enc = enc.map(|(n, p)| (format!("encoder.{}", n), p));
        let dec = dec.map(|(n, p)| (format!("decoder.{}", n), p));
        enc.chain(dec).collect()
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Variable)> {
        let enc = self.encoder.named_parameters_mut().into_iter();
        let dec = self.decoder.named_parameters_mut().into_iter();
        let enc = enc.map(|(n, p)| (format!("encoder.{}", n), p));
        let dec = dec.map(|(n, p)| (format!("decoder.{}", n), p));
        enc.chain(dec).collect()
    }
}

// ─── DenoisingCnn ───────────────────────────────────────────────────────────

/// Convolutional autoencoder that reconstructs its input; outputs lie in [0, 1].
pub struct DenoisingCnn {
    body: EncoderDecoder,
}

impl DenoisingCnn {
    pub fn new(in_channels: usize, hidden_channels: Vec<usize>, seed: u64) -> NnResult<Self> {
        Self::from_spec(ModelSpec::denoising(in_channels, hidden_channels, seed))
    }

    pub fn from_spec(spec: ModelSpec) -> NnResult<Self> {
        if spec.task != Task::Denoise {
            return Err(NnError::InvalidSpec("expected a denoising spec".into()));
        }
        Ok(DenoisingCnn {
            body: EncoderDecoder::build(spec)?,
        })
    }

    /// Denoise one `[C, H, W]` cube without recording a tape.
    pub fn denoise(&self, image: &Tensor<f64>) -> NnResult<Tensor<f64>> {
        let batch = image.unsqueeze(0)?;
        let out = with_no_grad(|| self.forward(&Variable::input(batch)))?;
        Ok(out.data.index_first(0)?)
    }
}

impl Model for DenoisingCnn {
    fn spec(&self) -> &ModelSpec {
        &self.body.spec
    }

    fn forward(&self, input: &Variable) -> NnResult<Variable> {
        self.body.forward(input)
    }

    fn named_parameters(&self) -> Vec<(String, &Variable)> {
        self.body.named_parameters()
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Variable)> {
        self.body.named_parameters_mut()
    }
}

// ─── SegmentationCnn ────────────────────────────────────────────────────────

/// Same body as [`DenoisingCnn`], ending in `num_classes` logits per pixel.
pub struct SegmentationCnn {
    body: EncoderDecoder,
}

impl SegmentationCnn {
    pub fn new(
        in_channels: usize,
        num_classes: usize,
        hidden_channels: Vec<usize>,
        seed: u64,
    ) -> NnResult<Self> {
        Self::from_spec(ModelSpec::segmentation(in_channels, num_classes, hidden_channels, seed))
    }

    pub fn from_spec(spec: ModelSpec) -> NnResult<Self> {
        if spec.task != Task::Segment {
            return Err(NnError::InvalidSpec("expected a segmentation spec".into()));
        }
        Ok(SegmentationCnn {
            body: EncoderDecoder::build(spec)?,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.body.spec.out_channels
    }

    /// Per-pixel argmax class of a `[B, C, H, W]` batch, shape `[B, H, W]`.
    pub fn predict_labels(&self, input: &Tensor<f64>) -> NnResult<Tensor<f64>> {
        let logits = with_no_grad(|| self.forward(&Variable::input(input.clone())))?;
        Ok(logits.data.argmax_axis(1)?)
    }
}

impl Model for SegmentationCnn {
    fn spec(&self) -> &ModelSpec {
        &self.body.spec
    }

    fn forward(&self, input: &Variable) -> NnResult<Variable> {
        self.body.forward(input)
    }

    fn named_parameters(&self) -> Vec<(String, &Variable)> {
        self.body.named_parameters()
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Variable)> {
        self.body.named_parameters_mut()
    }
}

/// Build whichever model `spec.task` names.
pub fn build_model(spec: ModelSpec) -> NnResult<Box<dyn Model>> {
    Ok(match spec.task {
        Task::Denoise => Box::new(DenoisingCnn::from_spec(spec)?),
        Task::Segment => Box::new(SegmentationCnn::from_spec(spec)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectraclean_autodiff::{backward, reset_graph};

    fn cube(c: usize, h: usize, w: usize) -> Tensor<f64> {
        Tensor::uniform(vec![1, c, h, w], 0.0, 1.0, Some(99))
    }

    #[test]
    fn test_denoiser_preserves_shape_and_range() {
        reset_graph();
        let model = DenoisingCnn::new(5, vec![4, 6], 42).unwrap();
        let out = model.forward(&Variable::input(cube(5, 8, 12))).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 5, 8, 12]);
        assert!(out.data.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_rejects_indivisible_spatial_size() {
        reset_graph();
        let model = DenoisingCnn::new(3, vec![4, 4], 42).unwrap();
        let err = model.forward(&Variable::input(cube(3, 6, 8))).unwrap_err();
        assert!(matches!(err, NnError::SpatialSize { multiple: 4, .. }));
    }

    #[test]
    fn test_rejects_wrong_band_count() {
        reset_graph();
        let model = DenoisingCnn::new(3, vec![4], 42).unwrap();
        let err = model.forward(&Variable::input(cube(2, 4, 4))).unwrap_err();
        assert!(matches!(err, NnError::Channels { expected: 3, got: 2 }));
    }

    #[test]
    fn test_parameter_names_are_stable() {
        reset_graph();
        let model = DenoisingCnn::new(3, vec![4, 8], 1).unwrap();
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "encoder.0.weight",
                "encoder.0.bias",
                "encoder.3.weight",
                "encoder.3.bias",
                "decoder.0.weight",
                "decoder.0.bias",
                "decoder.2.weight",
                "decoder.2.bias",
            ]
        );
        // 3*4*9+4 + 4*8*9+8 + 8*4*4+4 + 4*3*4+3
        assert_eq!(model.num_parameters(), 112 + 296 + 132 + 51);
    }

    #[test]
    fn test_same_seed_same_weights() {
        reset_graph();
        let a = DenoisingCnn::new(3, vec![4], 7).unwrap();
        let b = DenoisingCnn::new(3, vec![4], 7).unwrap();
        assert_eq!(a.state_dict(), b.state_dict());
    }

    #[test]
    fn test_state_dict_round_trip() {
        reset_graph();
        let source = DenoisingCnn::new(3, vec![4], 1).unwrap();
        let mut target = DenoisingCnn::new(3, vec![4], 2).unwrap();
        target.load_state_dict(&source.state_dict()).unwrap();

        let x = cube(3, 4, 4).index_first(0).unwrap();
        assert_eq!(source.denoise(&x).unwrap(), target.denoise(&x).unwrap());
    }

    #[test]
    fn test_load_state_dict_rejects_wrong_shape() {
        reset_graph();
        let source = DenoisingCnn::new(3, vec![8], 1).unwrap();
        let mut target = DenoisingCnn::new(3, vec![4], 1).unwrap();
        let err = target.load_state_dict(&source.state_dict()).unwrap_err();
        assert!(matches!(err, NnError::ParameterShape { .. }));
    }

    #[test]
    fn test_segmenter_logits_and_labels() {
        reset_graph();
        let model = SegmentationCnn::new(4, 3, vec![6], 5).unwrap();
        let x = cube(4, 4, 6);
        let logits = model.forward(&Variable::input(x.clone())).unwrap();
        assert_eq!(logits.shape_vec(), vec![1, 3, 4, 6]);

        let labels = model.predict_labels(&x).unwrap();
        assert_eq!(labels.shape_vec(), vec![1, 4, 6]);
        assert!(labels.data().iter().all(|&l| l == 0.0 || l == 1.0 || l == 2.0));
    }

    #[test]
    fn test_gradients_reach_every_parameter() {
        reset_graph();
        let mut model = build_model(ModelSpec::denoising(2, vec![3, 3], 3)).unwrap();
        model.attach_parameters();
        let x = Variable::input(cube(2, 4, 4));
        let y = model.forward(&x).unwrap();
        let diff = y.sub(&x).unwrap();
        let loss = diff.mul(&diff).unwrap().mean();
        let grads = backward(&loss).unwrap();
        for (name, p) in model.named_parameters() {
            let g = grads.get(&p.node_id).unwrap_or_else(|| panic!("no gradient for {}", name));
            assert_eq!(g.shape_vec(), p.shape_vec());
        }
    }

    #[test]
    fn test_invalid_specs() {
        assert!(DenoisingCnn::new(3, vec![], 1).is_err());
        assert!(SegmentationCnn::new(3, 0, vec![4], 1).is_err());
        assert!(DenoisingCnn::from_spec(ModelSpec::segmentation(3, 2, vec![4], 1)).is_err());
    }
}

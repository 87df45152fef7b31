use super::layers::Layer;
use spectraclean_autodiff::Variable;
use spectraclean_core::{Tensor, TensorResult};

/// Uniform init in `[-k, k]` with `k = sqrt(2 / fan_in)`.
fn he_uniform(shape: Vec<usize>, fan_in: usize, seed: u64) -> Tensor<f64> {
    let k = (2.0 / fan_in.max(1) as f64).sqrt();
    Tensor::uniform(shape, -k, k, Some(seed))
}

/// 2D Convolution layer.
///
/// Input shape:  [batch, in_channels, height, width]
/// Output shape: [batch, out_channels, out_h, out_w]
pub struct Conv2D {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub weight: Variable, // [out_channels, in_channels, kH, kW]
    pub bias: Variable,   // [out_channels]
}

impl Conv2D {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        seed: u64,
    ) -> Self {
        let w = he_uniform(
            vec![out_channels, in_channels, kernel_size, kernel_size],
            in_channels * kernel_size * kernel_size,
            seed,
        );
        let b = Tensor::zeros(vec![out_channels]);

        Conv2D {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            weight: Variable::param(w),
            bias: Variable::param(b),
        }
    }
}

impl Layer for Conv2D {
    fn forward(&self, input: &Variable) -> TensorResult<Variable> {
        input.conv2d(&self.weight, &self.bias, self.stride, self.padding)
    }

    fn named_parameters(&self) -> Vec<(&'static str, &Variable)> {
        vec![("weight", &self.weight), ("bias", &self.bias)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(&'static str, &mut Variable)> {
        vec![("weight", &mut self.weight), ("bias", &mut self.bias)]
    }
}

/// 2D transpose convolution (learned upsampling).
///
/// Output size per axis: `(in - 1) * stride + kernel_size - 2 * padding`.
pub struct ConvTranspose2D {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub weight: Variable, // [in_channels, out_channels, kH, kW]
    pub bias: Variable,   // [out_channels]
}

impl ConvTranspose2D {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        seed: u64,
    ) -> Self {
        let w = he_uniform(
            vec![in_channels, out_channels, kernel_size, kernel_size],
            in_channels * kernel_size * kernel_size,
            seed,
        );
        let b = Tensor::zeros(vec![out_channels]);

        ConvTranspose2D {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            weight: Variable::param(w),
            bias: Variable::param(b),
        }
    }
}

impl Layer for ConvTranspose2D {
    fn forward(&self, input: &Variable) -> TensorResult<Variable> {
        input.conv_transpose2d(&self.weight, &self.bias, self.stride, self.padding)
    }

    fn named_parameters(&self) -> Vec<(&'static str, &Variable)> {
        vec![("weight", &self.weight), ("bias", &self.bias)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(&'static str, &mut Variable)> {
        vec![("weight", &mut self.weight), ("bias", &mut self.bias)]
    }
}

/// Max Pooling 2D with stride equal to the window.
pub struct MaxPool2D {
    pub kernel_size: usize,
}

impl MaxPool2D {
    pub fn new(kernel_size: usize) -> Self {
        MaxPool2D { kernel_size }
    }
}

impl Layer for MaxPool2D {
    fn forward(&self, input: &Variable) -> TensorResult<Variable> {
        input.max_pool2d(self.kernel_size)
    }
}

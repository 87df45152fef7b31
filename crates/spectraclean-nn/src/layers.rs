use spectraclean_autodiff::Variable;
use spectraclean_core::TensorResult;

/// Trait for a neural network layer.
pub trait Layer {
    /// Forward pass.
    fn forward(&self, input: &Variable) -> TensorResult<Variable>;

    /// Trainable parameters with their local names (`"weight"`, `"bias"`).
    fn named_parameters(&self) -> Vec<(&'static str, &Variable)> {
        vec![]
    }

    fn named_parameters_mut(&mut self) -> Vec<(&'static str, &mut Variable)> {
        vec![]
    }

    /// Return all trainable parameters.
    fn parameters(&self) -> Vec<&Variable> {
        self.named_parameters().into_iter().map(|(_, p)| p).collect()
    }
}

/// ReLU activation layer.
pub struct ReLULayer;

impl ReLULayer {
    pub fn new() -> Self { ReLULayer }
}

impl Layer for ReLULayer {
    fn forward(&self, input: &Variable) -> TensorResult<Variable> { Ok(input.relu()) }
}

impl Default for ReLULayer {
    fn default() -> Self { Self::new() }
}

/// Sigmoid activation layer.
pub struct SigmoidLayer;

impl SigmoidLayer {
    pub fn new() -> Self { SigmoidLayer }
}

impl Layer for SigmoidLayer {
    fn forward(&self, input: &Variable) -> TensorResult<Variable> { Ok(input.sigmoid()) }
}

impl Default for SigmoidLayer {
    fn default() -> Self { Self::new() }
}

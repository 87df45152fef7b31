use crate::layers::Layer;
use spectraclean_autodiff::Variable;
use spectraclean_core::TensorResult;

/// Sequential model: chains layers in order.
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    /// Add a layer to the model.
    pub fn add(mut self, layer: Box<dyn Layer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Forward pass through all layers.
    pub fn forward(&self, input: &Variable) -> TensorResult<Variable> {
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    /// Parameters named `<layer index>.<local name>`, e.g. `"3.weight"`.
    pub fn named_parameters(&self) -> Vec<(String, &Variable)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                layer
                    .named_parameters()
                    .into_iter()
                    .map(move |(name, p)| (format!("{}.{}", i, name), p))
            })
            .collect()
    }

    pub fn named_parameters_mut(&mut self) -> Vec<(String, &mut Variable)> {
        self.layers
            .iter_mut()
            .enumerate()
            .flat_map(|(i, layer)| {
                layer
                    .named_parameters_mut()
                    .into_iter()
                    .map(move |(name, p)| (format!("{}.{}", i, name), p))
            })
            .collect()
    }

    /// Collect all trainable parameters from all layers.
    pub fn parameters(&self) -> Vec<&Variable> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

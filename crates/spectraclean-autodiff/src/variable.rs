use crate::graph::{with_graph, NodeId, Op};
use crate::no_grad::is_grad_enabled;
use spectraclean_core::conv;
use spectraclean_core::{Tensor, TensorResult};

/// A variable in the computation graph: a tensor plus the node that produced it.
#[derive(Debug, Clone)]
pub struct Variable {
    pub node_id: NodeId,
    pub data: Tensor<f64>,
}

impl Variable {
    /// Create a new leaf variable. Under [`with_no_grad`](crate::with_no_grad)
    /// the leaf is detached and not recorded.
    pub fn new(data: Tensor<f64>, requires_grad: bool) -> Self {
        let node_id = if is_grad_enabled() {
            with_graph(|g| g.add_node(Op::Leaf, data.clone(), requires_grad))
        } else {
            NodeId::DETACHED
        };
        Variable { node_id, data }
    }

    /// Create a parameter (requires grad).
    pub fn param(data: Tensor<f64>) -> Self {
        Self::new(data, true)
    }

    /// Create an input (no grad).
    pub fn input(data: Tensor<f64>) -> Self {
        Self::new(data, false)
    }

    /// Register this variable's current data as a fresh trainable leaf.
    ///
    /// Parameters outlive graph resets; call this once per step, after
    /// [`reset_graph`](crate::reset_graph) and before the forward pass.
    pub fn reattach(&mut self) {
        let fresh = Variable::param(self.data.clone());
        self.node_id = fresh.node_id;
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.data.shape_vec()
    }

    pub fn numel(&self) -> usize {
        self.data.numel()
    }

    pub fn is_detached(&self) -> bool {
        self.node_id.is_detached()
    }

    /// Node id for use as an operand. Detached values become constant leaves
    /// when recording is on, so backward can still read them.
    fn operand(&self) -> NodeId {
        if self.node_id.is_detached() && is_grad_enabled() {
            with_graph(|g| g.add_node(Op::Leaf, self.data.clone(), false))
        } else {
            self.node_id
        }
    }

    fn record(op: Op, value: Tensor<f64>, parents: &[NodeId]) -> Variable {
        if !is_grad_enabled() {
            return Variable {
                node_id: NodeId::DETACHED,
                data: value,
            };
        }
        let node_id = with_graph(|g| {
            let requires_grad = parents.iter().any(|&p| g.requires_grad(p));
            g.add_node(op, value.clone(), requires_grad)
        });
        Variable {
            node_id,
            data: value,
        }
    }

    // ─── Element-wise ───────────────────────────────────────────────────

    /// Element-wise addition.
    pub fn add(&self, other: &Variable) -> TensorResult<Variable> {
        let result = self.data.add(&other.data)?;
        let (a, b) = (self.operand(), other.operand());
        Ok(Self::record(Op::Add(a, b), result, &[a, b]))
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Variable) -> TensorResult<Variable> {
        let result = self.data.sub(&other.data)?;
        let (a, b) = (self.operand(), other.operand());
        Ok(Self::record(Op::Sub(a, b), result, &[a, b]))
    }

    /// Element-wise multiplication.
    pub fn mul(&self, other: &Variable) -> TensorResult<Variable> {
        let result = self.data.mul(&other.data)?;
        let (a, b) = (self.operand(), other.operand());
        Ok(Self::record(Op::Mul(a, b), result, &[a, b]))
    }

    /// Negation.
    pub fn neg(&self) -> Variable {
        let a = self.operand();
        Self::record(Op::Neg(a), self.data.mul_scalar(-1.0), &[a])
    }

    /// ReLU activation.
    pub fn relu(&self) -> Variable {
        let a = self.operand();
        Self::record(Op::Relu(a), self.data.relu(), &[a])
    }

    /// Sigmoid activation.
    pub fn sigmoid(&self) -> Variable {
        let a = self.operand();
        Self::record(Op::Sigmoid(a), self.data.sigmoid(), &[a])
    }

    /// Multiply by scalar.
    pub fn mul_scalar(&self, s: f64) -> Variable {
        let a = self.operand();
        Self::record(Op::MulScalar(a, s), self.data.mul_scalar(s), &[a])
    }

    /// Add scalar.
    pub fn add_scalar(&self, s: f64) -> Variable {
        let a = self.operand();
        Self::record(Op::AddScalar(a, s), self.data.add_scalar(s), &[a])
    }

    // ─── Reductions ─────────────────────────────────────────────────────

    /// Sum all elements to a scalar.
    pub fn sum(&self) -> Variable {
        let a = self.operand();
        Self::record(Op::SumAll(a), Tensor::scalar(self.data.sum_all()), &[a])
    }

    /// Mean of all elements.
    pub fn mean(&self) -> Variable {
        let a = self.operand();
        Self::record(Op::MeanAll(a), Tensor::scalar(self.data.mean_all()), &[a])
    }

    // ─── Spatial ────────────────────────────────────────────────────────

    /// 2-D convolution of a `[N, C, H, W]` input with `[O, C, k, k]` weights.
    pub fn conv2d(
        &self,
        weight: &Variable,
        bias: &Variable,
        stride: usize,
        padding: usize,
    ) -> TensorResult<Variable> {
        let result = conv::conv2d(&self.data, &weight.data, &bias.data, stride, padding)?;
        let (input, weight, bias) = (self.operand(), weight.operand(), bias.operand());
        let op = Op::Conv2d {
            input,
            weight,
            bias,
            stride,
            padding,
        };
        Ok(Self::record(op, result, &[input, weight, bias]))
    }

    /// 2-D transpose convolution of a `[N, I, H, W]` input with `[I, O, k, k]` weights.
    pub fn conv_transpose2d(
        &self,
        weight: &Variable,
        bias: &Variable,
        stride: usize,
        padding: usize,
    ) -> TensorResult<Variable> {
        let result =
            conv::conv_transpose2d(&self.data, &weight.data, &bias.data, stride, padding)?;
        let (input, weight, bias) = (self.operand(), weight.operand(), bias.operand());
        let op = Op::ConvTranspose2d {
            input,
            weight,
            bias,
            stride,
            padding,
        };
        Ok(Self::record(op, result, &[input, weight, bias]))
    }

    /// Max pooling with a `kernel x kernel` window and matching stride.
    pub fn max_pool2d(&self, kernel: usize) -> TensorResult<Variable> {
        let result = conv::max_pool2d(&self.data, kernel)?;
        let input = self.operand();
        Ok(Self::record(Op::MaxPool2d { input, kernel }, result, &[input]))
    }

    /// Mean cross-entropy between channel-softmaxed `[N, K, H, W]` logits and
    /// `[N, H, W]` integer labels.
    pub fn softmax_cross_entropy(&self, labels: &Variable) -> TensorResult<Variable> {
        let loss = conv::softmax_cross_entropy(&self.data, &labels.data)?;
        let (logits, labels) = (self.operand(), labels.operand());
        Ok(Self::record(
            Op::SoftmaxCrossEntropy { logits, labels },
            Tensor::scalar(loss),
            &[logits],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{graph_len, reset_graph};
    use crate::no_grad::with_no_grad;

    #[test]
    fn test_no_grad_records_nothing() {
        reset_graph();
        let x = Variable::input(Tensor::ones(vec![1, 1, 4, 4]));
        let before = graph_len();
        let pooled = with_no_grad(|| x.max_pool2d(2).unwrap().relu());
        assert!(pooled.is_detached());
        assert_eq!(graph_len(), before);
        assert_eq!(pooled.shape_vec(), vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_reattach_after_reset() {
        reset_graph();
        let mut w = Variable::param(Tensor::scalar(2.0));
        reset_graph();
        w.reattach();
        assert_eq!(graph_len(), 1);
        assert_eq!(w.node_id, NodeId(0));
    }

    #[test]
    fn test_shape_errors_propagate() {
        reset_graph();
        let a = Variable::input(Tensor::ones(vec![2, 3]));
        let b = Variable::input(Tensor::ones(vec![4, 5]));
        assert!(a.add(&b).is_err());
    }
}

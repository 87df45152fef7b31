use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// N-dimensional tensor backing images, feature maps and parameters.
///
/// Stores data in a flat contiguous `Vec<T>` with row-major (C-order) layout.
/// Image batches use `[batch, channels, height, width]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

// ─── Construction ───────────────────────────────────────────────────────────

impl<T: Float> Tensor<T> {
    /// Create a tensor from raw data and shape.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> TensorResult<Self> {
        let s = Shape::new(shape);
        if data.len() != s.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: s.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: s })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ZERO)
    }

    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ONE)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![value; s.numel()],
            shape: s,
        }
    }

    /// Create a scalar tensor (0-d).
    pub fn scalar(value: T) -> Self {
        Tensor {
            data: vec![value],
            shape: Shape::scalar(),
        }
    }

    /// Create a 1-D tensor from a slice.
    pub fn from_slice(data: &[T]) -> Self {
        Tensor {
            data: data.to_vec(),
            shape: Shape::new(vec![data.len()]),
        }
    }

    /// Random tensor with uniform distribution in [0, 1).
    pub fn rand(shape: Vec<usize>, seed: Option<u64>) -> Self {
        Self::uniform(shape, T::ZERO, T::ONE, seed)
    }

    /// Random tensor with uniform distribution in [low, high).
    pub fn uniform(shape: Vec<usize>, low: T, high: T, seed: Option<u64>) -> Self {
        let s = Shape::new(shape);
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let span = high - low;
        let data: Vec<T> = (0..s.numel())
            .map(|_| low + span * T::from_f64(rng.gen::<f64>()))
            .collect();
        Tensor { data, shape: s }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Get the single element of a one-element tensor.
    pub fn item(&self) -> TensorResult<T> {
        if self.data.len() != 1 {
            return Err(TensorError::InvalidOperation(format!(
                "item() requires exactly 1 element, got {}",
                self.data.len()
            )));
        }
        Ok(self.data[0])
    }

    /// Element at a full multi-index, e.g. `[band, y, x]`.
    pub fn get(&self, indices: &[usize]) -> TensorResult<T> {
        if indices.len() != self.ndim() {
            return Err(TensorError::DimensionMismatch(format!(
                "{} indices for a {}-d tensor",
                indices.len(),
                self.ndim()
            )));
        }
        let mut offset = 0;
        for (axis, (&idx, &size)) in indices.iter().zip(self.shape.dims()).enumerate() {
            if idx >= size {
                return Err(TensorError::IndexOutOfBounds { index: idx, axis, size });
            }
            offset = offset * size + idx;
        }
        Ok(self.data[offset])
    }

    // ─── Shape Manipulation ─────────────────────────────────────────────────

    /// Reshape the tensor (data remains the same, only shape changes).
    pub fn reshape(&self, new_shape: Vec<usize>) -> TensorResult<Tensor<T>> {
        let ns = Shape::new(new_shape);
        if self.numel() != ns.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: ns.to_vec(),
                got: self.shape_vec(),
            });
        }
        Ok(Tensor {
            data: self.data.clone(),
            shape: ns,
        })
    }

    /// Add a dimension of size 1 at the given axis.
    pub fn unsqueeze(&self, axis: usize) -> TensorResult<Tensor<T>> {
        let mut dims = self.shape.to_vec();
        if axis > dims.len() {
            return Err(TensorError::InvalidAxis {
                axis,
                ndim: self.ndim(),
            });
        }
        dims.insert(axis, 1);
        Ok(Tensor {
            data: self.data.clone(),
            shape: Shape::new(dims),
        })
    }

    /// Reorder axes: output axis `i` is input axis `axes[i]`.
    ///
    /// `[H, W, C].permute(&[2, 0, 1])` gives channel-first `[C, H, W]`.
    pub fn permute(&self, axes: &[usize]) -> TensorResult<Tensor<T>> {
        let ndim = self.ndim();
        let mut seen = vec![false; ndim];
        if axes.len() != ndim
            || axes.iter().any(|&a| a >= ndim || std::mem::replace(&mut seen[a], true))
        {
            return Err(TensorError::InvalidPermutation {
                axes: axes.to_vec(),
                ndim,
            });
        }

        let in_dims = self.shape.dims();
        let in_strides = self.shape.strides();
        let out_dims: Vec<usize> = axes.iter().map(|&a| in_dims[a]).collect();
        let out_shape = Shape::new(out_dims.clone());
        let strides_by_out: Vec<usize> = axes.iter().map(|&a| in_strides[a]).collect();

        let mut data = Vec::with_capacity(self.numel());
        let mut index = vec![0usize; ndim];
        for _ in 0..self.numel() {
            let src: usize = index.iter().zip(&strides_by_out).map(|(i, s)| i * s).sum();
            data.push(self.data[src]);
            // Odometer increment over the output index.
            for d in (0..ndim).rev() {
                index[d] += 1;
                if index[d] < out_dims[d] {
                    break;
                }
                index[d] = 0;
            }
        }

        Ok(Tensor { data, shape: out_shape })
    }

    /// Stack equally shaped tensors along a new leading axis.
    pub fn stack(tensors: &[&Tensor<T>]) -> TensorResult<Tensor<T>> {
        let first = tensors.first().ok_or(TensorError::EmptyTensor)?;
        let ref_shape = first.shape_vec();
        let mut data = Vec::with_capacity(first.numel() * tensors.len());
        for t in tensors {
            if t.shape_vec() != ref_shape {
                return Err(TensorError::ShapeMismatch {
                    expected: ref_shape.clone(),
                    got: t.shape_vec(),
                });
            }
            data.extend_from_slice(&t.data);
        }
        let mut dims = vec![tensors.len()];
        dims.extend(ref_shape);
        Tensor::new(data, dims)
    }

    /// Take entry `i` along the leading axis, dropping that axis.
    pub fn index_first(&self, i: usize) -> TensorResult<Tensor<T>> {
        let size = self.shape.dim(0)?;
        if i >= size {
            return Err(TensorError::IndexOutOfBounds { index: i, axis: 0, size });
        }
        let inner = self.numel() / size;
        Tensor::new(
            self.data[i * inner..(i + 1) * inner].to_vec(),
            self.shape.dims()[1..].to_vec(),
        )
    }

    // ─── Element-wise Unary Operations ──────────────────────────────────────

    pub fn apply<F: Fn(T) -> T>(&self, f: F) -> Tensor<T> {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    pub fn sqrt(&self) -> Tensor<T> { self.apply(T::sqrt) }
    pub fn round(&self) -> Tensor<T> { self.apply(T::round) }

    /// ReLU activation: max(0, x).
    pub fn relu(&self) -> Tensor<T> {
        self.apply(|x| x.max(T::ZERO))
    }

    /// Sigmoid activation: 1 / (1 + exp(-x)).
    pub fn sigmoid(&self) -> Tensor<T> {
        self.apply(|x| T::ONE / (T::ONE + (-x).exp()))
    }

    // ─── Scalar Operations ──────────────────────────────────────────────────

    pub fn add_scalar(&self, s: T) -> Tensor<T> { self.apply(|x| x + s) }
    pub fn mul_scalar(&self, s: T) -> Tensor<T> { self.apply(|x| x * s) }
    pub fn div_scalar(&self, s: T) -> Tensor<T> { self.apply(|x| x / s) }

    // ─── Element-wise Binary Operations (with broadcasting) ─────────────────

    fn broadcast_binary_op<F: Fn(T, T) -> T>(
        &self,
        other: &Tensor<T>,
        op: F,
    ) -> TensorResult<Tensor<T>> {
        // Fast path: same shape
        if self.shape == other.shape {
            let data: Vec<T> = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| op(a, b))
                .collect();
            return Ok(Tensor {
                data,
                shape: self.shape.clone(),
            });
        }

        let out_shape = Shape::broadcast_shape(&self.shape, &other.shape)?;
        let out_strides = out_shape.strides();
        let a_strides = self.shape.strides();
        let b_strides = other.shape.strides();
        let a_dims = self.shape.dims();
        let b_dims = other.shape.dims();
        let ndim = out_shape.ndim();
        let a_lead = ndim - a_dims.len();
        let b_lead = ndim - b_dims.len();

        let mut data = Vec::with_capacity(out_shape.numel());
        for flat_idx in 0..out_shape.numel() {
            let mut remaining = flat_idx;
            let mut a_offset = 0usize;
            let mut b_offset = 0usize;

            for d in 0..ndim {
                let idx = remaining / out_strides[d];
                remaining %= out_strides[d];
                if d >= a_lead && a_dims[d - a_lead] > 1 {
                    a_offset += idx * a_strides[d - a_lead];
                }
                if d >= b_lead && b_dims[d - b_lead] > 1 {
                    b_offset += idx * b_strides[d - b_lead];
                }
            }

            data.push(op(self.data[a_offset], other.data[b_offset]));
        }

        Ok(Tensor {
            data,
            shape: out_shape,
        })
    }

    pub fn add(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.broadcast_binary_op(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.broadcast_binary_op(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.broadcast_binary_op(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.broadcast_binary_op(other, |a, b| a / b)
    }

    // ─── Reduction Operations ───────────────────────────────────────────────

    pub fn sum_all(&self) -> T {
        self.data.iter().copied().sum()
    }

    pub fn mean_all(&self) -> T {
        self.sum_all() / T::from_usize(self.numel())
    }

    pub fn max_all(&self) -> TensorResult<T> {
        self.data.iter().copied().reduce(T::max).ok_or(TensorError::EmptyTensor)
    }

    pub fn min_all(&self) -> TensorResult<T> {
        self.data.iter().copied().reduce(T::min).ok_or(TensorError::EmptyTensor)
    }

    /// Sum along a specific axis, collapsing that dimension.
    pub fn sum_axis(&self, axis: usize) -> TensorResult<Tensor<T>> {
        let dims = self.shape.dims();
        if axis >= dims.len() {
            return Err(TensorError::InvalidAxis {
                axis,
                ndim: self.ndim(),
            });
        }

        let outer: usize = dims[..axis].iter().product();
        let axis_size = dims[axis];
        let inner: usize = dims[axis + 1..].iter().product();

        let mut new_dims: Vec<usize> = dims.to_vec();
        new_dims.remove(axis);
        if new_dims.is_empty() {
            new_dims.push(1);
        }

        let mut result = vec![T::ZERO; outer * inner];
        for o in 0..outer {
            for a in 0..axis_size {
                for i in 0..inner {
                    result[o * inner + i] += self.data[o * axis_size * inner + a * inner + i];
                }
            }
        }

        Tensor::new(result, new_dims)
    }

    /// Index of the maximum along `axis`, collapsing that dimension.
    ///
    /// Ties resolve to the lowest index.
    pub fn argmax_axis(&self, axis: usize) -> TensorResult<Tensor<T>> {
        let dims = self.shape.dims();
        if axis >= dims.len() {
            return Err(TensorError::InvalidAxis {
                axis,
                ndim: self.ndim(),
            });
        }
        let outer: usize = dims[..axis].iter().product();
        let axis_size = dims[axis];
        let inner: usize = dims[axis + 1..].iter().product();
        if axis_size == 0 {
            return Err(TensorError::EmptyTensor);
        }

        let mut result = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            for i in 0..inner {
                let base = o * axis_size * inner + i;
                let mut best = 0;
                for a in 1..axis_size {
                    if self.data[base + a * inner] > self.data[base + best * inner] {
                        best = a;
                    }
                }
                result.push(T::from_usize(best));
            }
        }

        let mut new_dims = dims.to_vec();
        new_dims.remove(axis);
        if new_dims.is_empty() {
            new_dims.push(1);
        }
        Tensor::new(result, new_dims)
    }

    /// Check if any element is NaN.
    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

// ─── Display ────────────────────────────────────────────────────────────────

/// Shape plus a short preview, e.g. `Tensor[3, 4, 4] (0.1250, 0.5000, ...)`.
impl<T: Float> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor{} (", self.shape)?;
        let preview: Vec<String> = self.data.iter().take(6).map(|v| format!("{:.4}", v)).collect();
        write!(f, "{}", preview.join(", "))?;
        if self.numel() > 6 {
            write!(f, ", ...")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        let t: Tensor<f64> = Tensor::zeros(vec![3, 4]);
        assert_eq!(t.shape_vec(), vec![3, 4]);
        assert_eq!(t.numel(), 12);

        let t: Tensor<f64> = Tensor::ones(vec![2, 3]);
        assert_eq!(t.sum_all(), 6.0);
        assert!(Tensor::<f64>::new(vec![1.0, 2.0], vec![3]).is_err());
    }

    #[test]
    fn test_broadcast_bias() {
        // [1, 2, 2, 2] feature map plus per-channel bias [2, 1, 1]
        let maps: Tensor<f64> =
            Tensor::new((0..8).map(|i| i as f64).collect(), vec![1, 2, 2, 2]).unwrap();
        let bias: Tensor<f64> = Tensor::new(vec![10.0, 20.0], vec![2, 1, 1]).unwrap();
        let out = maps.add(&bias).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 2, 2, 2]);
        assert_eq!(out.data(), &[10.0, 11.0, 12.0, 13.0, 24.0, 25.0, 26.0, 27.0]);
    }

    #[test]
    fn test_permute_to_channel_first() {
        // [H=2, W=2, C=3] with value = 100*h + 10*w + c
        let mut data = Vec::new();
        for h in 0..2 {
            for w in 0..2 {
                for c in 0..3 {
                    data.push((100 * h + 10 * w + c) as f64);
                }
            }
        }
        let hwc: Tensor<f64> = Tensor::new(data, vec![2, 2, 3]).unwrap();
        let chw = hwc.permute(&[2, 0, 1]).unwrap();
        assert_eq!(chw.shape_vec(), vec![3, 2, 2]);
        assert_eq!(chw.get(&[2, 1, 0]).unwrap(), 102.0);
        assert_eq!(chw.get(&[1, 0, 1]).unwrap(), 11.0);
    }

    #[test]
    fn test_permute_rejects_duplicates() {
        let t: Tensor<f64> = Tensor::zeros(vec![2, 3]);
        assert!(t.permute(&[0, 0]).is_err());
        assert!(t.permute(&[0]).is_err());
    }

    #[test]
    fn test_stack_and_index() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0], vec![1, 2]).unwrap();
        let b: Tensor<f64> = Tensor::new(vec![3.0, 4.0], vec![1, 2]).unwrap();
        let s = Tensor::stack(&[&a, &b]).unwrap();
        assert_eq!(s.shape_vec(), vec![2, 1, 2]);
        assert_eq!(s.index_first(1).unwrap(), b);

        let c: Tensor<f64> = Tensor::zeros(vec![2, 1]);
        assert!(Tensor::stack(&[&a, &c]).is_err());
    }

    #[test]
    fn test_sum_axis() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        assert_eq!(a.sum_axis(0).unwrap().data(), &[5.0, 7.0, 9.0]);
        assert_eq!(a.sum_axis(1).unwrap().data(), &[6.0, 15.0]);
    }

    #[test]
    fn test_argmax_axis() {
        // [C=3, 2 pixels]
        let a: Tensor<f64> = Tensor::new(vec![0.1, 0.9, 0.7, 0.0, 0.2, 0.9], vec![3, 2]).unwrap();
        let labels = a.argmax_axis(0).unwrap();
        assert_eq!(labels.data(), &[1.0, 0.0]);
    }

    #[test]
    fn test_get_bounds() {
        let t: Tensor<f64> =
            Tensor::new((0..24).map(|i| i as f64).collect(), vec![2, 3, 4]).unwrap();
        assert_eq!(t.get(&[1, 2, 3]).unwrap(), 23.0);
        assert_eq!(t.get(&[0, 1, 0]).unwrap(), 4.0);
        assert!(t.get(&[0, 3, 0]).is_err());
        assert!(t.get(&[0, 0]).is_err());
    }

    #[test]
    fn test_uniform_range() {
        let t: Tensor<f64> = Tensor::uniform(vec![200], -0.5, 0.5, Some(7));
        assert!(t.min_all().unwrap() >= -0.5);
        assert!(t.max_all().unwrap() < 0.5);
        assert_eq!(t, Tensor::uniform(vec![200], -0.5, 0.5, Some(7)));
    }
}

use crate::error::{TensorError, TensorResult};
use serde::{Deserialize, Serialize};

/// Dimensions of a tensor, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    pub fn scalar() -> Self {
        Shape { dims: vec![] }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Size along a specific axis.
    pub fn dim(&self, axis: usize) -> TensorResult<usize> {
        self.dims.get(axis).copied().ok_or(TensorError::InvalidAxis {
            axis,
            ndim: self.ndim(),
        })
    }

    /// Total number of elements (1 for a scalar).
    pub fn numel(&self) -> usize {
        if self.dims.is_empty() {
            1
        } else {
            self.dims.iter().product()
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }

    /// Row-major (C-order) strides.
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![1usize; self.dims.len()];
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Unpack a `[batch, channels, height, width]` shape.
    pub fn nchw(&self) -> TensorResult<(usize, usize, usize, usize)> {
        match self.dims.as_slice() {
            &[n, c, h, w] => Ok((n, c, h, w)),
            _ => Err(TensorError::DimensionMismatch(format!(
                "expected [batch, channels, height, width], got {:?}",
                self.dims
            ))),
        }
    }

    /// Unpack a `[channels, height, width]` shape.
    pub fn chw(&self) -> TensorResult<(usize, usize, usize)> {
        match self.dims.as_slice() {
            &[c, h, w] => Ok((c, h, w)),
            _ => Err(TensorError::DimensionMismatch(format!(
                "expected [channels, height, width], got {:?}",
                self.dims
            ))),
        }
    }

    /// Result shape of broadcasting `a` against `b`: trailing axes are
    /// aligned and a size of 1 stretches to match.
    pub fn broadcast_shape(a: &Shape, b: &Shape) -> TensorResult<Shape> {
        let ndim = a.ndim().max(b.ndim());
        let padded = |s: &Shape| {
            let mut dims = vec![1; ndim - s.ndim()];
            dims.extend_from_slice(&s.dims);
            dims
        };
        let dims = padded(a)
            .into_iter()
            .zip(padded(b))
            .map(|(da, db)| match (da, db) {
                _ if da == db => Ok(da),
                (1, _) => Ok(db),
                (_, 1) => Ok(da),
                _ => Err(TensorError::BroadcastError {
                    a: a.to_vec(),
                    b: b.to_vec(),
                }),
            })
            .collect::<TensorResult<Vec<_>>>()?;
        Ok(Shape::new(dims))
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::new(vec![3, 4, 5]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 60);
        assert_eq!(s.dim(2).unwrap(), 5);
        assert!(s.dim(3).is_err());
        assert_eq!(s.strides(), vec![20, 5, 1]);
    }

    #[test]
    fn test_nchw_unpacking() {
        let s = Shape::new(vec![2, 8, 16, 12]);
        assert_eq!(s.nchw().unwrap(), (2, 8, 16, 12));
        assert!(s.chw().is_err());
        assert_eq!(Shape::new(vec![8, 16, 12]).chw().unwrap(), (8, 16, 12));
    }

    #[test]
    fn test_broadcast_bias_against_feature_map() {
        let maps = Shape::new(vec![2, 4, 8, 8]);
        let bias = Shape::new(vec![4, 1, 1]);
        let out = Shape::broadcast_shape(&maps, &bias).unwrap();
        assert_eq!(out.dims(), &[2, 4, 8, 8]);

        let bad = Shape::new(vec![3, 1, 1]);
        assert!(Shape::broadcast_shape(&maps, &bad).is_err());
    }

    #[test]
    fn test_scalar() {
        let s = Shape::scalar();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
    }
}

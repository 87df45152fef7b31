//! Convolution, pooling and pixel-wise loss kernels on `[N, C, H, W]` tensors.
//!
//! Each forward kernel has a matching `*_backward` that, given the upstream
//! gradient of the output, returns gradients for every differentiable input.
//! Weights use PyTorch layouts: `[out, in, k, k]` for convolution and
//! `[in, out, k, k]` for transpose convolution.

use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::tensor::Tensor;

/// Output size of a strided, zero-padded convolution along one axis.
pub fn conv2d_out_dim(
    input: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> TensorResult<usize> {
    if stride == 0 || kernel == 0 {
        return Err(TensorError::InvalidOperation(
            "kernel size and stride must be positive".into(),
        ));
    }
    let padded = input + 2 * padding;
    if padded < kernel {
        return Err(TensorError::InvalidOperation(format!(
            "kernel {} larger than padded input {}",
            kernel, padded
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

/// Output size of a transpose convolution along one axis.
pub fn conv_transpose2d_out_dim(
    input: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> TensorResult<usize> {
    if stride == 0 || kernel == 0 || input == 0 {
        return Err(TensorError::InvalidOperation(
            "kernel size, stride and input must be positive".into(),
        ));
    }
    let full = (input - 1) * stride + kernel;
    if full <= 2 * padding {
        return Err(TensorError::InvalidOperation(format!(
            "padding {} leaves no output for input {}",
            padding, input
        )));
    }
    Ok(full - 2 * padding)
}

fn square_kernel<T: Float>(weight: &Tensor<T>) -> TensorResult<(usize, usize, usize)> {
    let (a, b, kh, kw) = weight.shape().nchw()?;
    if kh != kw {
        return Err(TensorError::InvalidOperation(format!(
            "only square kernels are supported, got {}x{}",
            kh, kw
        )));
    }
    Ok((a, b, kh))
}

fn check_bias<T: Float>(bias: &Tensor<T>, channels: usize) -> TensorResult<()> {
    if bias.numel() != channels {
        return Err(TensorError::ShapeMismatch {
            expected: vec![channels],
            got: bias.shape_vec(),
        });
    }
    Ok(())
}

#[inline]
fn in_bounds(pos: isize, size: usize) -> Option<usize> {
    if pos >= 0 && (pos as usize) < size {
        Some(pos as usize)
    } else {
        None
    }
}

// ─── Convolution ────────────────────────────────────────────────────────────

/// 2-D cross-correlation: `[N, C, H, W] * [O, C, k, k] + [O] -> [N, O, H', W']`.
pub fn conv2d<T: Float>(
    input: &Tensor<T>,
    weight: &Tensor<T>,
    bias: &Tensor<T>,
    stride: usize,
    padding: usize,
) -> TensorResult<Tensor<T>> {
    let (n, c, h, w) = input.shape().nchw()?;
    let (oc, wc, k) = square_kernel(weight)?;
    if wc != c {
        return Err(TensorError::ShapeMismatch {
            expected: vec![oc, c, k, k],
            got: weight.shape_vec(),
        });
    }
    check_bias(bias, oc)?;
    let oh = conv2d_out_dim(h, k, stride, padding)?;
    let ow = conv2d_out_dim(w, k, stride, padding)?;

    let x = input.data();
    let wt = weight.data();
    let b = bias.data();
    let mut out = vec![T::ZERO; n * oc * oh * ow];

    for bi in 0..n {
        for o in 0..oc {
            for y in 0..oh {
                for xx in 0..ow {
                    let mut acc = b[o];
                    for ci in 0..c {
                        for ky in 0..k {
                            let iy_off = (y * stride + ky) as isize - padding as isize;
                            let Some(iy) = in_bounds(iy_off, h) else {
                                continue;
                            };
                            for kx in 0..k {
                                let ix_off = (xx * stride + kx) as isize - padding as isize;
                                let Some(ix) = in_bounds(ix_off, w) else {
                                    continue;
                                };
                                acc += wt[((o * c + ci) * k + ky) * k + kx]
                                    * x[((bi * c + ci) * h + iy) * w + ix];
                            }
                        }
                    }
                    out[((bi * oc + o) * oh + y) * ow + xx] = acc;
                }
            }
        }
    }

    Tensor::new(out, vec![n, oc, oh, ow])
}

/// Gradients of [`conv2d`] w.r.t. `(input, weight, bias)`.
pub fn conv2d_backward<T: Float>(
    input: &Tensor<T>,
    weight: &Tensor<T>,
    grad_out: &Tensor<T>,
    stride: usize,
    padding: usize,
) -> TensorResult<(Tensor<T>, Tensor<T>, Tensor<T>)> {
    let (n, c, h, w) = input.shape().nchw()?;
    let (oc, _, k) = square_kernel(weight)?;
    let (gn, goc, oh, ow) = grad_out.shape().nchw()?;
    if gn != n || goc != oc {
        return Err(TensorError::ShapeMismatch {
            expected: vec![n, oc, oh, ow],
            got: grad_out.shape_vec(),
        });
    }

    let x = input.data();
    let wt = weight.data();
    let g = grad_out.data();
    let mut gx = vec![T::ZERO; x.len()];
    let mut gw = vec![T::ZERO; wt.len()];
    let mut gb = vec![T::ZERO; oc];

    for bi in 0..n {
        for o in 0..oc {
            for y in 0..oh {
                for xx in 0..ow {
                    let go = g[((bi * oc + o) * oh + y) * ow + xx];
                    gb[o] += go;
                    for ci in 0..c {
                        for ky in 0..k {
                            let iy_off = (y * stride + ky) as isize - padding as isize;
                            let Some(iy) = in_bounds(iy_off, h) else {
                                continue;
                            };
                            for kx in 0..k {
                                let ix_off = (xx * stride + kx) as isize - padding as isize;
                                let Some(ix) = in_bounds(ix_off, w) else {
                                    continue;
                                };
                                let wi = ((o * c + ci) * k + ky) * k + kx;
                                let xi = ((bi * c + ci) * h + iy) * w + ix;
                                gw[wi] += go * x[xi];
                                gx[xi] += go * wt[wi];
                            }
                        }
                    }
                }
            }
        }
    }

    Ok((
        Tensor::new(gx, input.shape_vec())?,
        Tensor::new(gw, weight.shape_vec())?,
        Tensor::new(gb, bias_shape(oc))?,
    ))
}

fn bias_shape(channels: usize) -> Vec<usize> {
    vec![channels]
}

// ─── Transpose convolution ──────────────────────────────────────────────────

/// 2-D transpose convolution: `[N, I, H, W] * [I, O, k, k] + [O] -> [N, O, H', W']`
/// with `H' = (H - 1) * stride + k - 2 * padding`.
pub fn conv_transpose2d<T: Float>(
    input: &Tensor<T>,
    weight: &Tensor<T>,
    bias: &Tensor<T>,
    stride: usize,
    padding: usize,
) -> TensorResult<Tensor<T>> {
    let (n, ic, h, w) = input.shape().nchw()?;
    let (wic, oc, k) = square_kernel(weight)?;
    if wic != ic {
        return Err(TensorError::ShapeMismatch {
            expected: vec![ic, oc, k, k],
            got: weight.shape_vec(),
        });
    }
    check_bias(bias, oc)?;
    let oh = conv_transpose2d_out_dim(h, k, stride, padding)?;
    let ow = conv_transpose2d_out_dim(w, k, stride, padding)?;

    let x = input.data();
    let wt = weight.data();
    let b = bias.data();
    let mut out = vec![T::ZERO; n * oc * oh * ow];
    for bi in 0..n {
        for o in 0..oc {
            out[(bi * oc + o) * oh * ow..(bi * oc + o + 1) * oh * ow].fill(b[o]);
        }
    }

    for bi in 0..n {
        for ci in 0..ic {
            for iy in 0..h {
                for ix in 0..w {
                    let xv = x[((bi * ic + ci) * h + iy) * w + ix];
                    for o in 0..oc {
                        for ky in 0..k {
                            let oy_off = (iy * stride + ky) as isize - padding as isize;
                            let Some(oy) = in_bounds(oy_off, oh) else {
                                continue;
                            };
                            for kx in 0..k {
                                let ox_off = (ix * stride + kx) as isize - padding as isize;
                                let Some(ox) = in_bounds(ox_off, ow) else {
                                    continue;
                                };
                                out[((bi * oc + o) * oh + oy) * ow + ox] +=
                                    xv * wt[((ci * oc + o) * k + ky) * k + kx];
                            }
                        }
                    }
                }
            }
        }
    }

    Tensor::new(out, vec![n, oc, oh, ow])
}

/// Gradients of [`conv_transpose2d`] w.r.t. `(input, weight, bias)`.
pub fn conv_transpose2d_backward<T: Float>(
    input: &Tensor<T>,
    weight: &Tensor<T>,
    grad_out: &Tensor<T>,
    stride: usize,
    padding: usize,
) -> TensorResult<(Tensor<T>, Tensor<T>, Tensor<T>)> {
    let (n, ic, h, w) = input.shape().nchw()?;
    let (_, oc, k) = square_kernel(weight)?;
    let (gn, goc, oh, ow) = grad_out.shape().nchw()?;
    if gn != n || goc != oc {
        return Err(TensorError::ShapeMismatch {
            expected: vec![n, oc, oh, ow],
            got: grad_out.shape_vec(),
        });
    }

    let x = input.data();
    let wt = weight.data();
    let g = grad_out.data();
    let mut gx = vec![T::ZERO; x.len()];
    let mut gw = vec![T::ZERO; wt.len()];
    let mut gb = vec![T::ZERO; oc];

    for bi in 0..n {
        for o in 0..oc {
            let plane = &g[(bi * oc + o) * oh * ow..(bi * oc + o + 1) * oh * ow];
            gb[o] += plane.iter().copied().sum();
        }
    }

    for bi in 0..n {
        for ci in 0..ic {
            for iy in 0..h {
                for ix in 0..w {
                    let xi = ((bi * ic + ci) * h + iy) * w + ix;
                    let xv = x[xi];
                    for o in 0..oc {
                        for ky in 0..k {
                            let oy_off = (iy * stride + ky) as isize - padding as isize;
                            let Some(oy) = in_bounds(oy_off, oh) else {
                                continue;
                            };
                            for kx in 0..k {
                                let ox_off = (ix * stride + kx) as isize - padding as isize;
                                let Some(ox) = in_bounds(ox_off, ow) else {
                                    continue;
                                };
                                let wi = ((ci * oc + o) * k + ky) * k + kx;
                                let go = g[((bi * oc + o) * oh + oy) * ow + ox];
                                gx[xi] += go * wt[wi];
                                gw[wi] += go * xv;
                            }
                        }
                    }
                }
            }
        }
    }

    Ok((
        Tensor::new(gx, input.shape_vec())?,
        Tensor::new(gw, weight.shape_vec())?,
        Tensor::new(gb, bias_shape(oc))?,
    ))
}

// ─── Pooling ────────────────────────────────────────────────────────────────

/// Max pooling with a square window and stride equal to the window.
pub fn max_pool2d<T: Float>(input: &Tensor<T>, kernel: usize) -> TensorResult<Tensor<T>> {
    let (n, c, h, w) = input.shape().nchw()?;
    let oh = conv2d_out_dim(h, kernel, kernel, 0)?;
    let ow = conv2d_out_dim(w, kernel, kernel, 0)?;
    let x = input.data();
    let mut out = Vec::with_capacity(n * c * oh * ow);

    for plane in 0..n * c {
        for y in 0..oh {
            for xx in 0..ow {
                let (best, _) = window_max(x, plane, h, w, y, xx, kernel);
                out.push(best);
            }
        }
    }

    Tensor::new(out, vec![n, c, oh, ow])
}

/// Gradient of [`max_pool2d`]: each output gradient flows to the first
/// maximum of its window.
pub fn max_pool2d_backward<T: Float>(
    input: &Tensor<T>,
    grad_out: &Tensor<T>,
    kernel: usize,
) -> TensorResult<Tensor<T>> {
    let (n, c, h, w) = input.shape().nchw()?;
    let (gn, gc, oh, ow) = grad_out.shape().nchw()?;
    if gn != n || gc != c {
        return Err(TensorError::ShapeMismatch {
            expected: vec![n, c, oh, ow],
            got: grad_out.shape_vec(),
        });
    }
    let x = input.data();
    let g = grad_out.data();
    let mut gx = vec![T::ZERO; x.len()];

    for plane in 0..n * c {
        for y in 0..oh {
            for xx in 0..ow {
                let (_, at) = window_max(x, plane, h, w, y, xx, kernel);
                gx[at] += g[(plane * oh + y) * ow + xx];
            }
        }
    }

    Tensor::new(gx, input.shape_vec())
}

fn window_max<T: Float>(
    x: &[T],
    plane: usize,
    h: usize,
    w: usize,
    y: usize,
    xx: usize,
    kernel: usize,
) -> (T, usize) {
    let mut best = T::NEG_INFINITY;
    let mut at = (plane * h + y * kernel) * w + xx * kernel;
    for ky in 0..kernel {
        for kx in 0..kernel {
            let idx = (plane * h + y * kernel + ky) * w + xx * kernel + kx;
            if x[idx] > best {
                best = x[idx];
                at = idx;
            }
        }
    }
    (best, at)
}

// ─── Pixel-wise classification loss ─────────────────────────────────────────

fn checked_labels<T: Float>(logits: &Tensor<T>, labels: &Tensor<T>) -> TensorResult<Vec<usize>> {
    let (n, k, h, w) = logits.shape().nchw()?;
    if labels.shape_vec() != vec![n, h, w] {
        return Err(TensorError::ShapeMismatch {
            expected: vec![n, h, w],
            got: labels.shape_vec(),
        });
    }
    labels
        .data()
        .iter()
        .map(|&l| {
            let v = l.to_f64();
            if v < 0.0 || v.fract() != 0.0 || v as usize >= k {
                Err(TensorError::InvalidOperation(format!(
                    "label {} outside 0..{}",
                    v, k
                )))
            } else {
                Ok(v as usize)
            }
        })
        .collect()
}

/// Softmax over the channel axis of `[N, K, H, W]` logits.
pub fn softmax_channels<T: Float>(logits: &Tensor<T>) -> TensorResult<Tensor<T>> {
    let (n, k, h, w) = logits.shape().nchw()?;
    let hw = h * w;
    let z = logits.data();
    let mut out = vec![T::ZERO; z.len()];
    for bi in 0..n {
        for p in 0..hw {
            let idx = |c: usize| (bi * k + c) * hw + p;
            let max = (0..k).map(|c| z[idx(c)]).fold(T::NEG_INFINITY, T::max);
            let mut sum = T::ZERO;
            for c in 0..k {
                let e = (z[idx(c)] - max).exp();
                out[idx(c)] = e;
                sum += e;
            }
            for c in 0..k {
                out[idx(c)] = out[idx(c)] / sum;
            }
        }
    }
    Tensor::new(out, logits.shape_vec())
}

/// Mean negative log-likelihood of `labels` (`[N, H, W]`, integer valued)
/// under the channel softmax of `logits`.
pub fn softmax_cross_entropy<T: Float>(logits: &Tensor<T>, labels: &Tensor<T>) -> TensorResult<T> {
    let classes = checked_labels(logits, labels)?;
    let (_, k, h, w) = logits.shape().nchw()?;
    let hw = h * w;
    let probs = softmax_channels(logits)?;
    let p = probs.data();
    let floor = T::from_f64(1e-15);
    let mut total = T::ZERO;
    for (i, &class) in classes.iter().enumerate() {
        let (bi, pix) = (i / hw, i % hw);
        total += -(p[(bi * k + class) * hw + pix].max(floor)).ln();
    }
    Ok(total / T::from_usize(classes.len().max(1)))
}

/// Gradient of [`softmax_cross_entropy`] w.r.t. the logits.
pub fn softmax_cross_entropy_backward<T: Float>(
    logits: &Tensor<T>,
    labels: &Tensor<T>,
) -> TensorResult<Tensor<T>> {
    let classes = checked_labels(logits, labels)?;
    let (_, k, h, w) = logits.shape().nchw()?;
    let hw = h * w;
    let mut grad = softmax_channels(logits)?;
    let scale = T::ONE / T::from_usize(classes.len().max(1));
    let g = grad.data_mut();
    for (i, &class) in classes.iter().enumerate() {
        let (bi, pix) = (i / hw, i % hw);
        let at = (bi * k + class) * hw + pix;
        g[at] = g[at] - T::ONE;
    }
    Ok(grad.mul_scalar(scale))
}

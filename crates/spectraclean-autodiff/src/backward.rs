use crate::graph::{with_graph, Graph, Node, NodeId, Op};
use crate::variable::Variable;
use spectraclean_core::conv;
use spectraclean_core::{Tensor, TensorError, TensorResult};
use std::collections::HashMap;

/// Compute gradients via reverse-mode automatic differentiation.
///
/// Returns a map from NodeId to gradient Tensor for every node the loss
/// depends on. Fails if the loss was computed without recording.
pub fn backward(loss: &Variable) -> TensorResult<HashMap<NodeId, Tensor<f64>>> {
    with_graph(|graph| {
        let graph: &Graph = graph;
        let loss_node = graph.get(loss.node_id).ok_or_else(|| {
            TensorError::InvalidOperation("backward on a value that was not recorded".into())
        })?;

        let mut grads: HashMap<NodeId, Tensor<f64>> = HashMap::new();
        grads.insert(loss.node_id, Tensor::ones(loss_node.value.shape_vec()));

        // Nodes are pushed in forward order, so reverse index order is a valid
        // reverse topological order.
        for idx in (0..=loss.node_id.0).rev() {
            let node_id = NodeId(idx);
            let grad = match grads.get(&node_id) {
                Some(g) => g.clone(),
                None => continue,
            };
            let node = &graph.nodes[idx];
            if !node.requires_grad {
                continue;
            }

            match node.op.clone() {
                Op::Leaf => {}
                Op::Add(a, b) => {
                    accumulate_grad(graph, &mut grads, a, &grad)?;
                    accumulate_grad(graph, &mut grads, b, &grad)?;
                }
                Op::Sub(a, b) => {
                    accumulate_grad(graph, &mut grads, a, &grad)?;
                    accumulate_grad(graph, &mut grads, b, &grad.mul_scalar(-1.0))?;
                }
                Op::Mul(a, b) => {
                    let ga = grad.mul(&value(graph, b)?)?;
                    let gb = grad.mul(&value(graph, a)?)?;
                    accumulate_grad(graph, &mut grads, a, &ga)?;
                    accumulate_grad(graph, &mut grads, b, &gb)?;
                }
                Op::Neg(a) => {
                    accumulate_grad(graph, &mut grads, a, &grad.mul_scalar(-1.0))?;
                }
                Op::Relu(a) => {
                    // d/da relu(a) = (a > 0) * grad
                    let mask = value(graph, a)?.apply(|x| if x > 0.0 { 1.0 } else { 0.0 });
                    accumulate_grad(graph, &mut grads, a, &mask.mul(&grad)?)?;
                }
                Op::Sigmoid(a) => {
                    // d/da σ(a) = σ(a) * (1 - σ(a)) * grad
                    let sig = &node.value;
                    let ga = sig.mul(&sig.apply(|x| 1.0 - x))?.mul(&grad)?;
                    accumulate_grad(graph, &mut grads, a, &ga)?;
                }
                Op::SumAll(a) => {
                    let ga = Tensor::full(shape(graph, a)?, grad.item()?);
                    accumulate_grad(graph, &mut grads, a, &ga)?;
                }
                Op::MeanAll(a) => {
                    let target = shape(graph, a)?;
                    let numel: usize = target.iter().product();
                    let ga = Tensor::full(target, grad.item()? / numel.max(1) as f64);
                    accumulate_grad(graph, &mut grads, a, &ga)?;
                }
                Op::MulScalar(a, s) => {
                    accumulate_grad(graph, &mut grads, a, &grad.mul_scalar(s))?;
                }
                Op::AddScalar(a, _) => {
                    accumulate_grad(graph, &mut grads, a, &grad)?;
                }
                Op::Conv2d {
                    input,
                    weight,
                    bias,
                    stride,
                    padding,
                } => {
                    let (gx, gw, gb) = conv::conv2d_backward(
                        &value(graph, input)?,
                        &value(graph, weight)?,
                        &grad,
                        stride,
                        padding,
                    )?;
                    accumulate_grad(graph, &mut grads, input, &gx)?;
                    accumulate_grad(graph, &mut grads, weight, &gw)?;
                    accumulate_grad(graph, &mut grads, bias, &gb)?;
                }
                Op::ConvTranspose2d {
                    input,
                    weight,
                    bias,
                    stride,
                    padding,
                } => {
                    let (gx, gw, gb) = conv::conv_transpose2d_backward(
                        &value(graph, input)?,
                        &value(graph, weight)?,
                        &grad,
                        stride,
                        padding,
                    )?;
                    accumulate_grad(graph, &mut grads, input, &gx)?;
                    accumulate_grad(graph, &mut grads, weight, &gw)?;
                    accumulate_grad(graph, &mut grads, bias, &gb)?;
                }
                Op::MaxPool2d { input, kernel } => {
                    let gx = conv::max_pool2d_backward(&value(graph, input)?, &grad, kernel)?;
                    accumulate_grad(graph, &mut grads, input, &gx)?;
                }
                Op::SoftmaxCrossEntropy { logits, labels } => {
                    let gz = conv::softmax_cross_entropy_backward(
                        &value(graph, logits)?,
                        &value(graph, labels)?,
                    )?;
                    accumulate_grad(graph, &mut grads, logits, &gz.mul_scalar(grad.item()?))?;
                }
            }
        }

        Ok(grads)
    })
}

fn lookup(graph: &Graph, id: NodeId) -> TensorResult<&Node> {
    graph.get(id).ok_or_else(|| {
        TensorError::InvalidOperation(format!("node {} is not on the current graph", id.0))
    })
}

fn value(graph: &Graph, id: NodeId) -> TensorResult<Tensor<f64>> {
    Ok(lookup(graph, id)?.value.clone())
}

fn shape(graph: &Graph, id: NodeId) -> TensorResult<Vec<usize>> {
    Ok(lookup(graph, id)?.value.shape_vec())
}

/// Accumulate gradient into the map, handling broadcasting reduction.
/// Nodes that do not require grad are skipped.
fn accumulate_grad(
    graph: &Graph,
    grads: &mut HashMap<NodeId, Tensor<f64>>,
    node_id: NodeId,
    incoming_grad: &Tensor<f64>,
) -> TensorResult<()> {
    if !graph.requires_grad(node_id) {
        return Ok(());
    }
    let grad = reduce_broadcast(incoming_grad, &shape(graph, node_id)?)?;

    match grads.get_mut(&node_id) {
        Some(existing) => *existing = existing.add(&grad)?,
        None => {
            grads.insert(node_id, grad);
        }
    }
    Ok(())
}

/// Reduce a gradient tensor to match the target shape (undo broadcasting).
fn reduce_broadcast(grad: &Tensor<f64>, target_shape: &[usize]) -> TensorResult<Tensor<f64>> {
    let grad_shape = grad.shape_vec();
    if grad_shape == target_shape {
        return Ok(grad.clone());
    }

    if target_shape.iter().product::<usize>() == 1 {
        return Tensor::new(vec![grad.sum_all()], target_shape.to_vec());
    }

    let mut result = grad.clone();

    // Sum over leading dimensions that were broadcast
    for _ in target_shape.len()..grad_shape.len() {
        result = result.sum_axis(0)?;
    }

    // Sum over dimensions that are 1 in target but > 1 in grad
    let result_shape = result.shape_vec();
    for (i, (&gs, &ts)) in result_shape.iter().zip(target_shape.iter()).enumerate() {
        if ts == 1 && gs > 1 {
            result = result.sum_axis(i)?.unsqueeze(i)?;
        }
    }

    if result.shape_vec() != target_shape {
        return Err(TensorError::ShapeMismatch {
            expected: target_shape.to_vec(),
            got: result.shape_vec(),
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::reset_graph;
    use crate::no_grad::with_no_grad;

    #[test]
    fn test_simple_gradient() {
        reset_graph();

        // f(x) = x², df/dx = 2x
        let x = Variable::param(Tensor::scalar(3.0));
        let y = x.mul(&x).unwrap();
        let grads = backward(&y).unwrap();

        let dx = grads.get(&x.node_id).unwrap();
        assert!((dx.item().unwrap() - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_chain_rule() {
        reset_graph();

        // f(x) = (x + 2)², df/dx = 2(x + 2)
        let x = Variable::param(Tensor::scalar(1.0));
        let y = x.add_scalar(2.0);
        let z = y.mul(&y).unwrap();
        let grads = backward(&z).unwrap();

        let dx = grads.get(&x.node_id).unwrap();
        assert!((dx.item().unwrap() - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_relu_gradient() {
        reset_graph();

        let x = Variable::param(Tensor::new(vec![-1.0, 2.0, -3.0, 4.0], vec![2, 2]).unwrap());
        let loss = x.relu().sum();
        let grads = backward(&loss).unwrap();

        assert_eq!(grads.get(&x.node_id).unwrap().data(), &[0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_sigmoid_gradient() {
        reset_graph();

        let x = Variable::param(Tensor::scalar(0.0));
        let grads = backward(&x.sigmoid()).unwrap();

        // σ'(0) = 0.25
        let dx = grads.get(&x.node_id).unwrap();
        assert!((dx.item().unwrap() - 0.25).abs() < 1e-10);
    }

    #[test]
    fn test_mse_style_gradient() {
        reset_graph();

        // mean((p - t)²) w.r.t. p = 2 (p - t) / n
        let p = Variable::param(Tensor::from_slice(&[1.0, 2.0, 3.0, 4.0]));
        let t = Variable::input(Tensor::from_slice(&[0.0, 2.0, 5.0, 4.0]));
        let diff = p.sub(&t).unwrap();
        let loss = diff.mul(&diff).unwrap().mean();
        let grads = backward(&loss).unwrap();

        assert_eq!(grads.get(&p.node_id).unwrap().data(), &[0.5, 0.0, -1.0, 0.0]);
        assert!(!grads.contains_key(&t.node_id));
    }

    #[test]
    fn test_conv_bias_broadcast_gradient() {
        reset_graph();

        let x = Variable::input(Tensor::ones(vec![2, 1, 3, 3]));
        let w = Variable::param(Tensor::ones(vec![2, 1, 3, 3]));
        let b = Variable::param(Tensor::zeros(vec![2]));
        let loss = x.conv2d(&w, &b, 1, 1).unwrap().sum();
        let grads = backward(&loss).unwrap();

        // Each bias feeds 2 * 3 * 3 outputs.
        assert_eq!(grads.get(&b.node_id).unwrap().data(), &[18.0, 18.0]);
        assert_eq!(grads.get(&w.node_id).unwrap().shape_vec(), vec![2, 1, 3, 3]);
        assert!(!grads.contains_key(&x.node_id));
    }

    #[test]
    fn test_encoder_decoder_chain() {
        reset_graph();

        let x = Variable::input(Tensor::uniform(vec![1, 2, 4, 4], 0.0, 1.0, Some(3)));
        let w1 = Variable::param(Tensor::uniform(vec![3, 2, 3, 3], -0.5, 0.5, Some(4)));
        let b1 = Variable::param(Tensor::zeros(vec![3]));
        let w2 = Variable::param(Tensor::uniform(vec![3, 2, 2, 2], -0.5, 0.5, Some(5)));
        let b2 = Variable::param(Tensor::zeros(vec![2]));

        let h = x.conv2d(&w1, &b1, 1, 1).unwrap().relu().max_pool2d(2).unwrap();
        let y = h.conv_transpose2d(&w2, &b2, 2, 0).unwrap().sigmoid();
        assert_eq!(y.shape_vec(), vec![1, 2, 4, 4]);

        let diff = y.sub(&x).unwrap();
        let loss = diff.mul(&diff).unwrap().mean();
        let grads = backward(&loss).unwrap();
        for p in [&w1, &b1, &w2, &b2] {
            assert_eq!(grads.get(&p.node_id).unwrap().shape_vec(), p.shape_vec());
        }
    }

    #[test]
    fn test_backward_on_detached_fails() {
        reset_graph();
        let x = Variable::param(Tensor::scalar(1.0));
        let y = with_no_grad(|| x.mul_scalar(2.0));
        assert!(backward(&y).is_err());
    }
}

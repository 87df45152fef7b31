use spectraclean_core::Tensor;
use std::cell::RefCell;

/// Position of a node on the thread-local tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Id carried by values computed under [`with_no_grad`](crate::with_no_grad).
    pub const DETACHED: NodeId = NodeId(usize::MAX);

    pub fn is_detached(self) -> bool {
        self == Self::DETACHED
    }
}

/// How a recorded value was produced. Operands refer to earlier nodes.
#[derive(Debug, Clone)]
pub enum Op {
    /// Parameter, input or constant.
    Leaf,
    // Element-wise, broadcasting.
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Neg(NodeId),
    Relu(NodeId),
    Sigmoid(NodeId),
    MulScalar(NodeId, f64),
    AddScalar(NodeId, f64),
    // Reductions to a scalar.
    SumAll(NodeId),
    MeanAll(NodeId),
    // Image kernels over `[N, C, H, W]`.
    Conv2d {
        input: NodeId,
        weight: NodeId,
        bias: NodeId,
        stride: usize,
        padding: usize,
    },
    ConvTranspose2d {
        input: NodeId,
        weight: NodeId,
        bias: NodeId,
        stride: usize,
        padding: usize,
    },
    /// Window stride equals the window size.
    MaxPool2d { input: NodeId, kernel: usize },
    /// Mean per-pixel cross-entropy of channel-softmaxed logits. `labels`
    /// receives no gradient.
    SoftmaxCrossEntropy { logits: NodeId, labels: NodeId },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    pub value: Tensor<f64>,
    /// False for inputs and for anything computed only from them.
    pub requires_grad: bool,
}

/// Nodes in the order they were recorded, so reverse order is a valid
/// backward order.
#[derive(Debug, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, op: Op, value: Tensor<f64>, requires_grad: bool) -> NodeId {
        self.nodes.push(Node {
            op,
            value,
            requires_grad,
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Unknown and detached ids never require grad.
    pub fn requires_grad(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| n.requires_grad)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

thread_local! {
    static TAPE: RefCell<Graph> = RefCell::new(Graph::new());
}

/// Run `f` against this thread's tape.
pub fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut Graph) -> R,
{
    TAPE.with(|g| f(&mut g.borrow_mut()))
}

/// Drop every recorded node. Parameters created earlier must be
/// [`reattach`](crate::Variable::reattach)ed before their next use.
pub fn reset_graph() {
    TAPE.with(|g| g.borrow_mut().nodes.clear());
}

/// Nodes currently recorded on this thread.
pub fn graph_len() -> usize {
    with_graph(|g| g.len())
}

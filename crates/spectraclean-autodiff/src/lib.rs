//! Reverse-mode automatic differentiation over a thread-local tape.

pub mod backward;
pub mod graph;
pub mod no_grad;
pub mod variable;

pub use backward::backward;
pub use graph::{graph_len, reset_graph, with_graph, NodeId, Op};
pub use no_grad::{is_grad_enabled, with_no_grad};
pub use variable::Variable;

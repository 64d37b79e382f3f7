use std::sync::Arc;

use crate::node::NodeId;

/// Expression IR handed to the external execution runtime. Subtrees are
/// reference counted so a node feeding several consumers appears once in the
/// tree it shares with all of them.
#[derive(Clone, Debug)]
pub enum Expr {
    /// Reference to a free parameter of an enclosing `Lambda`.
    Symbol(String),
    /// Application of a node's evaluation entry. `params` are the formal
    /// argument names, `args` the actual sub-expressions; a `None` argument
    /// is an unconnected formal, making the application partial.
    Invoke {
        node_id: NodeId,
        params: Vec<String>,
        args: Vec<Option<Arc<Expr>>>,
    },
    /// Sequence literal.
    Collect(Vec<Arc<Expr>>),
    /// First element of a sequence.
    Head(Arc<Expr>),
    /// Sequence without its first element.
    Tail(Arc<Expr>),
    /// Sequence without its first `count` elements.
    Skip { count: usize, list: Arc<Expr> },
    /// Function abstraction over free parameter names.
    Lambda { params: Vec<String>, body: Arc<Expr> },
}

impl Expr {
    /// True when the expression awaits arguments instead of reducing to a
    /// concrete value.
    pub fn is_partial(&self) -> bool {
        match self {
            Expr::Invoke { args, .. } => args.iter().any(|arg| arg.is_none()),
            Expr::Lambda { .. } => true,
            _ => false,
        }
    }

    /// Formal names this expression still awaits.
    pub fn free_params(&self) -> Vec<&str> {
        match self {
            Expr::Invoke { params, args, .. } => params
                .iter()
                .zip(args.iter())
                .filter(|(_, arg)| arg.is_none())
                .map(|(name, _)| name.as_str())
                .collect(),
            Expr::Lambda { params, .. } => params.iter().map(|name| name.as_str()).collect(),
            _ => vec![],
        }
    }

    pub fn as_invoke(&self) -> Option<NodeId> {
        match self {
            Expr::Invoke { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }
}

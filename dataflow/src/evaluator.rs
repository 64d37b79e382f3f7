use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::data::Value;
use crate::graph::Graph;
use crate::node::NodeId;
use crate::node_type::{NodeTypeId, TypeLib};

/// Cooperative cancellation signal, owned by the host and shared with every
/// evaluation pass.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Synchronous marshalling point for interactive node types. The call blocks
/// until the coordinator has run the action.
pub trait Coordinator: Debug + Send + Sync {
    fn run_marshalled(
        &self,
        action: &mut dyn FnMut() -> EvalResult<Value>,
    ) -> EvalResult<Value>;
}

/// Runs the action on the caller's thread.
#[derive(Debug, Default)]
pub struct InlineCoordinator;

impl Coordinator for InlineCoordinator {
    fn run_marshalled(
        &self,
        action: &mut dyn FnMut() -> EvalResult<Value>,
    ) -> EvalResult<Value> {
        action()
    }
}

#[derive(Debug, Default)]
pub struct EvalContext {
    pub cancel: CancelFlag,
    pub coordinator: Option<Arc<dyn Coordinator>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalError {
    #[error("Evaluation cancelled")]
    Cancelled,
    #[error("Node {node_id} failed: {message}")]
    NodeFailed { node_id: NodeId, message: String },
    #[error("Node {node_id} produced no result")]
    NoResult { node_id: NodeId },
    #[error("Node {node_id} not found in graph")]
    UnknownNode { node_id: NodeId },
    #[error("Node type {type_id} is not registered")]
    UnknownType { type_id: NodeTypeId },
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Executes node logic with per-node result caching and error containment.
/// The external runtime calls back into `evaluate_if_needed` for every
/// `Expr::Invoke` it reduces.
#[derive(Debug)]
pub struct Evaluator<'a> {
    types: &'a TypeLib,
    ctx: &'a EvalContext,
}

impl<'a> Evaluator<'a> {
    pub fn new(types: &'a TypeLib, ctx: &'a EvalContext) -> Self {
        Self { types, ctx }
    }

    /// Node-identity-keyed cache check: a full evaluation runs when there is
    /// no cached result, the save-result policy is inactive, or the node
    /// requires recalculation; otherwise the cached value returns unchanged
    /// after the "already current" hook. Two calls with different arguments
    /// share one cache slot — the dirty tracker is what keeps this sound.
    pub fn evaluate_if_needed(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        args: &[Value],
    ) -> EvalResult<Value> {
        let (has_cached, policy, type_id) = {
            let node = graph
                .by_id(node_id)
                .ok_or(EvalError::UnknownNode { node_id })?;
            (node.cached.is_some(), node.save_result_active(), node.type_id)
        };

        if !has_cached || !policy || graph.requires_recalc(node_id) {
            return self.evaluate(graph, node_id, args);
        }

        let node_type = self
            .types
            .by_id(type_id)
            .ok_or(EvalError::UnknownType { type_id })?;
        node_type.on_evaluate.fire();

        Ok(graph
            .by_id(node_id)
            .expect("node exists")
            .cached
            .clone()
            .expect("cached result present"))
    }

    /// Full evaluation. Interactive node types are routed through the
    /// injected coordinator; everything else runs inline.
    pub fn evaluate(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        args: &[Value],
    ) -> EvalResult<Value> {
        let type_id = graph
            .by_id(node_id)
            .ok_or(EvalError::UnknownNode { node_id })?
            .type_id;
        let interactive = self
            .types
            .by_id(type_id)
            .ok_or(EvalError::UnknownType { type_id })?
            .interactive;

        if interactive {
            if let Some(coordinator) = self.ctx.coordinator.as_ref() {
                let mut action = || self.eval_inner(graph, node_id, args);
                return coordinator.run_marshalled(&mut action);
            }
        }

        self.eval_inner(graph, node_id, args)
    }

    fn eval_inner(&self, graph: &mut Graph, node_id: NodeId, args: &[Value]) -> EvalResult<Value> {
        let type_id = graph
            .by_id(node_id)
            .ok_or(EvalError::UnknownNode { node_id })?
            .type_id;
        let node_type = self
            .types
            .by_id(type_id)
            .ok_or(EvalError::UnknownType { type_id })?;

        if self.ctx.cancel.is_set() {
            node_type.on_cancel.fire();
            return Err(EvalError::Cancelled);
        }

        // Bindings are saved before the per-output slots are cleared.
        let policy = graph
            .by_id(node_id)
            .expect("node exists")
            .save_result_active();
        {
            let node = graph.by_id_mut(node_id).expect("node exists");
            if policy {
                node.take_snapshot();
            }
            for output in node.outputs.iter_mut() {
                output.value = None;
            }
        }

        let output_count = graph.by_id(node_id).expect("node exists").outputs.len();
        let mut slots: Vec<Option<Value>> = vec![None; output_count];
        let logic_result = node_type.logic.invoke(args, &mut slots);

        let mut failure: Option<String> = None;
        let mut value: Option<Value> = None;
        match logic_result {
            Err(err) => {
                if matches!(err.downcast_ref::<EvalError>(), Some(EvalError::Cancelled)) {
                    node_type.on_cancel.fire();
                    return Err(EvalError::Cancelled);
                }
                let message = err.to_string();
                error!("Node {} evaluation failed: {}", node_id, message);
                graph
                    .by_id_mut(node_id)
                    .expect("node exists")
                    .set_error(message.clone());
                failure = Some(message);
            }
            Ok(()) => match Self::collect_outputs(graph, node_id, output_count, &mut slots) {
                Ok(collected) => value = Some(collected),
                Err(message) => {
                    error!("Node {} evaluation failed: {}", node_id, message);
                    graph
                        .by_id_mut(node_id)
                        .expect("node exists")
                        .set_error(message.clone());
                    failure = Some(message);
                }
            },
        }

        // Fires after success and caught failure alike; so does clearing the
        // local dirty flag.
        node_type.on_evaluate.fire();
        graph.set_requires_recalc(node_id, false);

        match value {
            Some(value) => {
                let node = graph.by_id_mut(node_id).expect("node exists");
                if output_count == 1 {
                    node.outputs[0].value = Some(value.clone());
                } else if let Value::List(items) = &value {
                    for (output, item) in node.outputs.iter_mut().zip(items.iter()) {
                        output.value = Some(item.clone());
                    }
                }
                node.cached = Some(value.clone());
                Ok(value)
            }
            None => Err(match failure {
                Some(message) => EvalError::NodeFailed { node_id, message },
                None => EvalError::NoResult { node_id },
            }),
        }
    }

    /// A single declared output yields its value directly; anything else
    /// yields the outputs as an ordered sequence (empty for terminal nodes).
    /// A slot the logic left unset fails the evaluation, naming the port.
    fn collect_outputs(
        graph: &Graph,
        node_id: NodeId,
        output_count: usize,
        slots: &mut [Option<Value>],
    ) -> std::result::Result<Value, String> {
        let missing_message = |idx: usize| {
            let name = graph.by_id(node_id).expect("node exists").outputs[idx]
                .spec
                .name
                .clone();
            format!("Output \"{}\" was not produced", name)
        };

        if output_count == 1 {
            return slots[0].take().ok_or_else(|| missing_message(0));
        }

        let mut values = Vec::with_capacity(output_count);
        for idx in 0..output_count {
            match slots[idx].take() {
                Some(value) => values.push(value),
                None => return Err(missing_message(idx)),
            }
        }
        Ok(Value::List(values))
    }
}

use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::expr::Expr;
use crate::graph::Graph;
use crate::node::NodeId;
use crate::subgraph::SubgraphRegistry;
use common::BoolExt;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileError {
    #[error("Node {node_id} not found in graph")]
    NodeNotFound { node_id: NodeId },
    #[error("Output index {output_idx} out of range for node {node_id}")]
    OutputOutOfRange { node_id: NodeId, output_idx: usize },
}

pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Per-node result of one compile: the shared base application plus the
/// accessors derived from it so far.
#[derive(Debug)]
struct CompiledNode {
    base: Arc<Expr>,
    free_params: Vec<String>,
    output_count: usize,
    outputs: HashMap<usize, Arc<Expr>>,
}

/// Caller-owned memo for a compile pass. Guarantees each node lowers at most
/// once per pass no matter how many outputs or consumers request it. After a
/// structural edit, `invalidate` the edited node and keep the rest: a
/// follow-up pass then reuses every untouched upstream entry.
#[derive(Debug, Default)]
pub struct CompileMemo {
    entries: HashMap<NodeId, CompiledNode>,
}

impl CompileMemo {
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.entries.contains_key(&node_id)
    }
    pub fn invalidate(&mut self, node_id: NodeId) {
        self.entries.remove(&node_id);
    }
    pub fn clear(&mut self) {
        self.entries.clear();
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, node_id: NodeId, output_idx: usize) -> Option<Arc<Expr>> {
        self.entries
            .get(&node_id)
            .and_then(|entry| entry.outputs.get(&output_idx))
            .cloned()
    }
}

/// Lowers a node and its upstream graph into the shared expression IR.
#[derive(Debug)]
pub struct Compiler<'a> {
    registry: &'a dyn SubgraphRegistry,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a dyn SubgraphRegistry) -> Self {
        Self { registry }
    }

    /// Compiles the whole node as one unit: multi-output nodes aggregate all
    /// their outputs into a single `Collect`, everything else compiles as
    /// output 0.
    pub fn compile_node(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        memo: &mut CompileMemo,
    ) -> CompileResult<Arc<Expr>> {
        let output_count = graph
            .by_id(node_id)
            .ok_or(CompileError::NodeNotFound { node_id })?
            .outputs
            .len();

        if output_count > 1 {
            let items = (0..output_count)
                .map(|output_idx| self.compile_for_output(graph, node_id, output_idx, memo))
                .collect::<CompileResult<Vec<_>>>()?;
            Ok(Arc::new(Expr::Collect(items)))
        } else {
            self.compile_for_output(graph, node_id, 0, memo)
        }
    }

    /// Compiles one output of a node, reusing the memo for the node's base
    /// application and for every upstream producer.
    pub fn compile_for_output(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        output_idx: usize,
        memo: &mut CompileMemo,
    ) -> CompileResult<Arc<Expr>> {
        if let Some(expr) = memo.get(node_id, output_idx) {
            return Ok(expr);
        }
        if memo.contains(node_id) {
            // Node already lowered this pass; only the accessor is missing.
            return Self::derive_output(node_id, output_idx, memo);
        }

        let (params, bindings, consumed, output_count, subgraph_key) = {
            let node = graph
                .by_id(node_id)
                .ok_or(CompileError::NodeNotFound { node_id })?;
            let params: Vec<String> = node
                .inputs
                .iter()
                .enumerate()
                .map(|(idx, input)| format!("{}{}", input.spec.name, idx))
                .collect();
            let bindings: Vec<_> = node.inputs.iter().map(|input| input.source).collect();
            let consumed: Vec<bool> = node
                .outputs
                .iter()
                .map(|output| !output.targets.is_empty())
                .collect();
            (params, bindings, consumed, node.outputs.len(), node.subgraph_key)
        };
        check_output_range(node_id, output_idx, output_count)?;

        if let Some(key) = subgraph_key {
            if !self.registry.contains(key) {
                // Non-fatal: the failure surfaces at evaluation time.
                warn!("No definition found for subgraph {}", key);
                graph
                    .by_id_mut(node_id)
                    .expect("node exists")
                    .set_error(format!("Definition not found for subgraph {}", key));
            }
        }

        let mut args: Vec<Option<Arc<Expr>>> = Vec::with_capacity(bindings.len());
        let mut free_params: Vec<String> = Vec::new();
        for (idx, binding) in bindings.iter().enumerate() {
            match binding {
                Some(addr) => {
                    let arg =
                        self.compile_for_output(graph, addr.node_id, addr.output_idx, memo)?;
                    args.push(Some(arg));
                }
                None => {
                    free_params.push(params[idx].clone());
                    args.push(None);
                }
            }
        }
        let partial = !free_params.is_empty();

        let entry = if output_count > 1 {
            // Free formals are wired as symbols so the accessors can close
            // over them.
            let mut connected = args;
            for (idx, arg) in connected.iter_mut().enumerate() {
                if arg.is_none() {
                    *arg = Some(Arc::new(Expr::Symbol(params[idx].clone())));
                }
            }
            let base = Arc::new(Expr::Invoke {
                node_id,
                params,
                args: connected,
            });

            // One cursor walk over the aggregate result: requesting the next
            // element advances one step, a gap of n skips n positions at once.
            let mut outputs = HashMap::new();
            let mut prev = base.clone();
            let mut prev_idx = 0usize;
            for idx in 0..output_count {
                if !consumed[idx] && idx != output_idx {
                    continue;
                }
                if idx > 0 {
                    let diff = idx - prev_idx;
                    prev = (diff > 1).then_else_with(
                        || {
                            Arc::new(Expr::Skip {
                                count: diff,
                                list: prev.clone(),
                            })
                        },
                        || Arc::new(Expr::Tail(prev.clone())),
                    );
                    prev_idx = idx;
                }
                let first = Arc::new(Expr::Head(prev.clone()));
                let accessor = partial.then_else_with(
                    || {
                        Arc::new(Expr::Lambda {
                            params: free_params.clone(),
                            body: first.clone(),
                        })
                    },
                    || first.clone(),
                );
                outputs.insert(idx, accessor);
            }

            CompiledNode {
                base,
                free_params,
                output_count,
                outputs,
            }
        } else {
            let base = Arc::new(Expr::Invoke {
                node_id,
                params,
                args,
            });
            let mut outputs = HashMap::new();
            outputs.insert(0, base.clone());

            CompiledNode {
                base,
                free_params,
                output_count,
                outputs,
            }
        };

        // Compiling a partial application satisfies the recompute obligation:
        // there is no concrete value to cache yet.
        if partial {
            graph.set_requires_recalc(node_id, false);
        }

        memo.entries.insert(node_id, entry);

        Ok(memo
            .get(node_id, output_idx)
            .expect("compiled output missing from memo"))
    }

    /// Builds an accessor for an output requested after the node was already
    /// lowered this pass. The shared base is reused, never rebuilt.
    fn derive_output(
        node_id: NodeId,
        output_idx: usize,
        memo: &mut CompileMemo,
    ) -> CompileResult<Arc<Expr>> {
        let entry = memo.entries.get(&node_id).expect("memo entry exists");
        check_output_range(node_id, output_idx, entry.output_count)?;

        let expr = if entry.output_count > 1 {
            let list = match output_idx {
                0 => entry.base.clone(),
                1 => Arc::new(Expr::Tail(entry.base.clone())),
                count => Arc::new(Expr::Skip {
                    count,
                    list: entry.base.clone(),
                }),
            };
            let first = Arc::new(Expr::Head(list));
            if entry.free_params.is_empty() {
                first
            } else {
                Arc::new(Expr::Lambda {
                    params: entry.free_params.clone(),
                    body: first,
                })
            }
        } else {
            entry.base.clone()
        };

        memo.entries
            .get_mut(&node_id)
            .expect("memo entry exists")
            .outputs
            .insert(output_idx, expr.clone());

        Ok(expr)
    }
}

/// Zero- and single-output nodes compile through output 0, matching the
/// top-level entry; multi-output nodes require a declared index.
fn check_output_range(
    node_id: NodeId,
    output_idx: usize,
    output_count: usize,
) -> CompileResult<()> {
    let in_range = if output_count > 1 {
        output_idx < output_count
    } else {
        output_idx == 0
    };
    in_range
        .then_some(())
        .ok_or(CompileError::OutputOutOfRange {
            node_id,
            output_idx,
        })
}

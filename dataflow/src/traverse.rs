use hashbrown::HashMap;
use tracing::warn;

use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::subgraph::{SubgraphKey, SubgraphRegistry};

/// Upstream reachability search with a memoized predicate. Each node is
/// tested at most once per traversal, which also terminates cycles. Nodes
/// referencing an externally registered subgraph expand into the resolved
/// subgraph's sink nodes through the same memo.
pub struct PredicateTraverser<P> {
    predicate: P,
    results: HashMap<NodeId, bool>,
    missing: Vec<(NodeId, SubgraphKey)>,
    in_progress: bool,
}

impl<P> PredicateTraverser<P>
where
    P: Fn(&Node) -> bool,
{
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            results: HashMap::new(),
            missing: Vec::new(),
            in_progress: false,
        }
    }

    /// Returns true as soon as the predicate holds for any node reachable
    /// upstream of `entry`. Nodes whose subgraph definition cannot be
    /// resolved are flagged Error on the way out and contribute false.
    pub fn traverse_until_any(
        &mut self,
        graph: &mut Graph,
        registry: &dyn SubgraphRegistry,
        entry: NodeId,
    ) -> bool {
        self.in_progress = true;
        let result = self.traverse_any(graph, registry, entry);
        self.results.clear();
        self.in_progress = false;

        for (node_id, key) in std::mem::take(&mut self.missing) {
            // Only nodes of the caller's graph can be flagged; registry-owned
            // subgraphs are read-only through the trait.
            if let Some(node) = graph.by_id_mut(node_id) {
                node.set_error(format!("Definition not found for subgraph {}", key));
            }
        }

        result
    }

    /// Reentrant entry used while expanding into a resolved subgraph.
    pub fn continue_traversal_until_any(
        &mut self,
        graph: &Graph,
        registry: &dyn SubgraphRegistry,
        entry: NodeId,
    ) -> bool {
        if !self.in_progress {
            panic!("continue_traversal_until_any is only valid while a traversal is in progress");
        }
        self.traverse_any(graph, registry, entry)
    }

    fn traverse_any(
        &mut self,
        graph: &Graph,
        registry: &dyn SubgraphRegistry,
        entry: NodeId,
    ) -> bool {
        if let Some(&result) = self.results.get(&entry) {
            return result;
        }

        let (result, subgraph_key, sources) = {
            let node = graph
                .by_id(entry)
                .unwrap_or_else(|| panic!("Node with id {:?} not found", entry));
            let result = (self.predicate)(node);
            let sources: Vec<NodeId> = node
                .inputs
                .iter()
                .filter_map(|input| input.source.map(|addr| addr.node_id))
                .collect();
            (result, node.subgraph_key, sources)
        };
        self.results.insert(entry, result);
        if result {
            return true;
        }

        if let Some(key) = subgraph_key {
            let Some(def) = registry.resolve(key) else {
                warn!("No definition found for subgraph {}", key);
                self.missing.push((entry, key));
                return false;
            };

            let result = def
                .sink_nodes()
                .into_iter()
                .any(|sink| self.continue_traversal_until_any(&def.graph, registry, sink));
            self.results.insert(entry, result);
            if result {
                return true;
            }
        }

        sources
            .into_iter()
            .any(|src| self.traverse_any(graph, registry, src))
    }
}

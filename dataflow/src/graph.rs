use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::{InputAddress, InputPort, Node, NodeId, OutputAddress, OutputPort, PortSpec};
use common::normalize_string::NormalizeString;
use common::FileFormat;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphError {
    #[error("Node {0} not found in graph")]
    NodeNotFound(NodeId),
    #[error("Input index {input_idx} out of range for node {node_id}")]
    InputOutOfRange { node_id: NodeId, input_idx: usize },
    #[error("Output index {output_idx} out of range for node {node_id}")]
    OutputOutOfRange { node_id: NodeId, output_idx: usize },
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    #[serde(skip)]
    has_unsaved_changes: bool,
}

impl Graph {
    pub fn nodes(&self) -> &[Node] {
        self.nodes.as_slice()
    }
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        self.nodes.as_mut_slice()
    }

    pub fn add_node(&mut self, node: Node) {
        match self.nodes.iter().position(|n| n.id == node.id) {
            Some(index) => self.nodes[index] = node,
            None => self.nodes.push(node),
        }
    }

    /// Removes the node and severs every binding that references it.
    pub fn remove_node_by_id(&mut self, id: NodeId) {
        assert!(!id.is_nil());

        self.nodes.retain(|node| node.id != id);

        let mut severed: Vec<NodeId> = Vec::new();
        for node in self.nodes.iter_mut() {
            let mut changed = false;
            for input in node.inputs.iter_mut() {
                if input.source.is_some_and(|addr| addr.node_id == id) {
                    input.source = None;
                    changed = true;
                }
            }
            for output in node.outputs.iter_mut() {
                let before = output.targets.len();
                output.targets.retain(|target| target.node_id != id);
                changed |= output.targets.len() != before;
            }
            if changed {
                severed.push(node.id);
            }
        }

        for node_id in severed {
            self.check_structural_change(node_id);
            self.refresh_lifecycle(node_id);
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }
    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.name == name)
    }

    pub fn by_id(&self, id: NodeId) -> Option<&Node> {
        assert!(!id.is_nil());
        self.nodes.iter().find(|node| node.id == id)
    }
    pub fn by_id_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        assert!(!id.is_nil());
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn node_index_by_id(&self) -> HashMap<NodeId, usize> {
        let mut map = HashMap::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            let prev = map.insert(node.id, index);
            assert!(prev.is_none(), "Duplicate node id detected: {:?}", node.id);
        }
        map
    }

    /// Nodes with no outgoing connections.
    pub fn sink_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.is_sink())
            .map(|node| node.id)
            .collect()
    }

    /// Set when a reporting-enabled node was marked for recalculation.
    pub fn has_unsaved_changes(&self) -> bool {
        self.has_unsaved_changes
    }
    pub fn clear_unsaved_changes(&mut self) {
        self.has_unsaved_changes = false;
    }
}

// Connection management.
impl Graph {
    /// Binds `dest`'s input to `src`'s output. An existing producer on the
    /// input is replaced atomically; the target set on the source side keeps
    /// duplicate connects idempotent. Re-derives the destination's dirty and
    /// lifecycle state.
    pub fn connect(
        &mut self,
        dest: NodeId,
        dest_input: usize,
        src: NodeId,
        src_output: usize,
    ) -> GraphResult<()> {
        {
            let src_node = self.by_id(src).ok_or(GraphError::NodeNotFound(src))?;
            if src_output >= src_node.outputs.len() {
                return Err(GraphError::OutputOutOfRange {
                    node_id: src,
                    output_idx: src_output,
                });
            }
            let dest_node = self.by_id(dest).ok_or(GraphError::NodeNotFound(dest))?;
            if dest_input >= dest_node.inputs.len() {
                return Err(GraphError::InputOutOfRange {
                    node_id: dest,
                    input_idx: dest_input,
                });
            }
        }

        let previous = self
            .by_id(dest)
            .expect("validated above")
            .inputs[dest_input]
            .source;
        if let Some(prev) = previous {
            if let Some(prev_node) = self.by_id_mut(prev.node_id) {
                if let Some(output) = prev_node.outputs.get_mut(prev.output_idx) {
                    output.targets.remove(&InputAddress {
                        node_id: dest,
                        input_idx: dest_input,
                    });
                }
            }
        }

        self.by_id_mut(dest).expect("validated above").inputs[dest_input].source =
            Some(OutputAddress {
                node_id: src,
                output_idx: src_output,
            });
        self.by_id_mut(src).expect("validated above").outputs[src_output]
            .targets
            .insert(InputAddress {
                node_id: dest,
                input_idx: dest_input,
            });

        self.check_structural_change(dest);
        self.refresh_lifecycle(dest);

        Ok(())
    }

    /// Clears the input binding on both sides and re-derives dirty state for
    /// the destination and the former source.
    pub fn disconnect(&mut self, dest: NodeId, dest_input: usize) -> GraphResult<()> {
        {
            let dest_node = self.by_id(dest).ok_or(GraphError::NodeNotFound(dest))?;
            if dest_input >= dest_node.inputs.len() {
                return Err(GraphError::InputOutOfRange {
                    node_id: dest,
                    input_idx: dest_input,
                });
            }
        }

        let previous = self
            .by_id_mut(dest)
            .expect("validated above")
            .inputs[dest_input]
            .source
            .take();
        if let Some(prev) = previous {
            if let Some(prev_node) = self.by_id_mut(prev.node_id) {
                if let Some(output) = prev_node.outputs.get_mut(prev.output_idx) {
                    output.targets.remove(&InputAddress {
                        node_id: dest,
                        input_idx: dest_input,
                    });
                }
            }
        }

        self.check_structural_change(dest);
        if let Some(prev) = previous {
            if self.by_id(prev.node_id).is_some() {
                self.check_structural_change(prev.node_id);
            }
        }
        self.refresh_lifecycle(dest);

        Ok(())
    }

    /// Aligns the node's ports with the declared specs. Ports at indices that
    /// survive keep their bindings and get their spec refreshed; new specs
    /// append fresh ports; excess ports are severed, then dropped.
    pub fn reconcile_ports(
        &mut self,
        node_id: NodeId,
        input_specs: &[PortSpec],
        output_specs: &[PortSpec],
    ) -> GraphResult<()> {
        let (current_inputs, current_outputs) = {
            let node = self
                .by_id_mut(node_id)
                .ok_or(GraphError::NodeNotFound(node_id))?;

            let current_inputs = node.inputs.len();
            for (idx, spec) in input_specs.iter().enumerate() {
                if idx < current_inputs {
                    node.inputs[idx].spec = spec.clone();
                } else {
                    node.inputs.push(InputPort {
                        spec: spec.clone(),
                        source: None,
                    });
                }
            }

            let current_outputs = node.outputs.len();
            for (idx, spec) in output_specs.iter().enumerate() {
                if idx < current_outputs {
                    node.outputs[idx].spec = spec.clone();
                } else {
                    node.outputs.push(OutputPort {
                        spec: spec.clone(),
                        ..Default::default()
                    });
                }
            }

            (current_inputs, current_outputs)
        };

        if current_inputs > input_specs.len() {
            for idx in input_specs.len()..current_inputs {
                self.disconnect(node_id, idx)?;
            }
            self.by_id_mut(node_id)
                .expect("node exists")
                .inputs
                .truncate(input_specs.len());
        }

        if current_outputs > output_specs.len() {
            for idx in output_specs.len()..current_outputs {
                let targets: Vec<InputAddress> = self.by_id(node_id).expect("node exists").outputs
                    [idx]
                    .targets
                    .iter()
                    .copied()
                    .collect();
                for target in targets {
                    self.disconnect(target.node_id, target.input_idx)?;
                }
            }
            self.by_id_mut(node_id)
                .expect("node exists")
                .outputs
                .truncate(output_specs.len());
        }

        self.refresh_lifecycle(node_id);

        Ok(())
    }

    fn refresh_lifecycle(&mut self, node_id: NodeId) {
        if let Some(node) = self.by_id_mut(node_id) {
            node.refresh_state();
        }
    }
}

// Dirty tracking.
impl Graph {
    /// Pull query: locally dirty, or any bound upstream producer requires
    /// recalculation. The derived bit is cached into the local flag. Cycles
    /// are an assumed-absent precondition.
    pub fn requires_recalc(&mut self, node_id: NodeId) -> bool {
        let node = self
            .by_id(node_id)
            .unwrap_or_else(|| panic!("Node with id {:?} not found", node_id));
        if node.dirty {
            return true;
        }

        let sources: Vec<NodeId> = node
            .inputs
            .iter()
            .filter_map(|input| input.source.map(|addr| addr.node_id))
            .collect();
        let dirty = sources.into_iter().any(|src| self.requires_recalc(src));

        self.by_id_mut(node_id).expect("node exists").dirty = dirty;
        dirty
    }

    /// Writes the local dirty flag. Setting it on a reporting-enabled node
    /// flags the graph as holding unsaved work.
    pub fn set_requires_recalc(&mut self, node_id: NodeId, value: bool) {
        let node = self
            .by_id_mut(node_id)
            .unwrap_or_else(|| panic!("Node with id {:?} not found", node_id));
        node.dirty = value;
        if value && node.reporting {
            self.has_unsaved_changes = true;
        }
    }

    /// Depth-first upstream invalidation: producers are marked first, then
    /// their recalc state is folded into this node. Used to force a whole
    /// graph dirty, e.g. after loading. Cycles are an assumed-absent
    /// precondition.
    pub fn mark_dirty(&mut self, node_id: NodeId) {
        let node = self
            .by_id(node_id)
            .unwrap_or_else(|| panic!("Node with id {:?} not found", node_id));
        let sources: Vec<NodeId> = node
            .inputs
            .iter()
            .filter_map(|input| input.source.map(|addr| addr.node_id))
            .collect();

        let mut dirty = false;
        for src in sources {
            self.mark_dirty(src);
            if self.requires_recalc(src) {
                dirty = true;
            }
        }

        let node = self.by_id_mut(node_id).expect("node exists");
        if !node.dirty {
            node.dirty = dirty;
        }
    }

    /// Compares current bindings against the snapshot taken at the last
    /// saved evaluation and assigns the outcome to the dirty flag: a missing
    /// snapshot entry, an unbound side, a different source node or a
    /// different source output all count as a change. Runs after every
    /// connect/disconnect so rewiring always invalidates cached results.
    pub fn check_structural_change(&mut self, node_id: NodeId) {
        let node = self
            .by_id(node_id)
            .unwrap_or_else(|| panic!("Node with id {:?} not found", node_id));

        let empty_inputs: &[Option<OutputAddress>] = &[];
        let empty_outputs: &[hashbrown::HashSet<InputAddress>] = &[];
        let (snap_inputs, snap_outputs) = node
            .snapshot
            .as_ref()
            .map(|snap| (snap.inputs.as_slice(), snap.outputs.as_slice()))
            .unwrap_or((empty_inputs, empty_outputs));

        let inputs_changed = node.inputs.iter().enumerate().any(|(idx, input)| {
            match (snap_inputs.get(idx).copied().flatten(), input.source) {
                (Some(prev), Some(cur)) => prev != cur,
                _ => true,
            }
        });
        let outputs_changed = node.outputs.iter().enumerate().any(|(idx, output)| {
            snap_outputs
                .get(idx)
                .map_or(true, |prev| *prev != output.targets)
        });

        self.set_requires_recalc(node_id, inputs_changed || outputs_changed);
    }
}

// Serialization.
impl Graph {
    pub fn serialize(&self, format: FileFormat) -> String {
        common::serialize(self, format)
    }
    pub fn deserialize(serialized: &str, format: FileFormat) -> anyhow::Result<Graph> {
        let graph: Graph = common::deserialize(serialized, format)?;

        graph.validate()?;

        Ok(graph)
    }

    pub fn to_yaml(&self) -> String {
        serde_yml::to_string(&self)
            .expect("Failed to serialize graph to YAML")
            .normalize()
    }
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Graph> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Graph> {
        let graph: Graph = serde_yml::from_str(yaml)?;

        graph.validate()?;

        Ok(graph)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for node in self.nodes.iter() {
            if node.id.is_nil() {
                return Err(anyhow::Error::msg("Node has invalid id"));
            }

            for (input_idx, input) in node.inputs.iter().enumerate() {
                let Some(addr) = input.source else {
                    continue;
                };
                let src = self.by_id(addr.node_id).ok_or_else(|| {
                    anyhow::Error::msg("Node input connected to a non-existent node")
                })?;
                let output = src.outputs.get(addr.output_idx).ok_or_else(|| {
                    anyhow::Error::msg("Node input bound to an out-of-range output")
                })?;
                if !output.targets.contains(&InputAddress {
                    node_id: node.id,
                    input_idx,
                }) {
                    return Err(anyhow::Error::msg(
                        "Input binding has no matching output target",
                    ));
                }
            }

            for (output_idx, output) in node.outputs.iter().enumerate() {
                for target in output.targets.iter() {
                    let dest = self.by_id(target.node_id).ok_or_else(|| {
                        anyhow::Error::msg("Output target references a non-existent node")
                    })?;
                    let matches = dest.inputs.get(target.input_idx).is_some_and(|input| {
                        input.source
                            == Some(OutputAddress {
                                node_id: node.id,
                                output_idx,
                            })
                    });
                    if !matches {
                        return Err(anyhow::Error::msg(
                            "Output target has no matching input binding",
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Scheme-style rendering of the node and its upstream graph; unbound
    /// inputs become lambda parameters.
    pub fn print_expression(&self, node_id: NodeId) -> String {
        let node = self
            .by_id(node_id)
            .unwrap_or_else(|| panic!("Node with id {:?} not found", node_id));
        let nick = node.name.replace(' ', "_");

        if !node.inputs.iter().any(|input| input.source.is_some()) {
            return nick;
        }

        if node.all_inputs_bound() {
            let mut s = format!("({}", nick);
            for input in node.inputs.iter() {
                let addr = input.source.expect("all inputs bound");
                s.push(' ');
                s.push_str(&self.print_expression(addr.node_id));
            }
            s.push(')');
            s
        } else {
            let free: Vec<&str> = node
                .inputs
                .iter()
                .filter(|input| input.source.is_none())
                .map(|input| input.spec.name.as_str())
                .collect();
            let mut s = format!("(lambda ({}) ({}", free.join(" "), nick);
            for input in node.inputs.iter() {
                s.push(' ');
                match input.source {
                    Some(addr) => s.push_str(&self.print_expression(addr.node_id)),
                    None => s.push_str(&input.spec.name),
                }
            }
            s.push_str("))");
            s
        }
    }
}

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::data::{DataType, Value};
use crate::node_type::{NodeType, NodeTypeId};
use crate::subgraph::SubgraphKey;
use common::{id_type, BoolExt};

id_type!(NodeId);

/// Declared port metadata. Immutable after registration except through
/// `Graph::reconcile_ports`.
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub data_type: DataType,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct OutputAddress {
    pub node_id: NodeId,
    pub output_idx: usize,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct InputAddress {
    pub node_id: NodeId,
    pub input_idx: usize,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Display, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Dead,
    Active,
    Error,
}

/// At most one producer per input.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct InputPort {
    pub spec: PortSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<OutputAddress>,
}

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct OutputPort {
    pub spec: PortSpec,
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub targets: HashSet<InputAddress>,
    #[serde(skip)]
    pub value: Option<Value>,
}

/// Input/output bindings recorded when a node was evaluated under the
/// save-result policy. Consulted by the structural-change check only.
#[derive(Clone, Default, Debug)]
pub struct PortSnapshot {
    pub inputs: Vec<Option<OutputAddress>>,
    pub outputs: Vec<HashSet<InputAddress>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub type_id: NodeTypeId,

    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgraph_key: Option<SubgraphKey>,

    pub save_result: bool,
    pub reporting: bool,
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputPort>,

    #[serde(skip, default = "default_dirty")]
    pub(crate) dirty: bool,
    #[serde(skip)]
    pub(crate) cached: Option<Value>,
    #[serde(skip)]
    pub(crate) snapshot: Option<PortSnapshot>,
}

fn default_dirty() -> bool {
    true
}

impl Default for Node {
    fn default() -> Self {
        Node {
            id: NodeId::unique(),
            type_id: NodeTypeId::nil(),
            name: "".to_string(),
            subgraph_key: None,
            save_result: false,
            reporting: true,
            state: NodeState::Dead,
            diagnostic: None,
            inputs: vec![],
            outputs: vec![],
            dirty: true,
            cached: None,
            snapshot: None,
        }
    }
}

impl Node {
    pub fn from_type(node_type: &NodeType) -> Node {
        let inputs: Vec<InputPort> = node_type
            .inputs
            .iter()
            .map(|spec| InputPort {
                spec: spec.clone(),
                source: None,
            })
            .collect();
        let outputs: Vec<OutputPort> = node_type
            .outputs
            .iter()
            .map(|spec| OutputPort {
                spec: spec.clone(),
                targets: HashSet::new(),
                value: None,
            })
            .collect();

        Node {
            id: NodeId::unique(),
            type_id: node_type.id,
            name: node_type.name.clone(),
            inputs,
            outputs,
            ..Default::default()
        }
    }

    pub fn has_input(&self, input_idx: usize) -> bool {
        self.inputs
            .get(input_idx)
            .is_some_and(|input| input.source.is_some())
    }
    pub fn has_output(&self, output_idx: usize) -> bool {
        self.outputs
            .get(output_idx)
            .is_some_and(|output| !output.targets.is_empty())
    }

    pub fn all_inputs_bound(&self) -> bool {
        self.inputs.iter().all(|input| input.source.is_some())
    }

    /// True when no output feeds another node.
    pub fn is_sink(&self) -> bool {
        self.outputs.iter().all(|output| output.targets.is_empty())
    }

    /// The save-result policy only holds while every declared input is bound.
    pub fn save_result_active(&self) -> bool {
        self.save_result && self.all_inputs_bound()
    }

    /// Last value computed for a single declared output.
    pub fn output_value(&self, output_idx: usize) -> Option<&Value> {
        self.outputs
            .get(output_idx)
            .and_then(|output| output.value.as_ref())
    }

    /// Combined result of the last evaluation, if any.
    pub fn cached_result(&self) -> Option<&Value> {
        self.cached.as_ref()
    }

    /// Suppresses unsaved-work notifications, e.g. during bulk edits.
    pub fn disable_reporting(&mut self) {
        self.reporting = false;
    }
    pub fn enable_reporting(&mut self) {
        self.reporting = true;
    }

    pub fn set_error(&mut self, diagnostic: impl Into<String>) {
        self.state = NodeState::Error;
        self.diagnostic = Some(diagnostic.into());
    }

    /// Dead while any declared input is unbound, Active otherwise. An Error
    /// state is preserved until explicitly cleared.
    pub fn refresh_state(&mut self) {
        if self.state == NodeState::Error {
            return;
        }
        self.state = self
            .inputs
            .iter()
            .any(|input| input.source.is_none())
            .then_else(NodeState::Dead, NodeState::Active);
    }

    pub fn take_snapshot(&mut self) {
        self.snapshot = Some(PortSnapshot {
            inputs: self.inputs.iter().map(|input| input.source).collect(),
            outputs: self
                .outputs
                .iter()
                .map(|output| output.targets.clone())
                .collect(),
        });
    }
}

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use hashbrown::hash_map::{Entry, Values};
use serde::{Deserialize, Serialize};

use crate::data::Value;
use crate::node::PortSpec;
use common::id_type;
use common::normalize_string::NormalizeString;

id_type!(NodeTypeId);

/// A node's user-defined evaluation logic. Receives the concrete argument
/// values and fills one slot per declared output.
pub type LogicFn =
    dyn Fn(&[Value], &mut [Option<Value>]) -> anyhow::Result<()> + Send + Sync + 'static;

pub type HookFn = dyn Fn() + Send + Sync + 'static;

#[derive(Clone, Default)]
pub enum NodeLogic {
    #[default]
    None,
    Logic(Arc<LogicFn>),
}

#[derive(Clone, Default)]
pub enum NodeHook {
    #[default]
    None,
    Hook(Arc<HookFn>),
}

impl NodeLogic {
    pub fn new<F>(logic: F) -> Self
    where
        F: Fn(&[Value], &mut [Option<Value>]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Logic(Arc::new(logic))
    }

    pub fn invoke(&self, args: &[Value], outputs: &mut [Option<Value>]) -> anyhow::Result<()> {
        match self {
            NodeLogic::None => {
                panic!("Node type missing logic");
            }
            NodeLogic::Logic(inner) => (inner)(args, outputs),
        }
    }
}

impl NodeHook {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::Hook(Arc::new(hook))
    }

    pub fn fire(&self) {
        if let NodeHook::Hook(inner) = self {
            (inner)();
        }
    }
}

impl Debug for NodeLogic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeLogic::None => write!(f, "NodeLogic::None"),
            NodeLogic::Logic(_) => write!(f, "NodeLogic::Logic(<function>)"),
        }
    }
}

impl Debug for NodeHook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeHook::None => write!(f, "NodeHook::None"),
            NodeHook::Hook(_) => write!(f, "NodeHook::Hook(<function>)"),
        }
    }
}

/// Static descriptor of a node type: display metadata, declared ports and
/// evaluation logic. Registered once at startup and queried by id.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct NodeType {
    pub id: NodeTypeId,
    pub name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_tags: Vec<String>,
    /// Evaluation is routed through the injected coordinator when set.
    pub interactive: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PortSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PortSpec>,

    #[serde(skip)]
    pub logic: NodeLogic,
    #[serde(skip)]
    pub on_evaluate: NodeHook,
    #[serde(skip)]
    pub on_cancel: NodeHook,
}

#[derive(Default, Debug, Clone)]
pub struct TypeLib {
    types: hashbrown::HashMap<NodeTypeId, NodeType>,
}

impl TypeLib {
    pub fn from_yaml_file(file_path: &str) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(file_path)?;
        Self::from_yaml(&yaml)
    }
    /// Deserialized types carry no logic; hosts re-attach closures by id.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let types: Vec<NodeType> = serde_yml::from_str(yaml)?;

        Ok(types.into())
    }
    pub fn to_yaml(&self) -> String {
        let mut types: Vec<&NodeType> = self.types.values().collect();
        types.sort_by(|a, b| a.id.cmp(&b.id));

        serde_yml::to_string(&types)
            .expect("Failed to serialize type library to YAML")
            .normalize()
    }

    pub fn by_id(&self, id: NodeTypeId) -> Option<&NodeType> {
        self.types.get(&id)
    }
    pub fn by_id_mut(&mut self, id: NodeTypeId) -> Option<&mut NodeType> {
        self.types.get_mut(&id)
    }
    pub fn by_name(&self, name: &str) -> Option<&NodeType> {
        self.types.values().find(|node_type| node_type.name == name)
    }
    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut NodeType> {
        self.types
            .values_mut()
            .find(|node_type| node_type.name == name)
    }
    pub fn add(&mut self, node_type: NodeType) {
        let entry = self.types.entry(node_type.id);
        match entry {
            Entry::Occupied(_) => {
                panic!("Node type already exists");
            }
            Entry::Vacant(_) => {
                entry.insert(node_type);
            }
        }
    }
    pub fn iter(&self) -> Values<'_, NodeTypeId, NodeType> {
        self.types.values()
    }
    pub fn merge(&mut self, other: TypeLib) {
        for (_id, node_type) in other.types {
            self.add(node_type);
        }
    }
    pub fn len(&self) -> usize {
        self.types.len()
    }
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl<It> From<It> for TypeLib
where
    It: IntoIterator<Item = NodeType>,
{
    fn from(iter: It) -> Self {
        let mut type_lib = TypeLib::default();
        for node_type in iter {
            type_lib.add(node_type);
        }
        type_lib
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;

    fn sum_type() -> NodeType {
        NodeType {
            id: NodeTypeId::from_u128(0x2d3b389d_7b58_44d9_b3d1_a595765b21a5),
            name: "sum".to_string(),
            category: "Math".to_string(),
            search_tags: vec!["add".to_string(), "plus".to_string()],
            inputs: vec![
                PortSpec {
                    name: "a".to_string(),
                    data_type: DataType::Float,
                    ..Default::default()
                },
                PortSpec {
                    name: "b".to_string(),
                    data_type: DataType::Float,
                    ..Default::default()
                },
            ],
            outputs: vec![PortSpec {
                name: "sum".to_string(),
                data_type: DataType::Float,
                ..Default::default()
            }],
            logic: NodeLogic::new(|args, outputs| {
                outputs[0] = Some((args[0].as_float() + args[1].as_float()).into());
                Ok(())
            }),
            ..Default::default()
        }
    }

    #[test]
    fn yaml_roundtrip_keeps_descriptor() -> anyhow::Result<()> {
        let type_lib: TypeLib = [sum_type()].into();

        let yaml = type_lib.to_yaml();
        let restored = TypeLib::from_yaml(&yaml)?;

        let sum = restored
            .by_name("sum")
            .unwrap_or_else(|| panic!("Node type named \"sum\" not found"));
        assert_eq!(sum.category, "Math");
        assert_eq!(sum.inputs.len(), 2);
        assert_eq!(sum.outputs.len(), 1);
        assert_eq!(sum.search_tags, vec!["add", "plus"]);
        assert!(matches!(sum.logic, NodeLogic::None));

        Ok(())
    }

    #[test]
    #[should_panic(expected = "Node type already exists")]
    fn duplicate_id_panics() {
        let mut type_lib = TypeLib::default();
        type_lib.add(sum_type());
        type_lib.add(sum_type());
    }

    #[test]
    fn logic_invokes() -> anyhow::Result<()> {
        let sum = sum_type();
        let mut outputs = vec![None];
        sum.logic
            .invoke(&[Value::Float(2.0), Value::Float(3.0)], &mut outputs)?;
        assert_eq!(outputs[0], Some(Value::Float(5.0)));

        Ok(())
    }
}

use std::fmt::Debug;

use hashbrown::hash_map::{Entry, Values};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::graph::Graph;
use crate::node::NodeId;
use common::id_type;

id_type!(SubgraphKey);

/// A named, externally stored node graph referenced by key from within
/// another graph.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct SubgraphDef {
    pub key: SubgraphKey,
    pub name: String,
    pub graph: Graph,
}

impl SubgraphDef {
    /// Entry points for traversal: the stored graph's nodes with no outgoing
    /// connections.
    pub fn sink_nodes(&self) -> Vec<NodeId> {
        self.graph.sink_nodes()
    }
}

/// Resolution of subgraph references. Injected into the compiler and the
/// traverser; read-mostly, queried freely during compile and traverse.
pub trait SubgraphRegistry: Debug {
    fn contains(&self, key: SubgraphKey) -> bool;
    fn resolve(&self, key: SubgraphKey) -> Option<&SubgraphDef>;
}

/// In-memory registry implementation.
#[derive(Default, Debug)]
pub struct SubgraphLib {
    defs: HashMap<SubgraphKey, SubgraphDef>,
}

impl SubgraphLib {
    pub fn add(&mut self, def: SubgraphDef) {
        let entry = self.defs.entry(def.key);
        match entry {
            Entry::Occupied(_) => {
                panic!("Subgraph definition already exists");
            }
            Entry::Vacant(_) => {
                entry.insert(def);
            }
        }
    }
    pub fn by_key(&self, key: SubgraphKey) -> Option<&SubgraphDef> {
        self.defs.get(&key)
    }
    pub fn iter(&self) -> Values<'_, SubgraphKey, SubgraphDef> {
        self.defs.values()
    }
    pub fn len(&self) -> usize {
        self.defs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl SubgraphRegistry for SubgraphLib {
    fn contains(&self, key: SubgraphKey) -> bool {
        self.defs.contains_key(&key)
    }
    fn resolve(&self, key: SubgraphKey) -> Option<&SubgraphDef> {
        self.defs.get(&key)
    }
}

impl<It> From<It> for SubgraphLib
where
    It: IntoIterator<Item = SubgraphDef>,
{
    fn from(iter: It) -> Self {
        let mut lib = SubgraphLib::default();
        for def in iter {
            lib.add(def);
        }
        lib
    }
}

//! Identifier-keyed node storage.

use std::collections::HashMap;

use crate::error::{TapeError, TapeResult};
use crate::tape::node::{Node, NodeId};
use crate::value::TapeValue;

/// Arena-style store mapping monotonically issued identifiers to nodes.
/// Identifier `0` is reserved and never installed; keys are never reused
/// within the store's lifetime.
pub(crate) struct NodeStore<V: TapeValue> {
    nodes: HashMap<u32, Node<V>>,
    counter: u32,
}

impl<V: TapeValue> NodeStore<V> {
    pub fn new() -> Self {
        NodeStore {
            nodes: HashMap::new(),
            counter: 1,
        }
    }

    /// Installs a fresh node and returns its identifier. The node starts
    /// with `ref_count = 1`, assigned to the creating caller.
    pub fn allocate(&mut self, size: usize, label: String) -> NodeId {
        let index = self.counter;
        self.counter += 1;
        self.nodes.insert(index, Node::new(size, label));
        NodeId(index)
    }

    pub fn node(&self, index: NodeId) -> TapeResult<&Node<V>> {
        self.nodes
            .get(&index.0)
            .ok_or(TapeError::UnknownNode { index })
    }

    pub fn node_mut(&mut self, index: NodeId) -> TapeResult<&mut Node<V>> {
        self.nodes
            .get_mut(&index.0)
            .ok_or(TapeError::UnknownNode { index })
    }

    pub fn get_mut(&mut self, index: NodeId) -> Option<&mut Node<V>> {
        self.nodes.get_mut(&index.0)
    }

    pub fn remove(&mut self, index: NodeId) -> TapeResult<Node<V>> {
        self.nodes
            .remove(&index.0)
            .ok_or(TapeError::UnknownNode { index })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node<V>)> {
        self.nodes.iter().map(|(&index, node)| (NodeId(index), node))
    }
}

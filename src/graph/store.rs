//! The embedded property graph: arena-owned nodes and edges behind a single
//! reader-writer lock, with tag/edge-type indices and a per-(tag,key)
//! secondary property index.
//!
//! Nodes and edges are never deleted by this engine, so the arena is simply
//! two growable vectors indexed by id; a freed slot never occurs.
//! Cross-references are always by id, never by owning pointer, so iterators
//! can outlive a single borrow of the store.

use super::edge::Edge;
use super::node::Node;
use super::property::{PropertyMap, PropertyValue};
use super::types::{EdgeId, EdgeType, NodeId, Tag};
use crate::error::GraphError;
use crate::index::IndexManager;
use crate::rwlock::RwLock;
use rustc_hash::FxHashMap;
use std::collections::HashSet;

pub type GraphResult<T> = Result<T, GraphError>;

/// The transactional, embedded property graph.
///
/// The RW lock guards transactional access from the query layer; the arena
/// and indices themselves assume the caller already holds the appropriate
/// lock (this mirrors the original engine, where the lock is acquired once
/// per batch and all per-command mutation happens while it's held).
pub struct GraphStore {
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<Edge>>,
    tag_index: FxHashMap<Tag, HashSet<NodeId>>,
    edge_type_index: FxHashMap<EdgeType, HashSet<EdgeId>>,
    outgoing: FxHashMap<NodeId, Vec<EdgeId>>,
    incoming: FxHashMap<NodeId, Vec<EdgeId>>,
    pub indices: IndexManager,
    pub lock: RwLock,
}

impl GraphStore {
    pub fn new() -> Self {
        GraphStore {
            nodes: Vec::new(),
            edges: Vec::new(),
            tag_index: FxHashMap::default(),
            edge_type_index: FxHashMap::default(),
            outgoing: FxHashMap::default(),
            incoming: FxHashMap::default(),
            indices: IndexManager::new(),
            lock: RwLock::new(),
        }
    }

    // --- nodes -----------------------------------------------------------

    pub fn create_node(&mut self, tag: impl Into<Tag>) -> NodeId {
        self.create_node_with_properties(tag, PropertyMap::new())
    }

    pub fn create_node_with_properties(&mut self, tag: impl Into<Tag>, properties: PropertyMap) -> NodeId {
        let tag = tag.into();
        let id = NodeId::new(self.nodes.len() as u64);
        let node = Node::new_with_properties(id, tag.clone(), properties.clone());
        self.nodes.push(Some(node));
        self.tag_index.entry(tag.clone()).or_default().insert(id);
        for (key, value) in properties.iter() {
            self.indices.index_insert(&tag, key, value.clone(), id);
        }
        id
    }

    /// Used by recovery paths to re-insert a node with a pre-assigned id,
    /// re-derived from a persisted snapshot.
    pub fn insert_recovered_node(&mut self, node: Node) {
        let id = node.id.as_u64() as usize;
        if self.nodes.len() <= id {
            self.nodes.resize_with(id + 1, || None);
        }
        self.tag_index.entry(node.tag.clone()).or_default().insert(node.id);
        for (key, value) in node.properties.iter() {
            self.indices.index_insert(&node.tag, key, value.clone(), node.id);
        }
        self.nodes[id] = Some(node);
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_u64() as usize).and_then(|n| n.as_ref())
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.as_u64() as usize).and_then(|n| n.as_mut())
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.get_node(id).is_some()
    }

    /// Set a property on a node, keeping the secondary index consistent.
    pub fn set_node_property(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<()> {
        let key = key.into();
        let value = value.into();
        let tag = self.get_node(id).ok_or(GraphError::NoSuchNode(id.as_u64()))?.tag.clone();
        let old = self.get_node_mut(id).unwrap().set_property(key.clone(), value.clone());
        if let Some(old) = old {
            self.indices.index_remove(&tag, &key, &old, id);
        }
        self.indices.index_insert(&tag, &key, value, id);
        Ok(())
    }

    pub fn remove_node_property(&mut self, id: NodeId, key: &str) -> GraphResult<()> {
        let tag = self.get_node(id).ok_or(GraphError::NoSuchNode(id.as_u64()))?.tag.clone();
        if let Some(old) = self.get_node_mut(id).unwrap().remove_property(key) {
            self.indices.index_remove(&tag, key, &old, id);
        }
        Ok(())
    }

    /// All node ids tagged `tag`, in ascending id order (deterministic
    /// iteration order for the query layer's "all nodes with tag T" start set).
    pub fn nodes_by_tag(&self, tag: &Tag) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .tag_index
            .get(tag)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    // --- edges -------------------------------------------------------------

    pub fn create_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: impl Into<EdgeType>,
    ) -> GraphResult<EdgeId> {
        self.create_edge_with_properties(source, target, edge_type, PropertyMap::new())
    }

    pub fn create_edge_with_properties(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: impl Into<EdgeType>,
        properties: PropertyMap,
    ) -> GraphResult<EdgeId> {
        if !self.has_node(source) {
            return Err(GraphError::NoSuchNode(source.as_u64()));
        }
        if !self.has_node(target) {
            return Err(GraphError::NoSuchNode(target.as_u64()));
        }
        let edge_type = edge_type.into();
        let id = EdgeId::new(self.edges.len() as u64);
        let edge = Edge::new_with_properties(id, source, target, edge_type.clone(), properties);
        self.edges.push(Some(edge));
        self.edge_type_index.entry(edge_type).or_default().insert(id);
        self.outgoing.entry(source).or_default().push(id);
        self.incoming.entry(target).or_default().push(id);
        Ok(id)
    }

    pub fn insert_recovered_edge(&mut self, edge: Edge) -> GraphResult<()> {
        if !self.has_node(edge.source) || !self.has_node(edge.target) {
            return Err(GraphError::NoSuchNode(edge.source.as_u64()));
        }
        let id = edge.id.as_u64() as usize;
        if self.edges.len() <= id {
            self.edges.resize_with(id + 1, || None);
        }
        self.edge_type_index.entry(edge.edge_type.clone()).or_default().insert(edge.id);
        self.outgoing.entry(edge.source).or_default().push(edge.id);
        self.incoming.entry(edge.target).or_default().push(edge.id);
        self.edges[id] = Some(edge);
        Ok(())
    }

    pub fn get_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.as_u64() as usize).and_then(|e| e.as_ref())
    }

    pub fn get_edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(id.as_u64() as usize).and_then(|e| e.as_mut())
    }

    pub fn set_edge_property(&mut self, id: EdgeId, key: impl Into<String>, value: impl Into<PropertyValue>) -> GraphResult<()> {
        self.get_edge_mut(id).ok_or(GraphError::NoSuchEdge(id.as_u64()))?.set_property(key, value);
        Ok(())
    }

    pub fn remove_edge_property(&mut self, id: EdgeId, key: &str) -> GraphResult<()> {
        self.get_edge_mut(id).ok_or(GraphError::NoSuchEdge(id.as_u64()))?.remove_property(key);
        Ok(())
    }

    pub fn edges_by_type(&self, edge_type: &EdgeType) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = self
            .edge_type_index
            .get(edge_type)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn outgoing_edges(&self, node: NodeId) -> &[EdgeId] {
        self.outgoing.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn incoming_edges(&self, node: NodeId) -> &[EdgeId] {
        self.incoming.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    // --- transaction rollback support --------------------------------------
    //
    // The query handler records an undo action for every mutation it applies
    // so a mid-batch abort can restore the pre-transaction state exactly,
    // without paying for a full copy-on-write arena when most batches commit.

    pub(crate) fn undo_create_node(&mut self, id: NodeId) {
        let idx = id.as_u64() as usize;
        if let Some(Some(node)) = self.nodes.get(idx) {
            let tag = node.tag.clone();
            if let Some(set) = self.tag_index.get_mut(&tag) {
                set.remove(&id);
            }
            for (key, value) in node.properties.clone() {
                self.indices.index_remove(&tag, &key, &value, id);
            }
        }
        if idx + 1 == self.nodes.len() {
            self.nodes.pop();
        } else {
            self.nodes[idx] = None;
        }
    }

    pub(crate) fn undo_create_edge(&mut self, id: EdgeId) {
        let idx = id.as_u64() as usize;
        if let Some(Some(edge)) = self.edges.get(idx) {
            if let Some(set) = self.edge_type_index.get_mut(&edge.edge_type) {
                set.remove(&id);
            }
            if let Some(v) = self.outgoing.get_mut(&edge.source) {
                v.retain(|&e| e != id);
            }
            if let Some(v) = self.incoming.get_mut(&edge.target) {
                v.retain(|&e| e != id);
            }
        }
        if idx + 1 == self.edges.len() {
            self.edges.pop();
        } else {
            self.edges[idx] = None;
        }
    }

    pub(crate) fn restore_node_property(&mut self, id: NodeId, key: &str, old: Option<PropertyValue>) {
        match old {
            Some(value) => {
                let _ = self.set_node_property(id, key.to_string(), value);
            }
            None => {
                let _ = self.remove_node_property(id, key);
            }
        }
    }

    pub(crate) fn restore_edge_property(&mut self, id: EdgeId, key: &str, old: Option<PropertyValue>) {
        match old {
            Some(value) => {
                let _ = self.set_edge_property(id, key.to_string(), value);
            }
            None => {
                let _ = self.remove_edge_property(id, key);
            }
        }
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch_node() {
        let mut store = GraphStore::new();
        let id = store.create_node("image");
        assert!(store.has_node(id));
        assert_eq!(store.get_node(id).unwrap().tag.as_str(), "image");
    }

    #[test]
    fn edge_requires_extant_endpoints() {
        let mut store = GraphStore::new();
        let a = store.create_node("image");
        let missing = NodeId::new(999);
        assert!(store.create_edge(a, missing, "region_of").is_err());
    }

    #[test]
    fn tag_index_is_deterministic() {
        let mut store = GraphStore::new();
        let a = store.create_node("image");
        let b = store.create_node("image");
        let found = store.nodes_by_tag(&Tag::new("image"));
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn set_property_updates_index() {
        let mut store = GraphStore::new();
        let a = store.create_node("image");
        store.set_node_property(a, "tag", "test").unwrap();
        store.indices.create_index(Tag::new("image"), "tag".to_string());
        store.set_node_property(a, "tag", "test2").unwrap();
        let idx = store.indices.get_index(&Tag::new("image"), "tag").unwrap();
        let matches = idx.read().unwrap().get(&PropertyValue::String("test2".to_string()));
        assert_eq!(matches, vec![a]);
    }

    #[test]
    fn outgoing_and_incoming_track_edges() {
        let mut store = GraphStore::new();
        let a = store.create_node("image");
        let b = store.create_node("region");
        let e = store.create_edge(a, b, "region_of").unwrap();
        assert_eq!(store.outgoing_edges(a), &[e]);
        assert_eq!(store.incoming_edges(b), &[e]);
    }
}

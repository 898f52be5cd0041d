//! The reusable-iterator family used by the query compiler.
//!
//! All four flavors share the same late-materialization shape described in
//! the design notes: `{fresh → drained → replayable}`. In practice "fresh"
//! never survives past construction here — the iterator is built already
//! drained into an in-memory `Vec`, because every consumer either needs
//! random access (sort, `reset`) or repeated traversal (`_ref` reuse) that a
//! single-pass store scan can't give cheaply. `reset()` always returns to
//! the head without re-scanning the store, matching the "replayable" state.

use super::edge::Edge;
use super::node::Node;
use super::property::PropertyPredicate;
use super::store::GraphStore;
use super::types::{EdgeId, EdgeType, NodeId};
use crate::error::GraphError;

/// A node iterator, drained into memory once and replayable thereafter.
#[derive(Debug, Clone, Default)]
pub struct ReusableNodeIterator {
    items: Vec<NodeId>,
    pos: usize,
}

impl ReusableNodeIterator {
    pub fn from_ids(items: Vec<NodeId>) -> Self {
        ReusableNodeIterator { items, pos: 0 }
    }

    pub fn reset(&mut self) {
        self.pos = 0;
    }

    pub fn next(&mut self) -> Option<NodeId> {
        let item = self.items.get(self.pos).copied();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    pub fn peek_next(&self) -> Option<NodeId> {
        self.items.get(self.pos).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[NodeId] {
        &self.items
    }

    /// Stable sort by a property key; sort resets position to the head, per
    /// the reusable-iterator invariant.
    pub fn sort_by_property(&mut self, store: &GraphStore, key: &str) {
        self.items.sort_by(|&a, &b| {
            let va = store.get_node(a).and_then(|n| n.get_property(key));
            let vb = store.get_node(b).and_then(|n| n.get_property(key));
            match (va, vb) {
                (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
        self.pos = 0;
    }

    pub fn apply_limit(&mut self, limit: usize) {
        self.items.truncate(limit);
    }

    /// Whether this iterator, probed one element past the first, has a
    /// second row — the uniqueness check the query handler runs without
    /// fully draining the set.
    pub fn is_unique(&self) -> bool {
        self.items.len() <= 1
    }
}

/// An edge iterator with the same shape, plus the ability to append edges
/// as `AddEdge` constructs a cartesian product.
#[derive(Debug, Clone, Default)]
pub struct ReusableEdgeIterator {
    items: Vec<EdgeId>,
    pos: usize,
}

impl ReusableEdgeIterator {
    pub fn from_ids(items: Vec<EdgeId>) -> Self {
        ReusableEdgeIterator { items, pos: 0 }
    }

    pub fn reset(&mut self) {
        self.pos = 0;
    }

    pub fn next(&mut self) -> Option<EdgeId> {
        let item = self.items.get(self.pos).copied();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    pub fn append(&mut self, id: EdgeId) {
        self.items.push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[EdgeId] {
        &self.items
    }

    pub fn sort_by_property(&mut self, store: &GraphStore, key: &str) {
        self.items.sort_by(|&a, &b| {
            let va = store.get_edge(a).and_then(|e| e.get_property(key));
            let vb = store.get_edge(b).and_then(|e| e.get_property(key));
            match (va, vb) {
                (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
        self.pos = 0;
    }

    pub fn apply_limit(&mut self, limit: usize) {
        self.items.truncate(limit);
    }

    pub fn is_unique(&self) -> bool {
        self.items.len() <= 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Any,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            "any" => Some(Direction::Any),
            _ => None,
        }
    }
}

/// Given a source node set, walks neighbors via edges of an optional tag in
/// the given direction, keeping only neighbors whose properties satisfy the
/// optional predicate. Declaring `unique` over more than one source node is
/// unsupported and reported as an error rather than silently deduped.
pub fn multi_neighbor(
    store: &GraphStore,
    sources: &[NodeId],
    direction: Direction,
    edge_tag: Option<&EdgeType>,
    predicate_key: Option<&str>,
    predicate: Option<&PropertyPredicate>,
    unique: bool,
) -> Result<Vec<NodeId>, GraphError> {
    if unique && sources.len() > 1 {
        return Err(GraphError::UnsupportedCrossSourceUniqueness);
    }

    let mut out = Vec::new();
    for &src in sources {
        let mut neighbor_ids: Vec<NodeId> = Vec::new();
        if matches!(direction, Direction::Out | Direction::Any) {
            for &eid in store.outgoing_edges(src) {
                if let Some(edge) = store.get_edge(eid) {
                    if edge_tag.map(|t| t == &edge.edge_type).unwrap_or(true) {
                        neighbor_ids.push(edge.target);
                    }
                }
            }
        }
        if matches!(direction, Direction::In | Direction::Any) {
            for &eid in store.incoming_edges(src) {
                if let Some(edge) = store.get_edge(eid) {
                    if edge_tag.map(|t| t == &edge.edge_type).unwrap_or(true) {
                        neighbor_ids.push(edge.source);
                    }
                }
            }
        }
        for nid in neighbor_ids {
            let keep = match (predicate_key, predicate) {
                (Some(key), Some(pred)) => {
                    let value = store.get_node(nid).and_then(|n| n.get_property(key));
                    if value.map(|v| v.is_blob()).unwrap_or(false) {
                        return Err(GraphError::PropertyTypeInvalid);
                    }
                    pred.matches(value)
                }
                _ => true,
            };
            if keep {
                out.push(nid);
            }
        }
    }

    if unique {
        out.dedup();
    }
    Ok(out)
}

/// Walks edges anchored at an optional source node set and optionally
/// filtered to destinations within a given node set. Used by `QueryEdge`.
pub fn node_edge_walk(
    store: &GraphStore,
    edge_type: &EdgeType,
    src_filter: Option<&[NodeId]>,
    dst_filter: Option<&[NodeId]>,
) -> Vec<EdgeId> {
    use std::collections::HashSet;
    let src_set: Option<HashSet<NodeId>> = src_filter.map(|s| s.iter().copied().collect());
    let dst_set: Option<HashSet<NodeId>> = dst_filter.map(|s| s.iter().copied().collect());

    let mut ids = store.edges_by_type(edge_type);
    ids.retain(|&eid| {
        let edge = match store.get_edge(eid) {
            Some(e) => e,
            None => return false,
        };
        let src_ok = src_set.as_ref().map(|s| s.contains(&edge.source)).unwrap_or(true);
        let dst_ok = dst_set.as_ref().map(|s| s.contains(&edge.target)).unwrap_or(true);
        src_ok && dst_ok
    });
    ids
}

pub fn node_list(store: &GraphStore, ids: &[NodeId]) -> Vec<&Node> {
    ids.iter().filter_map(|&id| store.get_node(id)).collect()
}

pub fn edge_list(store: &GraphStore, ids: &[EdgeId]) -> Vec<&Edge> {
    ids.iter().filter_map(|&id| store.get_edge(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Tag;

    #[test]
    fn reusable_node_iterator_resets() {
        let mut it = ReusableNodeIterator::from_ids(vec![NodeId::new(1), NodeId::new(2)]);
        assert_eq!(it.next(), Some(NodeId::new(1)));
        it.reset();
        assert_eq!(it.next(), Some(NodeId::new(1)));
    }

    #[test]
    fn multi_neighbor_respects_direction() {
        let mut store = GraphStore::new();
        let a = store.create_node(Tag::new("image"));
        let b = store.create_node(Tag::new("region"));
        store.create_edge(a, b, "region_of").unwrap();

        let out = multi_neighbor(&store, &[a], Direction::Out, None, None, None, false).unwrap();
        assert_eq!(out, vec![b]);

        let in_ = multi_neighbor(&store, &[b], Direction::In, None, None, None, false).unwrap();
        assert_eq!(in_, vec![a]);
    }

    #[test]
    fn unique_across_sources_is_unsupported() {
        let mut store = GraphStore::new();
        let a = store.create_node(Tag::new("image"));
        let b = store.create_node(Tag::new("image"));
        let result = multi_neighbor(&store, &[a, b], Direction::Out, None, None, None, true);
        assert!(result.is_err());
    }
}

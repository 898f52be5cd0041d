//! Batch-scoped query handler: owns the `_ref` table and the undo log for
//! the single transaction a batch opens, and exposes the six public
//! operations the command dispatcher drives one per JSON command.

use std::collections::HashMap;

use crate::error::{GraphError, QueryError, StatusCode};
use crate::graph::iterators::{
    edge_list, multi_neighbor, node_edge_walk, node_list, Direction, ReusableEdgeIterator,
    ReusableNodeIterator,
};
use crate::graph::{EdgeId, EdgeType, GraphStore, NodeId, PropertyMap, PropertyPredicate, PropertyValue, Tag};

use super::{Constraint, LinkSpec, QueryEdgeSpec, QueryNodeSpec, ResultPayload, ResultRow, ResultShape};

/// What a `_ref` currently names.
enum RefEntry {
    Nodes(ReusableNodeIterator),
    Edges(ReusableEdgeIterator),
}

/// One reversible mutation, recorded so `tx_abort` can restore the
/// pre-transaction state exactly.
enum UndoAction {
    Node(NodeId),
    Edge(EdgeId),
    NodeProp(NodeId, String, Option<PropertyValue>),
    EdgeProp(EdgeId, String, Option<PropertyValue>),
}

/// Either an existing `_ref` or an embedded query, as accepted by
/// `UpdateNode`/`UpdateEdge`.
pub enum NodeTarget {
    Ref(i64),
    Query(QueryNodeSpec),
}

pub enum EdgeTarget {
    Ref(i64),
    Query(QueryEdgeSpec),
}

pub struct QueryHandler<'a> {
    store: &'a mut GraphStore,
    refs: HashMap<i64, RefEntry>,
    undo: Vec<UndoAction>,
    write_mode: Option<bool>,
}

impl<'a> QueryHandler<'a> {
    pub fn new(store: &'a mut GraphStore) -> Self {
        QueryHandler { store, refs: HashMap::new(), undo: Vec::new(), write_mode: None }
    }

    pub fn tx_begin(&mut self, write: bool) -> Result<(), GraphError> {
        if write {
            self.store.lock.write_lock()?;
        } else {
            self.store.lock.read_lock()?;
        }
        self.write_mode = Some(write);
        Ok(())
    }

    pub fn tx_commit(&mut self) {
        self.release_lock();
        self.refs.clear();
        self.undo.clear();
    }

    pub fn tx_abort(&mut self) {
        while let Some(action) = self.undo.pop() {
            match action {
                UndoAction::Node(id) => self.store.undo_create_node(id),
                UndoAction::Edge(id) => self.store.undo_create_edge(id),
                UndoAction::NodeProp(id, key, old) => self.store.restore_node_property(id, &key, old),
                UndoAction::EdgeProp(id, key, old) => self.store.restore_edge_property(id, &key, old),
            }
        }
        self.release_lock();
        self.refs.clear();
    }

    fn release_lock(&mut self) {
        match self.write_mode.take() {
            Some(true) => self.store.lock.write_unlock(),
            Some(false) => self.store.lock.read_unlock(),
            None => {}
        }
    }

    fn declare_ref(&mut self, ref_id: Option<i64>, entry: RefEntry) -> Result<(), QueryError> {
        if let Some(r) = ref_id {
            if self.refs.contains_key(&r) {
                return Err(QueryError::RefReused(r));
            }
            self.refs.insert(r, entry);
        }
        Ok(())
    }

    fn ref_node_ids(&self, r: i64) -> Result<Vec<NodeId>, QueryError> {
        match self.refs.get(&r) {
            Some(RefEntry::Nodes(it)) => Ok(it.items().to_vec()),
            _ => Err(QueryError::UnboundRef(r)),
        }
    }

    fn ref_edge_ids(&self, r: i64) -> Result<Vec<EdgeId>, QueryError> {
        match self.refs.get(&r) {
            Some(RefEntry::Edges(it)) => Ok(it.items().to_vec()),
            _ => Err(QueryError::UnboundRef(r)),
        }
    }

    // --- AddNode -------------------------------------------------------

    pub fn add_node(
        &mut self,
        ref_id: Option<i64>,
        tag: Tag,
        properties: PropertyMap,
        guard: Option<QueryNodeSpec>,
    ) -> Result<(StatusCode, ResultPayload), QueryError> {
        if let Some(guard_spec) = guard {
            let ids = self.compile_node_ids(&guard_spec)?;
            if ids.len() == 1 {
                self.declare_ref(ref_id, RefEntry::Nodes(ReusableNodeIterator::from_ids(ids)))?;
                return Ok((StatusCode::Exists, ResultPayload::default()));
            }
        }
        let id = self.store.create_node_with_properties(tag, properties);
        self.undo.push(UndoAction::Node(id));
        self.declare_ref(ref_id, RefEntry::Nodes(ReusableNodeIterator::from_ids(vec![id])))?;
        Ok((StatusCode::Success, ResultPayload::default()))
    }

    // --- AddEdge ---------------------------------------------------------

    pub fn add_edge(
        &mut self,
        ref_id: Option<i64>,
        src_ref: i64,
        dst_ref: i64,
        tag: EdgeType,
        properties: PropertyMap,
    ) -> Result<(StatusCode, ResultPayload), QueryError> {
        let srcs = self.ref_node_ids(src_ref)?;
        let dsts = self.ref_node_ids(dst_ref)?;
        if srcs.is_empty() || dsts.is_empty() {
            return Ok((StatusCode::Empty, ResultPayload::default()));
        }
        let mut created = Vec::with_capacity(srcs.len() * dsts.len());
        for &s in &srcs {
            for &d in &dsts {
                let id = self
                    .store
                    .create_edge_with_properties(s, d, tag.clone(), properties.clone())
                    .map_err(QueryError::Graph)?;
                self.undo.push(UndoAction::Edge(id));
                created.push(id);
            }
        }
        if let Some(RefEntry::Nodes(it)) = self.refs.get_mut(&src_ref) {
            it.reset();
        }
        if let Some(RefEntry::Nodes(it)) = self.refs.get_mut(&dst_ref) {
            it.reset();
        }
        self.declare_ref(ref_id, RefEntry::Edges(ReusableEdgeIterator::from_ids(created)))?;
        Ok((StatusCode::Success, ResultPayload::default()))
    }

    // --- QueryNode -------------------------------------------------------

    /// Resolve a `QueryNodeSpec` to the matching node ids, applying tag
    /// filter, constraints, link traversal, sort and limit — but without
    /// building a response payload or caching a `_ref`. Shared by
    /// `query_node` and the embedded-query path of `UpdateNode`.
    fn compile_node_ids(&mut self, spec: &QueryNodeSpec) -> Result<Vec<NodeId>, QueryError> {
        let mut ids: Vec<NodeId> = if let Some(link) = &spec.link {
            let sources = self.ref_node_ids(link.ref_id)?;
            let neighbors = multi_neighbor(
                self.store,
                &sources,
                link.direction,
                link.edge_tag.as_ref(),
                None,
                None,
                false,
            )
            .map_err(QueryError::Graph)?;
            if let Some(tag) = &spec.tag {
                neighbors
                    .into_iter()
                    .filter(|id| self.store.get_node(*id).map(|n| &n.tag == tag).unwrap_or(false))
                    .collect()
            } else {
                neighbors
            }
        } else if let Some(tag) = &spec.tag {
            self.store.nodes_by_tag(tag)
        } else {
            Vec::new()
        };

        for constraint in &spec.constraints {
            let mut kept = Vec::with_capacity(ids.len());
            for id in ids {
                let node = self.store.get_node(id);
                let value = node.and_then(|n| n.get_property(&constraint.key));
                if value.map(|v| v.is_blob()).unwrap_or(false) {
                    return Err(QueryError::Graph(GraphError::PropertyTypeInvalid));
                }
                if constraint.predicate.matches(value) {
                    kept.push(id);
                }
            }
            ids = kept;
        }

        let mut it = ReusableNodeIterator::from_ids(ids);
        if let Some(key) = &spec.result.sort_key {
            it.sort_by_property(self.store, key);
        }
        if let Some(limit) = spec.result.limit {
            // Uniqueness is checked against the post-limit row set, not the
            // full constrained match, so `limit` can mask a would-be
            // NotUnique result.
            it.apply_limit(limit);
        }
        Ok(it.items().to_vec())
    }

    pub fn query_node(
        &mut self,
        ref_id: Option<i64>,
        spec: QueryNodeSpec,
    ) -> Result<(StatusCode, ResultPayload), QueryError> {
        let ids = self.compile_node_ids(&spec)?;

        if spec.unique && ids.len() != 1 {
            return Ok((StatusCode::NotUnique, ResultPayload::default()));
        }
        if ids.is_empty() {
            if let Some(r) = ref_id {
                self.refs.insert(r, RefEntry::Nodes(ReusableNodeIterator::from_ids(Vec::new())));
            }
            return Ok((StatusCode::Empty, ResultPayload::default()));
        }

        let payload = self.build_node_payload(&ids, &spec.result)?;
        self.declare_ref(ref_id, RefEntry::Nodes(ReusableNodeIterator::from_ids(ids)))?;
        Ok((StatusCode::Success, payload))
    }

    fn build_node_payload(&self, ids: &[NodeId], result: &ResultSpecRef) -> Result<ResultPayload, QueryError> {
        match result.shape.as_ref() {
            Some(ResultShape::Count) | None => Ok(ResultPayload { count: Some(ids.len()), ..Default::default() }),
            Some(ResultShape::NodeId) => Ok(ResultPayload {
                entities: Some(ids.iter().map(|id| ResultRow::Id(id.as_u64())).collect()),
                ..Default::default()
            }),
            Some(ResultShape::List(keys)) => {
                let nodes = node_list(self.store, ids);
                let rows = nodes
                    .iter()
                    .map(|n| {
                        let mut row = std::collections::BTreeMap::new();
                        for key in keys {
                            if let Some(v) = n.get_property(key) {
                                row.insert(key.clone(), v.clone());
                            }
                        }
                        ResultRow::Properties(row)
                    })
                    .collect();
                Ok(ResultPayload { entities: Some(rows), ..Default::default() })
            }
            Some(ResultShape::Sum(key)) | Some(ResultShape::Average(key)) => {
                let nodes = node_list(self.store, ids);
                let mut total = 0.0f64;
                for n in &nodes {
                    let v = n
                        .get_property(key)
                        .and_then(|v| v.as_numeric())
                        .ok_or_else(|| QueryError::NonNumericAggregate(key.clone()))?;
                    total += v;
                }
                if matches!(result.shape.as_ref(), Some(ResultShape::Sum(_))) {
                    Ok(ResultPayload { sum: Some(total), ..Default::default() })
                } else {
                    let avg = if nodes.is_empty() { 0.0 } else { total / nodes.len() as f64 };
                    Ok(ResultPayload { average: Some(avg), ..Default::default() })
                }
            }
        }
    }

    // --- QueryEdge -------------------------------------------------------

    fn compile_edge_ids(&mut self, spec: &QueryEdgeSpec) -> Result<Vec<EdgeId>, QueryError> {
        let src_ids = match spec.src_ref {
            Some(r) => Some(self.ref_node_ids(r)?),
            None => None,
        };
        let dst_ids = match spec.dst_ref {
            Some(r) => Some(self.ref_node_ids(r)?),
            None => None,
        };
        let mut ids = match &spec.tag {
            Some(tag) => node_edge_walk(self.store, tag, src_ids.as_deref(), dst_ids.as_deref()),
            None => Vec::new(),
        };

        for constraint in &spec.constraints {
            let mut kept = Vec::with_capacity(ids.len());
            for id in ids {
                let edge = self.store.get_edge(id);
                let value = edge.and_then(|e| e.get_property(&constraint.key));
                if value.map(|v| v.is_blob()).unwrap_or(false) {
                    return Err(QueryError::Graph(GraphError::PropertyTypeInvalid));
                }
                if constraint.predicate.matches(value) {
                    kept.push(id);
                }
            }
            ids = kept;
        }

        let mut it = ReusableEdgeIterator::from_ids(ids);
        if let Some(key) = &spec.result.sort_key {
            it.sort_by_property(self.store, key);
        }
        if let Some(limit) = spec.result.limit {
            it.apply_limit(limit);
        }
        Ok(it.items().to_vec())
    }

    pub fn query_edge(
        &mut self,
        ref_id: Option<i64>,
        spec: QueryEdgeSpec,
    ) -> Result<(StatusCode, ResultPayload), QueryError> {
        let ids = self.compile_edge_ids(&spec)?;

        if spec.unique && ids.len() != 1 {
            return Ok((StatusCode::NotUnique, ResultPayload::default()));
        }
        if ids.is_empty() {
            if let Some(r) = ref_id {
                self.refs.insert(r, RefEntry::Edges(ReusableEdgeIterator::from_ids(Vec::new())));
            }
            return Ok((StatusCode::Empty, ResultPayload::default()));
        }

        let payload = match spec.result.shape.as_ref() {
            Some(ResultShape::Count) | None => ResultPayload { count: Some(ids.len()), ..Default::default() },
            Some(ResultShape::NodeId) => ResultPayload {
                entities: Some(ids.iter().map(|id| ResultRow::Id(id.as_u64())).collect()),
                ..Default::default()
            },
            Some(ResultShape::List(keys)) => {
                let edges = edge_list(self.store, &ids);
                let rows = edges
                    .iter()
                    .map(|e| {
                        let mut row = std::collections::BTreeMap::new();
                        for key in keys {
                            if let Some(v) = e.get_property(key) {
                                row.insert(key.clone(), v.clone());
                            }
                        }
                        ResultRow::Properties(row)
                    })
                    .collect();
                ResultPayload { entities: Some(rows), ..Default::default() }
            }
            Some(ResultShape::Sum(key)) | Some(ResultShape::Average(key)) => {
                let edges = edge_list(self.store, &ids);
                let mut total = 0.0f64;
                for e in &edges {
                    let v = e
                        .get_property(key)
                        .and_then(|v| v.as_numeric())
                        .ok_or_else(|| QueryError::NonNumericAggregate(key.clone()))?;
                    total += v;
                }
                if matches!(spec.result.shape.as_ref(), Some(ResultShape::Sum(_))) {
                    ResultPayload { sum: Some(total), ..Default::default() }
                } else {
                    let avg = if edges.is_empty() { 0.0 } else { total / edges.len() as f64 };
                    ResultPayload { average: Some(avg), ..Default::default() }
                }
            }
        };

        self.declare_ref(ref_id, RefEntry::Edges(ReusableEdgeIterator::from_ids(ids)))?;
        Ok((StatusCode::Success, payload))
    }

    // --- UpdateNode / UpdateEdge ------------------------------------------

    pub fn update_node(
        &mut self,
        target: NodeTarget,
        sets: PropertyMap,
        removes: Vec<String>,
    ) -> Result<(StatusCode, ResultPayload), QueryError> {
        let ids = match target {
            NodeTarget::Ref(r) => self.ref_node_ids(r)?,
            NodeTarget::Query(spec) => self.compile_node_ids(&spec)?,
        };
        for &id in &ids {
            for (key, value) in sets.iter() {
                let old = self.store.get_node(id).and_then(|n| n.get_property(key)).cloned();
                self.store.set_node_property(id, key.clone(), value.clone()).map_err(QueryError::Graph)?;
                self.undo.push(UndoAction::NodeProp(id, key.clone(), old));
            }
            for key in &removes {
                let old = self.store.get_node(id).and_then(|n| n.get_property(key)).cloned();
                if old.is_some() {
                    self.store.remove_node_property(id, key).map_err(QueryError::Graph)?;
                    self.undo.push(UndoAction::NodeProp(id, key.clone(), old));
                }
            }
        }
        Ok((StatusCode::Success, ResultPayload { count: Some(ids.len()), ..Default::default() }))
    }

    pub fn update_edge(
        &mut self,
        target: EdgeTarget,
        sets: PropertyMap,
        removes: Vec<String>,
    ) -> Result<(StatusCode, ResultPayload), QueryError> {
        let ids = match target {
            EdgeTarget::Ref(r) => self.ref_edge_ids(r)?,
            EdgeTarget::Query(spec) => self.compile_edge_ids(&spec)?,
        };
        for &id in &ids {
            for (key, value) in sets.iter() {
                let old = self.store.get_edge(id).and_then(|e| e.get_property(key)).cloned();
                self.store.set_edge_property(id, key.clone(), value.clone()).map_err(QueryError::Graph)?;
                self.undo.push(UndoAction::EdgeProp(id, key.clone(), old));
            }
            for key in &removes {
                let old = self.store.get_edge(id).and_then(|e| e.get_property(key)).cloned();
                if old.is_some() {
                    self.store.remove_edge_property(id, key).map_err(QueryError::Graph)?;
                    self.undo.push(UndoAction::EdgeProp(id, key.clone(), old));
                }
            }
        }
        Ok((StatusCode::Success, ResultPayload { count: Some(ids.len()), ..Default::default() }))
    }
}

/// Local alias so `build_node_payload` can borrow just the bit of
/// `ResultSpec` it needs without fighting the borrow checker over `spec`.
type ResultSpecRef = super::ResultSpec;

//! The Graph Query Handler: compiles `AddNode`/`AddEdge`/`QueryNode`/
//! `QueryEdge`/`UpdateNode`/`UpdateEdge` commands into a single transaction
//! against the storage engine, with cross-command `_ref` bookkeeping.

pub mod handler;

use crate::graph::{EdgeType, PropertyPredicate, Tag};
use crate::graph::iterators::Direction;
use serde::Serialize;

pub use handler::QueryHandler;

/// How a `QueryNode`/`QueryEdge` result is shaped on the wire.
#[derive(Debug, Clone)]
pub enum ResultShape {
    /// Project the named keys from each matched row.
    List(Vec<String>),
    Count,
    /// Sum over the first listed key; requires a numeric property.
    Sum(String),
    /// Average over the first listed key; requires a numeric property.
    Average(String),
    /// Return bare node/edge identifiers instead of property rows.
    NodeId,
}

#[derive(Debug, Clone, Default)]
pub struct ResultSpec {
    pub shape: Option<ResultShape>,
    pub limit: Option<usize>,
    pub sort_key: Option<String>,
    pub blob: bool,
}

/// A neighbor-traversal clause converting a prior `_ref`'s node set into a
/// starting set via an edge predicate.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub ref_id: i64,
    pub edge_tag: Option<EdgeType>,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub key: String,
    pub predicate: PropertyPredicate,
}

#[derive(Debug, Clone)]
pub struct QueryNodeSpec {
    pub tag: Option<Tag>,
    pub constraints: Vec<Constraint>,
    pub link: Option<LinkSpec>,
    pub result: ResultSpec,
    pub unique: bool,
}

#[derive(Debug, Clone)]
pub struct QueryEdgeSpec {
    pub tag: Option<EdgeType>,
    pub src_ref: Option<i64>,
    pub dst_ref: Option<i64>,
    pub constraints: Vec<Constraint>,
    pub result: ResultSpec,
    pub unique: bool,
}

/// A single row of a `List`/`NodeId` result, serialized directly from the
/// projected property map (or, for `NodeId` shape, a bare integer id).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResultRow {
    Properties(std::collections::BTreeMap<String, crate::graph::PropertyValue>),
    Id(u64),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<ResultRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
}

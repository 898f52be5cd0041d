//! The `pmgd/` backing store: a RocksDB-keyed key-value log standing in for
//! the original mmap-backed store. Nodes and edges are persisted as
//! column-family rows keyed by id, so recovery is a pair of column-family
//! scans rather than a custom mmap page format.

use crate::graph::{Edge, EdgeId, EdgeType, Node, NodeId, PropertyMap, Tag};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("column family '{0}' missing")]
    ColumnFamily(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredNode {
    id: u64,
    tag: String,
    properties: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEdge {
    id: u64,
    source: u64,
    target: u64,
    edge_type: String,
    properties: Vec<u8>,
}

/// The `pmgd/` store. One process owns one `PersistentStorage` for its
/// lifetime; callers serialize access through `GraphStore::lock` the same
/// way they do for the in-memory arena.
pub struct PersistentStorage {
    db: Arc<DB>,
}

impl PersistentStorage {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new("nodes", Options::default()),
            ColumnFamilyDescriptor::new("edges", Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        Ok(PersistentStorage { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> StorageResult<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| StorageError::ColumnFamily(name.to_string()))
    }

    pub fn put_node(&self, node: &Node) -> StorageResult<()> {
        let cf = self.cf("nodes")?;
        let stored = StoredNode {
            id: node.id.as_u64(),
            tag: node.tag.as_str().to_string(),
            properties: bincode::serialize(&node.properties)?,
        };
        self.db.put_cf(cf, Self::node_key(node.id), bincode::serialize(&stored)?)?;
        debug!(node = node.id.as_u64(), "persisted node");
        Ok(())
    }

    pub fn get_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        let cf = self.cf("nodes")?;
        match self.db.get_cf(cf, Self::node_key(id))? {
            Some(bytes) => Ok(Some(Self::decode_node(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_edge(&self, edge: &Edge) -> StorageResult<()> {
        let cf = self.cf("edges")?;
        let stored = StoredEdge {
            id: edge.id.as_u64(),
            source: edge.source.as_u64(),
            target: edge.target.as_u64(),
            edge_type: edge.edge_type.as_str().to_string(),
            properties: bincode::serialize(&edge.properties)?,
        };
        self.db.put_cf(cf, Self::edge_key(edge.id), bincode::serialize(&stored)?)?;
        Ok(())
    }

    pub fn get_edge(&self, id: EdgeId) -> StorageResult<Option<Edge>> {
        let cf = self.cf("edges")?;
        match self.db.get_cf(cf, Self::edge_key(id))? {
            Some(bytes) => Ok(Some(Self::decode_edge(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn scan_nodes(&self) -> StorageResult<Vec<Node>> {
        let cf = self.cf("nodes")?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_, value) = item?;
            out.push(Self::decode_node(&value)?);
        }
        Ok(out)
    }

    pub fn scan_edges(&self) -> StorageResult<Vec<Edge>> {
        let cf = self.cf("edges")?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_, value) = item?;
            out.push(Self::decode_edge(&value)?);
        }
        Ok(out)
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn decode_node(bytes: &[u8]) -> StorageResult<Node> {
        let stored: StoredNode = bincode::deserialize(bytes)?;
        let properties: PropertyMap = bincode::deserialize(&stored.properties)?;
        Ok(Node::new_with_properties(NodeId::new(stored.id), Tag::new(stored.tag), properties))
    }

    fn decode_edge(bytes: &[u8]) -> StorageResult<Edge> {
        let stored: StoredEdge = bincode::deserialize(bytes)?;
        let properties: PropertyMap = bincode::deserialize(&stored.properties)?;
        Ok(Edge::new_with_properties(
            EdgeId::new(stored.id),
            NodeId::new(stored.source),
            NodeId::new(stored.target),
            EdgeType::new(stored.edge_type),
            properties,
        ))
    }

    fn node_key(id: NodeId) -> [u8; 8] {
        id.as_u64().to_be_bytes()
    }

    fn edge_key(id: EdgeId) -> [u8; 8] {
        id.as_u64().to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn node_roundtrips_through_storage() {
        let dir = TempDir::new().unwrap();
        let storage = PersistentStorage::open(dir.path()).unwrap();
        let mut node = Node::new(NodeId::new(1), "image");
        node.set_property("format", "jpg");
        storage.put_node(&node).unwrap();

        let fetched = storage.get_node(NodeId::new(1)).unwrap().unwrap();
        assert_eq!(fetched.tag.as_str(), "image");
        assert_eq!(fetched.get_property("format").unwrap().as_string(), Some("jpg"));
    }

    #[test]
    fn scan_returns_every_persisted_node() {
        let dir = TempDir::new().unwrap();
        let storage = PersistentStorage::open(dir.path()).unwrap();
        for i in 0..5u64 {
            storage.put_node(&Node::new(NodeId::new(i), "generic")).unwrap();
        }
        assert_eq!(storage.scan_nodes().unwrap().len(), 5);
    }
}

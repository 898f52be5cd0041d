//! Manager for the per-(tag,key) secondary property indices.
//!
//! An index is built explicitly via `create_index` ("build index" in the
//! data model) and consulted opportunistically by the query compiler;
//! absent an index, a query falls back to a full tag scan.

use crate::graph::{NodeId, PropertyValue, Tag};
use super::property_index::PropertyIndex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Key for identifying a property index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyIndexKey {
    pub tag: Tag,
    pub property: String,
}

/// Manager for all property indices
#[derive(Debug)]
pub struct IndexManager {
    indices: RwLock<HashMap<PropertyIndexKey, Arc<RwLock<PropertyIndex>>>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
        }
    }

    /// Build an index for a (tag, property) pair. Idempotent: building an
    /// already-existing index is a no-op success, not an error.
    pub fn create_index(&self, tag: Tag, property: String) {
        let key = PropertyIndexKey { tag, property };
        let mut indices = self.indices.write().unwrap();
        indices.entry(key).or_insert_with(|| Arc::new(RwLock::new(PropertyIndex::new())));
    }

    pub fn drop_index(&self, tag: &Tag, property: &str) {
        let key = PropertyIndexKey {
            tag: tag.clone(),
            property: property.to_string(),
        };
        let mut indices = self.indices.write().unwrap();
        indices.remove(&key);
    }

    /// Update index when a node property is set/changed. A no-op if no
    /// index has been built for this (tag, property) pair.
    pub fn index_insert(&self, tag: &Tag, property: &str, value: PropertyValue, node_id: NodeId) {
        if value.is_blob() {
            return;
        }
        let key = PropertyIndexKey {
            tag: tag.clone(),
            property: property.to_string(),
        };
        let indices = self.indices.read().unwrap();
        if let Some(index) = indices.get(&key) {
            index.write().unwrap().insert(value, node_id);
        }
    }

    pub fn index_remove(&self, tag: &Tag, property: &str, value: &PropertyValue, node_id: NodeId) {
        let key = PropertyIndexKey {
            tag: tag.clone(),
            property: property.to_string(),
        };
        let indices = self.indices.read().unwrap();
        if let Some(index) = indices.get(&key) {
            index.write().unwrap().remove(value, node_id);
        }
    }

    pub fn has_index(&self, tag: &Tag, property: &str) -> bool {
        let key = PropertyIndexKey {
            tag: tag.clone(),
            property: property.to_string(),
        };
        self.indices.read().unwrap().contains_key(&key)
    }

    pub fn get_index(&self, tag: &Tag, property: &str) -> Option<Arc<RwLock<PropertyIndex>>> {
        let key = PropertyIndexKey {
            tag: tag.clone(),
            property: property.to_string(),
        };
        self.indices.read().unwrap().get(&key).cloned()
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

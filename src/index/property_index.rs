//! B-tree based secondary property index, so a range predicate on an
//! indexed (tag, key) resolves without a full tag scan.

use crate::graph::{NodeId, PropertyValue};
use std::collections::{BTreeMap, HashSet};

/// Index for a specific property on a specific tag
#[derive(Debug, Clone)]
pub struct PropertyIndex {
    /// Value -> Set of NodeIds
    index: BTreeMap<PropertyValue, HashSet<NodeId>>,
}

impl PropertyIndex {
    pub fn new() -> Self {
        Self {
            index: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, value: PropertyValue, node_id: NodeId) {
        self.index.entry(value).or_default().insert(node_id);
    }

    pub fn remove(&mut self, value: &PropertyValue, node_id: NodeId) {
        if let Some(nodes) = self.index.get_mut(value) {
            nodes.remove(&node_id);
            if nodes.is_empty() {
                self.index.remove(value);
            }
        }
    }

    pub fn get(&self, value: &PropertyValue) -> Vec<NodeId> {
        self.index.get(value)
            .map(|nodes| nodes.iter().cloned().collect())
            .unwrap_or_default()
    }
    
    pub fn range<R>(&self, range: R) -> Vec<NodeId>
    where
        R: std::ops::RangeBounds<PropertyValue>,
    {
        let mut result = Vec::new();
        for (_, nodes) in self.index.range(range) {
            result.extend(nodes.iter().cloned());
        }
        result
    }
}

impl Default for PropertyIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_query_over_integers() {
        let mut idx = PropertyIndex::new();
        for i in 0..5 {
            idx.insert(PropertyValue::Integer(i), NodeId::new(i as u64));
        }
        let matched = idx.range(PropertyValue::Integer(1)..=PropertyValue::Integer(3));
        let mut ids: Vec<u64> = matched.iter().map(|n| n.as_u64()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn remove_drops_empty_buckets() {
        let mut idx = PropertyIndex::new();
        idx.insert(PropertyValue::String("x".into()), NodeId::new(1));
        idx.remove(&PropertyValue::String("x".into()), NodeId::new(1));
        assert!(idx.get(&PropertyValue::String("x".into())).is_empty());
    }
}

//! Node entity: a tagged vertex with typed properties.

use super::property::{PropertyMap, PropertyValue};
use super::types::{NodeId, Tag};
use serde::{Deserialize, Serialize};

/// A node in the property graph. Every node has exactly one tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub tag: Tag,
    pub properties: PropertyMap,
}

impl Node {
    pub fn new(id: NodeId, tag: impl Into<Tag>) -> Self {
        Node { id, tag: tag.into(), properties: PropertyMap::new() }
    }

    pub fn new_with_properties(id: NodeId, tag: impl Into<Tag>, properties: PropertyMap) -> Self {
        Node { id, tag: tag.into(), properties }
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.shift_remove(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_tag() {
        let node = Node::new(NodeId::new(1), "image");
        assert_eq!(node.id, NodeId::new(1));
        assert_eq!(node.tag.as_str(), "image");
    }

    #[test]
    fn properties_roundtrip() {
        let mut node = Node::new(NodeId::new(4), "generic");
        node.set_property("name", "Alice");
        node.set_property("age", 30i64);
        assert_eq!(node.get_property("name").unwrap().as_string(), Some("Alice"));
        assert_eq!(node.get_property("age").unwrap().as_integer(), Some(30));
        assert_eq!(node.property_count(), 2);

        let removed = node.remove_property("age");
        assert!(removed.is_some());
        assert!(!node.has_property("age"));
    }

    #[test]
    fn node_equality_is_by_id() {
        let n1 = Node::new(NodeId::new(7), "generic");
        let n2 = Node::new(NodeId::new(7), "generic");
        let n3 = Node::new(NodeId::new(8), "generic");
        assert_eq!(n1, n2);
        assert_ne!(n1, n3);
    }
}

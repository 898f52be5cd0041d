//! Property values: the six typed scalars a node or edge property may hold.

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A property value. Exactly six variants, matching the data model: two are
/// numeric, one is a calendar instant with an explicit offset, one is opaque
/// bytes that predicates may never inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Calendar instant with microsecond precision and a timezone offset.
    Time(DateTime<FixedOffset>),
    /// Opaque bytes. Never queryable: a predicate against a blob property is
    /// always a `PropertyTypeInvalid` exception, never a non-match.
    Blob(Vec<u8>),
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Boolean(_) => "boolean",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Float(_) => "float",
            PropertyValue::String(_) => "string",
            PropertyValue::Time(_) => "time",
            PropertyValue::Blob(_) => "blob",
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, PropertyValue::Blob(_))
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric value regardless of whether it's stored as integer or float,
    /// used by the Sum/Average result-shaping modes.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            PropertyValue::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Ordinal of the variant, used to order values of different types in a
    /// total order (needed so `PropertyValue` can key a `BTreeMap` index).
    fn discriminant(&self) -> u8 {
        match self {
            PropertyValue::Boolean(_) => 0,
            PropertyValue::Integer(_) => 1,
            PropertyValue::Float(_) => 2,
            PropertyValue::String(_) => 3,
            PropertyValue::Time(_) => 4,
            PropertyValue::Blob(_) => 5,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Boolean(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(fl) => write!(f, "{}", fl),
            PropertyValue::String(s) => write!(f, "\"{}\"", s),
            PropertyValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            PropertyValue::Blob(b) => write!(f, "<blob:{} bytes>", b.len()),
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for PropertyValue {}

impl PartialOrd for PropertyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Blob is excluded from predicate comparison at a higher layer
/// (`PropertyTypeInvalid`); here we still need a total order so it can live
/// in a `BTreeMap` key, ordering blobs by raw bytes as a fallback.
impl Ord for PropertyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PropertyValue::Boolean(a), PropertyValue::Boolean(b)) => a.cmp(b),
            (PropertyValue::Integer(a), PropertyValue::Integer(b)) => a.cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (PropertyValue::String(a), PropertyValue::String(b)) => a.cmp(b),
            (PropertyValue::Time(a), PropertyValue::Time(b)) => a.cmp(b),
            (PropertyValue::Blob(a), PropertyValue::Blob(b)) => a.cmp(b),
            _ => self.discriminant().cmp(&other.discriminant()),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}
impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}
impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Integer(i as i64)
    }
}
impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}
impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}
impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}
impl From<DateTime<FixedOffset>> for PropertyValue {
    fn from(t: DateTime<FixedOffset>) -> Self {
        PropertyValue::Time(t)
    }
}
impl From<Vec<u8>> for PropertyValue {
    fn from(b: Vec<u8>) -> Self {
        PropertyValue::Blob(b)
    }
}

/// Properties associated with a node or an edge. `IndexMap` is used rather
/// than a plain hash map so `List` results with no explicit `sort` project
/// keys in the order they were set, which is what "stable ordering" in the
/// query-compilation model means in practice.
pub type PropertyMap = IndexMap<String, PropertyValue>;

/// A single-sided comparison operator for property predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "==" => Some(CompareOp::Eq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    pub fn matches(self, lhs: &PropertyValue, rhs: &PropertyValue) -> bool {
        let ord = match lhs.partial_cmp(rhs) {
            Some(o) => o,
            None => return false,
        };
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// A property predicate: either a single comparison (`constraints` array of
/// length 2) or a two-sided range (`constraints` array of length 4).
#[derive(Debug, Clone)]
pub enum PropertyPredicate {
    Single(CompareOp, PropertyValue),
    Range(CompareOp, PropertyValue, CompareOp, PropertyValue),
}

impl PropertyPredicate {
    /// Evaluate against a possibly-absent property value. A predicate
    /// against a non-existent property always fails, per the data-model
    /// invariant, and a predicate against a blob value is an engine
    /// exception rather than a non-match (checked by the caller before
    /// evaluating, since that must abort the transaction, not just return
    /// `false`).
    pub fn matches(&self, value: Option<&PropertyValue>) -> bool {
        let value = match value {
            Some(v) => v,
            None => return false,
        };
        match self {
            PropertyPredicate::Single(op, rhs) => op.matches(value, rhs),
            PropertyPredicate::Range(op1, v1, op2, v2) => op1.matches(value, v1) && op2.matches(value, v2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_types_roundtrip() {
        assert_eq!(PropertyValue::from(true).type_name(), "boolean");
        assert_eq!(PropertyValue::from(42i64).type_name(), "integer");
        assert_eq!(PropertyValue::from(3.14).type_name(), "float");
        assert_eq!(PropertyValue::from("hi").type_name(), "string");
        assert_eq!(PropertyValue::Blob(vec![1, 2, 3]).type_name(), "blob");
    }

    #[test]
    fn compare_ops() {
        let a = PropertyValue::Integer(5);
        assert!(CompareOp::Ge.matches(&a, &PropertyValue::Integer(5)));
        assert!(CompareOp::Gt.matches(&a, &PropertyValue::Integer(4)));
        assert!(!CompareOp::Lt.matches(&a, &PropertyValue::Integer(4)));
    }

    #[test]
    fn range_predicate() {
        let pred = PropertyPredicate::Range(
            CompareOp::Ge,
            PropertyValue::Integer(10),
            CompareOp::Le,
            PropertyValue::Integer(20),
        );
        assert!(pred.matches(Some(&PropertyValue::Integer(15))));
        assert!(!pred.matches(Some(&PropertyValue::Integer(25))));
        assert!(!pred.matches(None));
    }

    #[test]
    fn property_map_preserves_insertion_order() {
        let mut props = PropertyMap::new();
        props.insert("b".to_string(), 1i64.into());
        props.insert("a".to_string(), 2i64.into());
        let keys: Vec<_> = props.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
    }
}

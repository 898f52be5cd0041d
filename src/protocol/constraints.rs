//! Converts a JSON `constraints` object into the query layer's
//! `Constraint` list, enforcing the arity the wire format promises: each
//! value is either `[op, value]` (single comparison) or `[op1, v1, op2, v2]`
//! (two-sided range).

use chrono::DateTime;
use serde_json::Value;

use crate::error::DispatchError;
use crate::graph::{CompareOp, PropertyPredicate, PropertyValue};
use crate::query::Constraint;

use super::commands::ConstraintsJson;

pub fn json_to_property_value(value: &Value) -> Result<PropertyValue, DispatchError> {
    match value {
        Value::Bool(b) => Ok(PropertyValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(PropertyValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(PropertyValue::Float(f))
            } else {
                Err(DispatchError::SchemaInvalid(format!("unrepresentable number {n}")))
            }
        }
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(t) => Ok(PropertyValue::Time(t)),
            Err(_) => Ok(PropertyValue::String(s.clone())),
        },
        other => Err(DispatchError::SchemaInvalid(format!("unsupported property value: {other}"))),
    }
}

fn parse_op(value: &Value) -> Result<CompareOp, DispatchError> {
    let s = value
        .as_str()
        .ok_or_else(|| DispatchError::BadConstraintArity("comparison operator must be a string".into()))?;
    CompareOp::parse(s).ok_or_else(|| DispatchError::BadConstraintArity(format!("unknown operator '{s}'")))
}

/// Parses one `key: [...]` entry into a `Constraint`. The array must have
/// length 2 (single comparison) or 4 (range); any other length is
/// `BadConstraintArity`.
pub fn parse_constraint(key: &str, arr: &[Value]) -> Result<Constraint, DispatchError> {
    let predicate = match arr.len() {
        2 => {
            let op = parse_op(&arr[0])?;
            let val = json_to_property_value(&arr[1])?;
            PropertyPredicate::Single(op, val)
        }
        4 => {
            let op1 = parse_op(&arr[0])?;
            let v1 = json_to_property_value(&arr[1])?;
            let op2 = parse_op(&arr[2])?;
            let v2 = json_to_property_value(&arr[3])?;
            PropertyPredicate::Range(op1, v1, op2, v2)
        }
        n => {
            return Err(DispatchError::BadConstraintArity(format!(
                "constraint '{key}' has {n} elements, expected 2 or 4"
            )))
        }
    };
    Ok(Constraint { key: key.to_string(), predicate })
}

pub fn parse_constraints(json: &ConstraintsJson) -> Result<Vec<Constraint>, DispatchError> {
    json.iter().map(|(key, arr)| parse_constraint(key, arr)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_comparison_parses() {
        let arr = vec![json!(">="), json!(65)];
        let c = parse_constraint("age", &arr).unwrap();
        assert!(matches!(c.predicate, PropertyPredicate::Single(CompareOp::Ge, PropertyValue::Integer(65))));
    }

    #[test]
    fn range_parses() {
        let arr = vec![json!(">="), json!(10), json!("<="), json!(20)];
        let c = parse_constraint("age", &arr).unwrap();
        assert!(matches!(c.predicate, PropertyPredicate::Range(..)));
    }

    #[test]
    fn bad_arity_is_rejected() {
        let arr = vec![json!(">="), json!(10), json!("<=")];
        assert!(parse_constraint("age", &arr).is_err());
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let arr = vec![json!("~="), json!(10)];
        assert!(parse_constraint("age", &arr).is_err());
    }
}

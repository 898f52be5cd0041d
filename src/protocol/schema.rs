//! Structural JSON-schema validation of an incoming batch, run before the
//! batch is deserialized into typed `Command`s. Aggregates every violation
//! across the whole request rather than stopping at the first.

use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::DispatchError;

const COMMAND_NAMES: &[&str] = &[
    "AddNode",
    "AddEdge",
    "QueryNode",
    "QueryEdge",
    "UpdateNode",
    "UpdateEdge",
    "AddEntity",
    "AddConnection",
    "AddImage",
    "UpdateImage",
    "FindImage",
    "AddVideo",
    "UpdateVideo",
    "FindVideo",
    "AddBoundingBox",
    "UpdateBoundingBox",
    "FindBoundingBox",
    "AddDescriptorSet",
    "AddDescriptor",
    "FindDescriptor",
    "ClassifyDescriptor",
    "AddBlob",
    "UpdateBlob",
    "FindBlob",
];

fn batch_schema() -> &'static JSONSchema {
    static SCHEMA: OnceLock<JSONSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let pattern = format!("^({})$", COMMAND_NAMES.join("|"));
        let mut pattern_properties = serde_json::Map::new();
        pattern_properties.insert(pattern, serde_json::json!({ "type": "object" }));

        let schema = serde_json::json!({
            "type": "array",
            "items": {
                "type": "object",
                "minProperties": 1,
                "maxProperties": 1,
                "additionalProperties": false,
                "patternProperties": pattern_properties
            }
        });
        JSONSchema::compile(&schema).expect("batch schema is a valid JSON schema literal")
    })
}

/// Validates the whole-request structural shape and collects every
/// violation into one `DispatchError::SchemaInvalid`, rather than
/// surfacing only the first.
pub fn validate_batch(value: &Value) -> Result<(), DispatchError> {
    let schema = batch_schema();
    let result = schema.validate(value);
    if let Err(errors) = result {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(DispatchError::SchemaInvalid(messages.join("; ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_a_well_formed_batch() {
        let batch = json!([{"AddNode": {"tag": "A"}}, {"QueryNode": {"tag": "A"}}]);
        assert!(validate_batch(&batch).is_ok());
    }

    #[test]
    fn rejects_an_unknown_command_name() {
        let batch = json!([{"DropTable": {}}]);
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn rejects_multiple_keys_on_one_command() {
        let batch = json!([{"AddNode": {"tag": "A"}, "AddEdge": {}}]);
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn rejects_a_non_array_batch() {
        let batch = json!({"AddNode": {"tag": "A"}});
        assert!(validate_batch(&batch).is_err());
    }
}

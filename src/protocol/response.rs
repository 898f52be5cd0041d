//! Response envelope: one `{"<CommandName>": {status, info?, ...}}` object
//! per command, in command order.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StatusCode;
use crate::query::ResultPayload;

/// The body of one command's response. `payload` carries whatever
/// `entities`/`count`/`sum`/`average` the query layer produced; `extra`
/// holds fields no `ResultPayload` shape covers (`label`, `distance`,
/// `_coordinates`) for the handful of commands that need them.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponseBody {
    pub status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(flatten)]
    pub payload: ResultPayload,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandResponseBody {
    pub fn success(payload: ResultPayload) -> Self {
        CommandResponseBody { status: StatusCode::Success.code(), info: None, payload, extra: Map::new() }
    }

    pub fn with_status(status: StatusCode, payload: ResultPayload) -> Self {
        CommandResponseBody { status: status.code(), info: None, payload, extra: Map::new() }
    }

    pub fn error(status: StatusCode, info: impl Into<String>) -> Self {
        CommandResponseBody {
            status: status.code(),
            info: Some(info.into()),
            payload: ResultPayload::default(),
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Wraps one command's response body under its command-name key.
pub fn wrap(command_name: &str, body: CommandResponseBody) -> Value {
    let mut object = Map::new();
    object.insert(command_name.to_string(), serde_json::to_value(body).unwrap_or(Value::Null));
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_body_omits_info() {
        let body = CommandResponseBody::success(ResultPayload { count: Some(3), ..Default::default() });
        let value = wrap("QueryNode", body);
        let obj = value.get("QueryNode").unwrap();
        assert_eq!(obj.get("status").unwrap(), 0);
        assert!(obj.get("info").is_none());
        assert_eq!(obj.get("count").unwrap(), 3);
    }

    #[test]
    fn error_body_carries_info() {
        let body = CommandResponseBody::error(StatusCode::Error, "bad reference");
        let value = wrap("AddEdge", body);
        let obj = value.get("AddEdge").unwrap();
        assert_eq!(obj.get("status").unwrap(), -1);
        assert_eq!(obj.get("info").unwrap(), "bad reference");
    }
}

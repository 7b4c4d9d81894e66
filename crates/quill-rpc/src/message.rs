use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// One decoded stdout line. Keys that are absent stay `None`; a present
/// `result: null` is kept as `Some(Value::Null)` so void responses still count
/// as responses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcMessage {
    pub id: Option<Value>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates the shapes an inbound message can take.
pub enum MessageKind {
    Response,
    Request,
    Notification,
}

impl RpcMessage {
    /// Decodes a line into a message. Lines that are not JSON objects yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let Value::Object(mut object) = serde_json::from_str::<Value>(line).ok()? else {
            return None;
        };
        Some(Self {
            id: object.remove("id").filter(|id| !id.is_null()),
            method: object
                .remove("method")
                .and_then(|method| method.as_str().map(str::to_string)),
            params: object.remove("params"),
            result: object.remove("result"),
            error: object.remove("error"),
        })
    }

    pub fn id_key(&self) -> Option<String> {
        self.id.as_ref().and_then(normalize_request_id)
    }

    pub fn is_response(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    pub fn kind(&self) -> MessageKind {
        if self.is_response() {
            MessageKind::Response
        } else if self.id.is_some() && self.method.is_some() {
            MessageKind::Request
        } else {
            MessageKind::Notification
        }
    }

    /// Returns the `error.message` string when the peer reported one.
    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_ref()
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
    }

    pub fn params_or_null(&self) -> &Value {
        self.params.as_ref().unwrap_or(&Value::Null)
    }
}

/// Maps string and numeric request ids onto one string key space.
pub fn normalize_request_id(id: &Value) -> Option<String> {
    match id {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

pub fn request_frame(id: &str, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

pub fn notification_frame(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

pub fn response_frame(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

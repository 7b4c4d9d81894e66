//! Fixed answers for requests the app server sends to its client.
//!
//! The client is non-interactive: approvals are declined, user-input prompts
//! get no answers, and tool calls are refused. Unknown methods get an empty
//! object so the server is never left waiting.

use serde_json::{json, Value};

use crate::message::response_frame;

pub const COMMAND_APPROVAL_METHOD: &str = "item/commandExecution/requestApproval";
pub const FILE_CHANGE_APPROVAL_METHOD: &str = "item/fileChange/requestApproval";
pub const USER_INPUT_METHOD: &str = "item/tool/requestUserInput";
pub const TOOL_CALL_METHOD: &str = "item/tool/call";
pub const TOOL_CALL_REFUSAL_TEXT: &str = "Tool use is disabled for this text transformer.";

/// Returns the `result` payload to send back for a server-initiated request.
pub fn server_request_result(method: &str) -> Value {
    match method {
        COMMAND_APPROVAL_METHOD | FILE_CHANGE_APPROVAL_METHOD => json!({ "decision": "decline" }),
        USER_INPUT_METHOD => json!({ "answers": {} }),
        TOOL_CALL_METHOD => json!({
            "success": false,
            "contentItems": [
                { "type": "inputText", "text": TOOL_CALL_REFUSAL_TEXT }
            ],
        }),
        _ => json!({}),
    }
}

/// Serializes the reply line for `id`. If the payload cannot be encoded the
/// reply degrades to an empty result rather than being dropped.
pub fn encode_server_reply(id: &Value, result: Value) -> Vec<u8> {
    match serde_json::to_vec(&response_frame(id, result)) {
        Ok(encoded) => encoded,
        Err(error) => {
            tracing::warn!(error = %error, "failed to encode server reply; sending empty result");
            serde_json::to_vec(&response_frame(id, json!({}))).unwrap_or_default()
        }
    }
}

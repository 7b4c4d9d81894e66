//! Field extraction for loosely-shaped app-server payloads.
//!
//! Identifiers and text can sit under several keys depending on the server
//! version, so every lookup is an ordered list of key paths tried in turn.

use serde_json::Value;

pub type KeyPath = &'static [&'static str];

pub const NOTIFICATION_THREAD_ID_PATHS: &[KeyPath] =
    &[&["threadId"], &["thread", "id"], &["turn", "threadId"]];
pub const NOTIFICATION_TURN_ID_PATHS: &[KeyPath] =
    &[&["turnId"], &["turn", "id"], &["item", "turnId"]];
const STARTED_THREAD_ID_PATHS: &[KeyPath] = &[&["thread", "id"], &["threadId"]];
const STARTED_TURN_ID_PATHS: &[KeyPath] = &[&["turn", "id"], &["turnId"]];
const NEXT_CURSOR_PATHS: &[KeyPath] = &[
    &["nextCursor"],
    &["next_cursor"],
    &["pagination", "nextCursor"],
];
const PAGE_ITEM_PATHS: &[KeyPath] = &[&["data"], &["items"]];
const MODEL_ID_KEYS: &[&str] = &["model", "id"];
const TEXT_KEYS: &[&str] = &["text", "message", "output_text", "delta", "value"];
const CONTAINER_KEYS: &[&str] = &["content", "output", "items", "data"];

pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Returns the first path that resolves to a string.
pub fn first_str<'a>(value: &'a Value, paths: &[KeyPath]) -> Option<&'a str> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(Value::as_str))
}

fn first_non_empty_str(value: &Value, paths: &[KeyPath]) -> Option<String> {
    paths.iter().find_map(|path| {
        lookup(value, path)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    })
}

pub fn notification_thread_id(params: &Value) -> Option<&str> {
    first_str(params, NOTIFICATION_THREAD_ID_PATHS)
}

pub fn notification_turn_id(params: &Value) -> Option<&str> {
    first_str(params, NOTIFICATION_TURN_ID_PATHS)
}

/// Thread id from a `thread/start` result or `thread/started` payload.
pub fn started_thread_id(result: &Value) -> Option<String> {
    first_non_empty_str(result, STARTED_THREAD_ID_PATHS)
}

/// Turn id from a `turn/start` result or `turn/started` payload.
pub fn started_turn_id(result: &Value) -> Option<String> {
    first_non_empty_str(result, STARTED_TURN_ID_PATHS)
}

pub fn error_message(error: Option<&Value>) -> Option<String> {
    error
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn is_assistant_item(item: &Value) -> bool {
    let field = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_default()
    };
    let item_type = field("type");
    item_type.contains("assistant")
        || item_type.contains("agentmessage")
        || field("role") == "assistant"
        || field("author") == "assistant"
}

/// Collects every string under the text keys, walking nested containers and
/// arrays depth-first in document order.
pub fn text_fragments(value: &Value) -> Vec<String> {
    let mut fragments = Vec::new();
    collect_text_fragments(value, &mut fragments);
    fragments
}

fn collect_text_fragments(value: &Value, fragments: &mut Vec<String>) {
    match value {
        Value::String(text) => fragments.push(text.clone()),
        Value::Array(values) => {
            for value in values {
                collect_text_fragments(value, fragments);
            }
        }
        Value::Object(object) => {
            for key in TEXT_KEYS {
                if let Some(text) = object.get(*key).and_then(Value::as_str) {
                    fragments.push(text.to_string());
                }
            }
            for key in CONTAINER_KEYS {
                if let Some(nested) = object.get(*key) {
                    collect_text_fragments(nested, fragments);
                }
            }
        }
        _ => {}
    }
}

/// Text fragments of an item, or nothing when the item is not attributable
/// to the assistant.
pub fn assistant_fragments(item: &Value) -> Vec<String> {
    if !is_assistant_item(item) {
        return Vec::new();
    }
    text_fragments(item)
}

/// Walks `thread.turns[].items[]` of a `thread/read` result.
pub fn thread_read_fragments(result: &Value) -> Vec<String> {
    let Some(turns) = lookup(result, &["thread", "turns"]).and_then(Value::as_array) else {
        return Vec::new();
    };
    turns
        .iter()
        .filter_map(|turn| turn.get("items").and_then(Value::as_array))
        .flatten()
        .filter(|item| item.is_object())
        .flat_map(assistant_fragments)
        .collect()
}

/// Trims each fragment, drops empties and concatenates without a separator.
pub fn join_fragments<S: AsRef<str>>(fragments: &[S]) -> String {
    fragments
        .iter()
        .map(|fragment| fragment.as_ref().trim())
        .filter(|fragment| !fragment.is_empty())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Items of one list page: a bare array, or an object carrying `data`/`items`.
pub fn page_items(result: &Value) -> Vec<String> {
    let values = match result {
        Value::Array(values) => Some(values),
        _ => PAGE_ITEM_PATHS
            .iter()
            .find_map(|path| lookup(result, path).and_then(Value::as_array)),
    };
    values
        .map(|values| values.iter().filter_map(model_identifier).collect())
        .unwrap_or_default()
}

fn model_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Object(object) => MODEL_ID_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Cursor for the next page; blank cursors end pagination.
pub fn next_cursor(result: &Value) -> Option<String> {
    first_str(result, NEXT_CURSOR_PATHS)
        .map(str::trim)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_string)
}

/// Trims, drops blanks and removes duplicates, keeping first-seen order.
pub fn dedupe_trimmed<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        assistant_fragments, dedupe_trimmed, is_assistant_item, join_fragments, next_cursor,
        notification_thread_id, notification_turn_id, page_items, started_thread_id,
        started_turn_id, text_fragments, thread_read_fragments,
    };

    #[test]
    fn unit_notification_ids_follow_path_priority() {
        let params = json!({
            "threadId": "t-direct",
            "thread": {"id": "t-nested"},
            "turn": {"id": "u-nested", "threadId": "t-turn"},
            "item": {"turnId": "u-item"}
        });
        assert_eq!(notification_thread_id(&params), Some("t-direct"));
        assert_eq!(notification_turn_id(&params), Some("u-nested"));

        let item_only = json!({"item": {"turnId": "u-item"}, "turn": {"threadId": "t-turn"}});
        assert_eq!(notification_thread_id(&item_only), Some("t-turn"));
        assert_eq!(notification_turn_id(&item_only), Some("u-item"));
    }

    #[test]
    fn unit_non_string_ids_fall_through_to_next_path() {
        let params = json!({"threadId": 7, "thread": {"id": "t-1"}});
        assert_eq!(notification_thread_id(&params), Some("t-1"));
        assert_eq!(notification_turn_id(&json!({"turn": "u-1"})), None);
    }

    #[test]
    fn unit_started_ids_skip_empty_strings() {
        assert_eq!(
            started_thread_id(&json!({"thread": {"id": ""}, "threadId": "t-2"})).as_deref(),
            Some("t-2")
        );
        assert_eq!(started_thread_id(&json!({"thread": {}})), None);
        assert_eq!(
            started_turn_id(&json!({"turn": {"id": "u-9"}})).as_deref(),
            Some("u-9")
        );
        assert_eq!(started_turn_id(&json!({"turnId": ""})), None);
    }

    #[test]
    fn unit_assistant_detection_covers_type_role_and_author() {
        assert!(is_assistant_item(&json!({"type": "agentMessage"})));
        assert!(is_assistant_item(&json!({"type": "AssistantMessage"})));
        assert!(is_assistant_item(&json!({"role": "Assistant"})));
        assert!(is_assistant_item(&json!({"author": "assistant"})));
        assert!(!is_assistant_item(&json!({"type": "userMessage", "role": "user"})));
        assert!(!is_assistant_item(&json!({"type": "reasoning"})));
    }

    #[test]
    fn unit_text_fragments_walk_nested_containers_in_order() {
        let item = json!({
            "type": "agentMessage",
            "text": "A",
            "content": [
                {"type": "output_text", "output_text": "B"},
                "C",
                {"items": [{"value": "D"}], "data": {"delta": "E"}}
            ],
            "output": {"message": "F"}
        });
        assert_eq!(text_fragments(&item), vec!["A", "B", "C", "D", "E", "F"]);
        assert_eq!(text_fragments(&item), text_fragments(&item));
    }

    #[test]
    fn unit_non_assistant_items_yield_no_fragments() {
        let item = json!({"type": "commandExecution", "output": "ls -la"});
        assert!(assistant_fragments(&item).is_empty());
    }

    #[test]
    fn functional_thread_read_extracts_assistant_text_across_turns() {
        let result = json!({
            "thread": {
                "id": "t-1",
                "turns": [
                    {"items": [
                        {"type": "userMessage", "content": [{"text": "input"}]},
                        {"type": "agentMessage", "text": "Hello "}
                    ]},
                    "not-a-turn",
                    {"items": [{"role": "assistant", "content": [{"text": " world"}]}, 3]}
                ]
            }
        });
        let fragments = thread_read_fragments(&result);
        assert_eq!(fragments, vec!["Hello ", " world"]);
        assert_eq!(join_fragments(&fragments), "Helloworld");
        assert!(thread_read_fragments(&json!({"thread": {}})).is_empty());
    }

    #[test]
    fn unit_join_fragments_drops_blank_segments() {
        assert_eq!(join_fragments(&["  O", "", "   ", "K  "]), "OK");
        assert_eq!(join_fragments::<&str>(&[]), "");
    }

    #[test]
    fn unit_page_items_accept_arrays_and_wrapped_lists() {
        assert_eq!(
            page_items(&json!(["gpt-5.2", {"model": "gpt-5.2-mini"}, {"id": "o4"}, 7])),
            vec!["gpt-5.2", "gpt-5.2-mini", "o4"]
        );
        assert_eq!(
            page_items(&json!({"data": [{"id": "a"}], "items": [{"id": "b"}]})),
            vec!["a"]
        );
        assert_eq!(page_items(&json!({"items": [{"model": "b"}]})), vec!["b"]);
        assert!(page_items(&json!({"models": ["ignored"]})).is_empty());
    }

    #[test]
    fn unit_next_cursor_normalizes_blank_values() {
        assert_eq!(next_cursor(&json!({"nextCursor": "p2"})).as_deref(), Some("p2"));
        assert_eq!(next_cursor(&json!({"next_cursor": " p3 "})).as_deref(), Some("p3"));
        assert_eq!(
            next_cursor(&json!({"pagination": {"nextCursor": "p4"}})).as_deref(),
            Some("p4")
        );
        assert_eq!(next_cursor(&json!({"nextCursor": "   "})), None);
        assert_eq!(next_cursor(&json!({"nextCursor": null})), None);
        assert_eq!(next_cursor(&json!(["a"])), None);
    }

    #[test]
    fn unit_dedupe_trimmed_keeps_first_seen_order() {
        let items = vec![" a ", "b", "", "a", "c", "b"]
            .into_iter()
            .map(str::to_string);
        assert_eq!(dedupe_trimmed(items), vec!["a", "b", "c"]);
    }
}

//! Helpers over the generated A2A types: part and message constructors,
//! metadata conversion, and the task state machine.

use std::collections::BTreeMap;
use std::time::SystemTime;

use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Timestamp, Value};
use uuid::Uuid;

use crate::pb::{part, DataPart, Message, Part, Role, TaskState};

/// Returns the current wall-clock time as a protobuf timestamp.
#[must_use]
pub fn now() -> Timestamp {
    Timestamp::from(SystemTime::now())
}

/// Builds a text part.
#[must_use]
pub fn text_part(text: impl Into<String>) -> Part {
    Part {
        part: Some(part::Part::Text(text.into())),
    }
}

/// Builds a structured-data part from a JSON value.
#[must_use]
pub fn data_part(data: &serde_json::Value, description: impl Into<String>) -> Part {
    Part {
        part: Some(part::Part::Data(DataPart {
            data: Some(json_to_struct(data)),
            description: description.into(),
        })),
    }
}

/// Builds a message with a generated id and a single text part.
#[must_use]
pub fn text_message(role: Role, text: impl Into<String>) -> Message {
    Message {
        message_id: Uuid::new_v4().to_string(),
        context_id: String::new(),
        task_id: String::new(),
        role: role as i32,
        content: vec![text_part(text)],
        metadata: None,
    }
}

/// Flattens every text part of a message into one string.
#[must_use]
pub fn message_text(message: &Message) -> String {
    let mut out = String::new();
    for part in &message.content {
        if let Some(part::Part::Text(text)) = &part.part {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

/// Returns the first structured-data part of a message as JSON, if any.
#[must_use]
pub fn message_data(message: &Message) -> Option<serde_json::Value> {
    message.content.iter().find_map(|part| match &part.part {
        Some(part::Part::Data(data)) => data.data.as_ref().map(struct_to_json),
        _ => None,
    })
}

/// Converts a JSON value to a protobuf `Value`.
#[must_use]
pub fn json_to_value(value: &serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_value).collect(),
        }),
        serde_json::Value::Object(_) => Kind::StructValue(json_to_struct(value)),
    };
    Value { kind: Some(kind) }
}

/// Converts a protobuf `Value` to JSON.
#[must_use]
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::NumberValue(n)) => serde_json::Number::from_f64(*n)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(fields)) => struct_to_json(fields),
    }
}

/// Converts a JSON value to a protobuf `Struct`. Non-object values are
/// stored under a `"value"` key.
#[must_use]
pub fn json_to_struct(value: &serde_json::Value) -> Struct {
    let mut fields = BTreeMap::new();
    match value {
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                fields.insert(key.clone(), json_to_value(item));
            }
        }
        other => {
            fields.insert("value".to_owned(), json_to_value(other));
        }
    }
    Struct { fields }
}

/// Converts a protobuf `Struct` to a JSON object.
#[must_use]
pub fn struct_to_json(fields: &Struct) -> serde_json::Value {
    serde_json::Value::Object(
        fields
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), value_to_json(value)))
            .collect(),
    )
}

/// Reads a string field out of optional metadata.
#[must_use]
pub fn metadata_string(metadata: Option<&Struct>, key: &str) -> Option<String> {
    match metadata?.fields.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

/// State machine helpers for [`TaskState`].
pub trait TaskStateExt {
    /// Returns `true` for COMPLETED, FAILED, and CANCELLED.
    fn is_terminal(self) -> bool;

    /// Returns `true` when the state machine permits moving to `next`.
    fn can_transition_to(self, next: TaskState) -> bool;
}

impl TaskStateExt for TaskState {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    fn can_transition_to(self, next: TaskState) -> bool {
        match self {
            TaskState::Submitted => matches!(
                next,
                TaskState::Working
                    | TaskState::Completed
                    | TaskState::Failed
                    | TaskState::Cancelled
            ),
            TaskState::Working => matches!(
                next,
                TaskState::Working
                    | TaskState::Completed
                    | TaskState::Failed
                    | TaskState::Cancelled
            ),
            _ => false,
        }
    }
}

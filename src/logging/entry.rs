//! Finished log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::logging::level::Level;

/// Keys owned by the entry itself; metadata cannot override them.
pub const RESERVED_KEYS: [&str; 5] = ["level", "time", "service", "msg", "context"];

/// Immutable record produced once per log call.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogEntry {
    pub level: Level,
    pub time: DateTime<Utc>,
    pub service: String,
    pub msg: String,
    /// Snapshot of the active context scope.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    /// Bindings merged with call metadata.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LogEntry {
    /// Merge bindings, metadata and context into an entry.
    ///
    /// Metadata overrides bindings. `msg` (or `message`) in the merged
    /// fields supplies the message when `msg` is empty; `msg` is always
    /// removed so only one canonical message exists. Other reserved keys
    /// are dropped.
    pub fn assemble(
        level: Level,
        service: &str,
        msg: String,
        context: Map<String, Value>,
        bindings: &Map<String, Value>,
        metadata: Map<String, Value>,
    ) -> Self {
        let mut fields = bindings.clone();
        fields.extend(metadata);

        let mut msg = msg;
        let inline_msg = fields.remove("msg");
        if msg.is_empty() {
            if let Some(found) = inline_msg {
                msg = value_to_message(found);
            } else if let Some(found) = fields.remove("message") {
                msg = value_to_message(found);
            }
        }
        for key in RESERVED_KEYS {
            fields.remove(key);
        }

        Self {
            level,
            time: Utc::now(),
            service: service.to_string(),
            msg,
            context,
            fields,
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Single-line JSON rendering.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"level":"{}","msg":"unrenderable entry: {}"}}"#, self.level, e)
        })
    }
}

fn value_to_message(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

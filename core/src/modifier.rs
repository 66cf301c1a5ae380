//! Normalisation pass over incoming registration bodies: well-known
//! identifier fields are rewritten to canonical lowercase UUID form before
//! validation. Unknown fields pass through untouched.

use serde_json::Value;

const UUID_FIELDS: [&str; 5] = ["id", "node_id", "device_id", "source_id", "flow_id"];
const UUID_LIST_FIELDS: [&str; 2] = ["senders", "receivers"];

pub fn canonicalise(data: &mut Value) {
    let Some(obj) = data.as_object_mut() else { return };

    for field in UUID_FIELDS {
        if let Some(Value::String(s)) = obj.get_mut(field) {
            *s = s.to_lowercase();
        }
    }

    for field in UUID_LIST_FIELDS {
        if let Some(Value::Array(entries)) = obj.get_mut(field) {
            for entry in entries {
                if let Value::String(s) = entry {
                    *s = s.to_lowercase();
                }
            }
        }
    }

    if let Some(Value::Object(sub)) = obj.get_mut("subscription") {
        if let Some(Value::String(s)) = sub.get_mut("sender_id") {
            *s = s.to_lowercase();
        }
    }
}

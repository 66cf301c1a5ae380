//! Server-side property filtering shared by the query GET surface and the
//! subscription dispatcher.
//!
//! Forms: `field=value` matches a top-level field exactly; `a.b.c=value`
//! descends dotted paths, where a list-valued intermediate matches when any
//! element carries the remaining subpath; a list-valued leaf matches on
//! containment. `query.*` and `paging.*` parameters are reserved for the
//! API itself and never reach the matcher.

use serde_json::{Map, Value};

pub const RESERVED_PREFIXES: [&str; 2] = ["query.", "paging."];

pub fn is_reserved(key: &str) -> bool { RESERVED_PREFIXES.iter().any(|p| key.starts_with(p)) }

/// True when `obj` satisfies every non-reserved parameter.
pub fn matches(params: &Map<String, Value>, obj: &Value) -> bool {
    params.iter().all(|(key, want)| is_reserved(key) || matches_one(key, want, obj))
}

fn matches_one(key: &str, want: &Value, obj: &Value) -> bool {
    // A literal top-level field wins over dotted descent, so a field whose
    // name contains a dot is still addressable.
    if let Some(found) = obj.get(key) {
        return leaf_matches(found, want);
    }
    if key.contains('.') {
        let parts: Vec<&str> = key.split('.').collect();
        return descend(obj, &parts, want);
    }
    false
}

fn descend(value: &Value, parts: &[&str], want: &Value) -> bool {
    match parts.split_first() {
        None => leaf_matches(value, want),
        Some((head, rest)) => match value {
            Value::Object(map) => map.get(*head).is_some_and(|v| descend(v, rest, want)),
            Value::Array(items) => items.iter().any(|v| descend(v, parts, want)),
            _ => false,
        },
    }
}

fn leaf_matches(found: &Value, want: &Value) -> bool {
    match found {
        Value::Array(items) => items.contains(want),
        other => other == want,
    }
}

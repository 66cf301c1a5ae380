use mediafabric_proto::{ApiVersion, ResourceKind};
use serde_json::{Map, Value};

use super::catalogue::fields_for;

/// Metadata attribute naming the API version a record was registered
/// under. Stripped from every external projection.
pub const API_VERSION_ATTR: &str = "@_apiversion";

/// The API version a stored record carries. Records predating the
/// metadata attribute are taken to be v1.0.
pub fn stored_version(record: &Value) -> ApiVersion {
    record
        .get(API_VERSION_ATTR)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(ApiVersion::V1_0)
}

/// Remove every `@_`-prefixed metadata attribute.
pub fn strip_metadata(record: &mut Value) {
    if let Some(obj) = record.as_object_mut() {
        obj.retain(|k, _| !k.starts_with("@_"));
    }
}

/// Project a record onto exactly the field set defined for
/// `(kind, target)`. Fields from later versions are dropped; a receiver's
/// `caps` is reset to `{}` below v1.1, where the capability set had no
/// defined content.
pub fn legalise(record: &Value, kind: ResourceKind, target: ApiVersion) -> Value {
    let Some(obj) = record.as_object() else { return record.clone() };

    let mut out = Map::new();
    for spec in fields_for(kind) {
        if spec.since > target {
            continue;
        }
        if let Some(value) = obj.get(spec.name) {
            out.insert(spec.name.to_string(), value.clone());
        }
    }
    if kind == ResourceKind::Receiver && target < ApiVersion::V1_1 && out.contains_key("caps") {
        out.insert("caps".to_string(), Value::Object(Map::new()));
    }
    Value::Object(out)
}

/// Apply the version policy to a stored record for a reader at `target`:
///
/// - stored above `target`: legalise down to `target` and emit;
/// - stored at `target`: emit unchanged;
/// - stored below `target`: emit only when the reader consented via a
///   `query.downgrade` floor at or below the stored version;
/// - `target` outside the supported set: nothing.
///
/// The emitted record keeps its metadata attribute (rewritten when
/// truncated); callers strip it before anything leaves the process.
pub fn downgrade(
    record: &Value,
    kind: ResourceKind,
    target: ApiVersion,
    floor: Option<ApiVersion>,
) -> Option<Value> {
    record.as_object()?;
    if !target.is_supported() {
        return None;
    }
    let stored = stored_version(record);
    if stored > target {
        let mut out = legalise(record, kind, target);
        out[API_VERSION_ATTR] = Value::String(target.to_string());
        return Some(out);
    }
    if stored == target {
        return Some(record.clone());
    }
    match floor {
        Some(floor) if stored >= floor => Some(record.clone()),
        _ => None,
    }
}

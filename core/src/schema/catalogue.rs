use mediafabric_proto::{ApiVersion, ResourceKind};
use serde_json::Value;
use uuid::Uuid;

/// Shape constraint on a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Uuid,
    String,
    /// Nullable string, e.g. a source's `clock_name`.
    StringOrNull,
    /// `"<seconds>:<nanoseconds>"` ordering token.
    VersionToken,
    Object,
    Array,
    StringArray,
    UuidArray,
    /// Anything goes; presence is all that is checked.
    Any,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub shape: FieldShape,
    /// Required from `since` onward. Optional fields only have their shape
    /// checked when present.
    pub required: bool,
    pub since: ApiVersion,
}

const V1_0: ApiVersion = ApiVersion::V1_0;
const V1_1: ApiVersion = ApiVersion::V1_1;
const V1_2: ApiVersion = ApiVersion::V1_2;

const fn req(name: &'static str, shape: FieldShape, since: ApiVersion) -> FieldSpec {
    FieldSpec { name, shape, required: true, since }
}

const fn opt(name: &'static str, shape: FieldShape, since: ApiVersion) -> FieldSpec {
    FieldSpec { name, shape, required: false, since }
}

const NODE: &[FieldSpec] = &[
    req("id", FieldShape::Uuid, V1_0),
    req("version", FieldShape::VersionToken, V1_0),
    req("label", FieldShape::String, V1_0),
    req("href", FieldShape::String, V1_0),
    opt("hostname", FieldShape::String, V1_0),
    req("caps", FieldShape::Object, V1_0),
    req("services", FieldShape::Array, V1_0),
    req("description", FieldShape::String, V1_1),
    req("tags", FieldShape::Object, V1_1),
    req("api", FieldShape::Object, V1_1),
    req("clocks", FieldShape::Array, V1_1),
    req("interfaces", FieldShape::Array, V1_2),
];

const DEVICE: &[FieldSpec] = &[
    req("id", FieldShape::Uuid, V1_0),
    req("version", FieldShape::VersionToken, V1_0),
    req("label", FieldShape::String, V1_0),
    req("type", FieldShape::String, V1_0),
    req("node_id", FieldShape::Uuid, V1_0),
    req("senders", FieldShape::UuidArray, V1_0),
    req("receivers", FieldShape::UuidArray, V1_0),
    req("description", FieldShape::String, V1_1),
    req("tags", FieldShape::Object, V1_1),
    req("controls", FieldShape::Array, V1_1),
];

const SOURCE: &[FieldSpec] = &[
    req("id", FieldShape::Uuid, V1_0),
    req("version", FieldShape::VersionToken, V1_0),
    req("label", FieldShape::String, V1_0),
    req("description", FieldShape::String, V1_0),
    req("format", FieldShape::String, V1_0),
    req("caps", FieldShape::Object, V1_0),
    req("tags", FieldShape::Object, V1_0),
    req("device_id", FieldShape::Uuid, V1_0),
    req("parents", FieldShape::Array, V1_0),
    req("clock_name", FieldShape::StringOrNull, V1_1),
    opt("channels", FieldShape::Array, V1_1),
    opt("grain_rate", FieldShape::Object, V1_1),
];

const FLOW: &[FieldSpec] = &[
    req("id", FieldShape::Uuid, V1_0),
    req("version", FieldShape::VersionToken, V1_0),
    req("label", FieldShape::String, V1_0),
    req("description", FieldShape::String, V1_0),
    req("format", FieldShape::String, V1_0),
    req("tags", FieldShape::Object, V1_0),
    req("source_id", FieldShape::Uuid, V1_0),
    req("parents", FieldShape::Array, V1_0),
    opt("device_id", FieldShape::Uuid, V1_1),
    opt("grain_rate", FieldShape::Object, V1_1),
    opt("media_type", FieldShape::String, V1_1),
    opt("refclock", FieldShape::Any, V1_1),
    opt("colorspace", FieldShape::String, V1_1),
    opt("components", FieldShape::Array, V1_1),
    opt("frame_height", FieldShape::Any, V1_1),
    opt("frame_width", FieldShape::Any, V1_1),
    opt("interlace_mode", FieldShape::String, V1_1),
    opt("bit_depth", FieldShape::Any, V1_1),
    opt("sample_rate", FieldShape::Object, V1_1),
    opt("DID_SDID", FieldShape::Array, V1_1),
    opt("transfer_characteristic", FieldShape::String, V1_1),
];

const SENDER: &[FieldSpec] = &[
    req("id", FieldShape::Uuid, V1_0),
    req("version", FieldShape::VersionToken, V1_0),
    req("label", FieldShape::String, V1_0),
    req("description", FieldShape::String, V1_0),
    req("flow_id", FieldShape::Uuid, V1_0),
    req("transport", FieldShape::String, V1_0),
    req("tags", FieldShape::Object, V1_0),
    req("device_id", FieldShape::Uuid, V1_0),
    req("manifest_href", FieldShape::String, V1_0),
    req("interface_bindings", FieldShape::StringArray, V1_2),
    opt("caps", FieldShape::Object, V1_2),
];

const RECEIVER: &[FieldSpec] = &[
    req("id", FieldShape::Uuid, V1_0),
    req("version", FieldShape::VersionToken, V1_0),
    req("label", FieldShape::String, V1_0),
    req("description", FieldShape::String, V1_0),
    req("format", FieldShape::String, V1_0),
    req("caps", FieldShape::Object, V1_0),
    req("tags", FieldShape::Object, V1_0),
    req("device_id", FieldShape::Uuid, V1_0),
    req("transport", FieldShape::String, V1_0),
    req("subscription", FieldShape::Object, V1_0),
    req("interface_bindings", FieldShape::StringArray, V1_2),
];

pub fn fields_for(kind: ResourceKind) -> &'static [FieldSpec] {
    match kind {
        ResourceKind::Node => NODE,
        ResourceKind::Device => DEVICE,
        ResourceKind::Source => SOURCE,
        ResourceKind::Flow => FLOW,
        ResourceKind::Sender => SENDER,
        ResourceKind::Receiver => RECEIVER,
    }
}

/// Validate a registration body against the `(kind, version)` schema.
/// Unknown fields are permitted; the projection rules bound what readers
/// see. The message is surfaced verbatim to the registrant on failure.
pub fn validate(kind: ResourceKind, version: ApiVersion, data: &Value) -> Result<(), String> {
    let Some(obj) = data.as_object() else {
        return Err(format!("\"data\" for a \"{kind}\" resource must be an object"));
    };

    for spec in fields_for(kind) {
        if spec.since > version {
            continue;
        }
        match obj.get(spec.name) {
            None if spec.required => {
                return Err(format!("Attribute \"{}\" is mandatory for \"{kind}\" resources", spec.name));
            }
            None => {}
            Some(value) => check_shape(value, spec.shape).map_err(|expected| {
                format!("Attribute \"{}\" of \"{kind}\" resource is malformed, expected {expected}", spec.name)
            })?,
        }
    }
    Ok(())
}

fn check_shape(value: &Value, shape: FieldShape) -> Result<(), &'static str> {
    let ok = match shape {
        FieldShape::Uuid => value.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok()),
        FieldShape::String => value.is_string(),
        FieldShape::StringOrNull => value.is_string() || value.is_null(),
        FieldShape::VersionToken => value.as_str().is_some_and(is_version_token),
        FieldShape::Object => value.is_object(),
        FieldShape::Array => value.is_array(),
        FieldShape::StringArray => {
            value.as_array().is_some_and(|items| items.iter().all(Value::is_string))
        }
        FieldShape::UuidArray => value.as_array().is_some_and(|items| {
            items.iter().all(|v| v.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok()))
        }),
        FieldShape::Any => true,
    };
    if ok {
        return Ok(());
    }
    Err(match shape {
        FieldShape::Uuid => "a UUID",
        FieldShape::String => "a string",
        FieldShape::StringOrNull => "a string or null",
        FieldShape::VersionToken => "\"<seconds>:<nanoseconds>\"",
        FieldShape::Object => "an object",
        FieldShape::Array => "an array",
        FieldShape::StringArray => "an array of strings",
        FieldShape::UuidArray => "an array of UUIDs",
        FieldShape::Any => "a value",
    })
}

fn is_version_token(s: &str) -> bool {
    match s.split_once(':') {
        Some((secs, nanos)) => {
            !secs.is_empty()
                && !nanos.is_empty()
                && secs.chars().all(|c| c.is_ascii_digit())
                && nanos.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

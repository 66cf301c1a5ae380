use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One push message on a subscription socket. The framing mimics a data
/// grain: zero timestamps, zero rate, and a payload of `{pre, post}`
/// transitions under a topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grain {
    pub grain_type: String,
    /// Stable per-process identity of the emitting query service.
    pub source_id: Uuid,
    /// The subscription id the grain belongs to.
    pub flow_id: Uuid,
    pub origin_timestamp: String,
    pub sync_timestamp: String,
    pub creation_timestamp: String,
    pub rate: Rational,
    pub duration: Rational,
    pub grain: GrainPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rational {
    pub numerator: u64,
    pub denominator: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrainPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub topic: String,
    pub data: Vec<GrainEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrainEntry {
    pub path: String,
    pub pre: Value,
    pub post: Value,
}

const ZERO_TS: &str = "0:0";
const PAYLOAD_TYPE: &str = "urn:x-nmos:format:data.event";

impl Grain {
    /// An event grain with no transitions yet; `topic` is wrapped as
    /// `/<topic>/` with surrounding slashes normalised.
    pub fn event(source_id: Uuid, flow_id: Uuid, topic: &str) -> Self {
        Grain {
            grain_type: "event".to_string(),
            source_id,
            flow_id,
            origin_timestamp: ZERO_TS.to_string(),
            sync_timestamp: ZERO_TS.to_string(),
            creation_timestamp: ZERO_TS.to_string(),
            rate: Rational { numerator: 0, denominator: 1 },
            duration: Rational { numerator: 0, denominator: 1 },
            grain: GrainPayload {
                payload_type: PAYLOAD_TYPE.to_string(),
                topic: format!("/{}/", topic.trim_matches('/')),
                data: Vec::new(),
            },
        }
    }

    /// Append a transition; the entry path is the `id` of whichever side
    /// carries one.
    pub fn push(&mut self, pre: Value, post: Value) {
        let path = pre
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| post.get("id").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        self.grain.data.push(GrainEntry { path, pre, post });
    }
}

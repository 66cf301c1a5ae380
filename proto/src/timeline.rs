use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque per-flow segment record on the timeline surface. Only the
/// keying fields are mandated; everything else rides along untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineSegment {
    pub id: String,
    pub store_id: String,
    pub min_ts_utc: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

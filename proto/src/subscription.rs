use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Body of `POST /subscriptions`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubscriptionSpec {
    #[serde(default)]
    pub resource_path: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default = "default_update_rate")]
    pub max_update_rate_ms: u64,
    #[serde(default)]
    pub persist: bool,
}

fn default_update_rate() -> u64 { 100 }

/// A subscription as presented by the query API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub ws_href: String,
    pub max_update_rate_ms: u64,
    pub persist: bool,
    pub resource_path: String,
    pub params: Map<String, Value>,
    /// Only projected from v1.1 onward.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SubstrateError;

/// Whether a write created the key or replaced an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    /// Canonical key with a leading slash, e.g. `/resource/nodes/<id>`.
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Set,
    Delete,
}

/// One modification observed on the substrate's change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    /// Canonical key with a leading slash.
    pub key: String,
    pub value: Option<String>,
    pub prev_value: Option<String>,
    pub modified_index: u64,
}

/// Result of one bounded watch call.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Event(ChangeEvent),
    /// Nothing happened within the timeout.
    Timeout,
    /// The requested index has fallen off the substrate's bounded history;
    /// `head` is the current modification index.
    HistoryGone { head: u64 },
}

/// The hierarchical key/value substrate all registry state lives in.
///
/// Keys are passed without a leading slash; keys in results are canonical
/// with a leading slash, mirroring the store's own spelling. `list` and
/// `delete` are recursive. TTL keys vanish on expiry.
#[async_trait]
pub trait Substrate: Send + Sync + 'static {
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Written, SubstrateError>;

    /// Compare-and-swap create: succeeds only when the key does not exist.
    /// Returns `false` when another writer holds the key.
    async fn create_exclusive(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, SubstrateError>;

    /// Rewrite an existing key, refreshing its TTL. Fails with
    /// [`SubstrateError::NotFound`] when the key is absent or has lapsed;
    /// it is never recreated.
    async fn refresh(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SubstrateError>;

    async fn get(&self, key: &str) -> Result<Option<String>, SubstrateError>;

    async fn exists(&self, key: &str) -> Result<bool, SubstrateError>;

    /// All leaf entries under `prefix`, recursively.
    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, SubstrateError>;

    /// Recursive delete. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), SubstrateError>;

    /// The substrate's current modification index.
    async fn head_index(&self) -> Result<u64, SubstrateError>;

    /// Wait for the first modification under `prefix` with index greater
    /// than `after_index`, up to `timeout`.
    async fn watch(&self, prefix: &str, after_index: u64, timeout: Duration)
        -> Result<WatchOutcome, SubstrateError>;
}

/// Key composition for the fabric's substrate layout. Nothing outside this
/// module spells a key by hand.
pub mod keys {
    use mediafabric_proto::ResourceKind;

    pub const RESOURCE_ROOT: &str = "resource";
    pub const HEALTH_ROOT: &str = "health";
    pub const TIMELINE_ROOT: &str = "timeline";
    pub const COLLECTOR_LOCK: &str = "garbage_collection";

    pub fn resource(kind: ResourceKind, id: &str) -> String {
        format!("{}/{}/{}", RESOURCE_ROOT, kind.plural(), id)
    }

    pub fn resource_kind(kind: ResourceKind) -> String { format!("{}/{}", RESOURCE_ROOT, kind.plural()) }

    pub fn health(node_id: &str) -> String { format!("{}/{}", HEALTH_ROOT, node_id) }

    pub fn timeline_segment(mapped_type: &str, flow_id: &str, store_id: &str, min_ts_utc: &str) -> String {
        format!("{}/{}/{}/{}/{}", TIMELINE_ROOT, mapped_type, flow_id, store_id, min_ts_utc)
    }

    /// The resource kind a canonical key addresses, if any.
    pub fn resource_kind_of(key: &str) -> Option<ResourceKind> {
        let mut parts = key.trim_start_matches('/').split('/');
        if parts.next() != Some(RESOURCE_ROOT) {
            return None;
        }
        ResourceKind::from_plural(parts.next()?).ok()
    }

    /// The final path segment of a key.
    pub fn leaf(key: &str) -> &str { key.trim_end_matches('/').rsplit('/').next().unwrap_or("") }

}

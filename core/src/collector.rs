use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mediafabric_proto::ResourceKind;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::substrate::{keys, Substrate};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(9);
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Seconds between passes.
    pub interval: Duration,
    /// Wall-clock bound on one pass; partial passes are fine, deletes are
    /// idempotent and the next pass finishes the job.
    pub deadline: Duration,
    /// TTL on the shared lock key, so a crashed collector cannot block its
    /// replicas for long.
    pub lock_ttl: Duration,
    /// Written as the lock value, identifying the pass owner.
    pub identity: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            deadline: DEFAULT_DEADLINE,
            lock_ttl: DEFAULT_LOCK_TTL,
            identity: format!("collector-{}", std::process::id()),
        }
    }
}

/// Periodic reaper of resources whose ancestor chain no longer reaches an
/// alive node. Replicas coordinate through a CAS-created lock key, so at
/// most one collector deletes per interval.
pub struct Collector {
    handle: JoinHandle<()>,
}

impl Collector {
    pub fn spawn(substrate: Arc<dyn Substrate>, config: CollectorConfig) -> Self {
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(config.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            timer.tick().await; // immediate first tick; collect on cadence after that
            loop {
                timer.tick().await;
                Self::run_once(&substrate, &config).await;
            }
        });
        Self { handle }
    }

    pub fn shutdown(&self) { self.handle.abort(); }

    /// One full pass: take the lock, collect under the deadline, release.
    /// Never raises; every failure is logged and the next pass happens
    /// regardless.
    pub async fn run_once(substrate: &Arc<dyn Substrate>, config: &CollectorConfig) {
        match substrate.create_exclusive(keys::COLLECTOR_LOCK, &config.identity, config.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("not collecting, another collector holds the lock");
                return;
            }
            Err(e) => {
                error!("could not write the collection lock: {e}");
                return;
            }
        }

        if tokio::time::timeout(config.deadline, collect(substrate)).await.is_err() {
            warn!("collection pass hit its deadline, leaving the rest to the next pass");
        }

        if let Err(e) = substrate.delete(keys::COLLECTOR_LOCK).await {
            warn!("could not remove the collection lock: {e}");
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) { self.handle.abort(); }
}

async fn collect(substrate: &Arc<dyn Substrate>) {
    let alive: HashSet<String> = match substrate.list(keys::HEALTH_ROOT).await {
        Ok(entries) => entries.iter().map(|kv| keys::leaf(&kv.key).to_string()).collect(),
        Err(e) => {
            warn!("substrate unavailable listing health keys: {e}");
            return;
        }
    };

    let mut remaining: Vec<(ResourceKind, String, Value)> = Vec::new();
    for kind in ResourceKind::ALL {
        let entries = match substrate.list(&keys::resource_kind(kind)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("substrate unavailable listing {}: {e}", kind.plural());
                return;
            }
        };
        for entry in entries {
            match serde_json::from_str::<Value>(&entry.value) {
                Ok(record) => {
                    let id = keys::leaf(&entry.key).to_string();
                    remaining.push((kind, id, record));
                }
                Err(e) => warn!(key = %entry.key, "skipping undecodable record: {e}"),
            }
        }
    }

    // Seed with dead nodes, then iterate orphan discovery to a fixpoint,
    // shrinking the search space as resources are marked.
    let mut to_kill: HashSet<(ResourceKind, String)> = remaining
        .iter()
        .filter(|(kind, id, _)| *kind == ResourceKind::Node && !alive.contains(id))
        .map(|(kind, id, _)| (*kind, id.clone()))
        .collect();

    loop {
        tokio::task::yield_now().await;
        let present: HashSet<(ResourceKind, String)> =
            remaining.iter().map(|(kind, id, _)| (*kind, id.clone())).collect();
        let newly_dead: Vec<(ResourceKind, String)> = remaining
            .iter()
            .filter(|(kind, _, record)| *kind != ResourceKind::Node && !parent_alive(*kind, record, &present, &to_kill))
            .map(|(kind, id, _)| (*kind, id.clone()))
            .collect();
        if newly_dead.is_empty() && to_kill.is_empty() {
            return;
        }
        if newly_dead.is_empty() {
            break;
        }
        to_kill.extend(newly_dead);
        remaining.retain(|(kind, id, _)| !to_kill.contains(&(*kind, id.clone())));
    }

    for (kind, id) in &to_kill {
        info!(kind = %kind, id = %id, "removing orphaned resource");
        if let Err(e) = substrate.delete(&keys::resource(*kind, id)).await {
            warn!(kind = %kind, id = %id, "could not remove resource: {e}");
        }
    }
}

/// Whether the resource's governing parent is present and not itself
/// marked. Flows registered with a `device_id` are governed by the device;
/// older source-only flows by the source.
fn parent_alive(
    kind: ResourceKind,
    record: &Value,
    present: &HashSet<(ResourceKind, String)>,
    to_kill: &HashSet<(ResourceKind, String)>,
) -> bool {
    let parent = match kind {
        ResourceKind::Node => return true,
        ResourceKind::Device => parent_ref(record, "node_id", ResourceKind::Node),
        ResourceKind::Source | ResourceKind::Sender | ResourceKind::Receiver => {
            parent_ref(record, "device_id", ResourceKind::Device)
        }
        ResourceKind::Flow => parent_ref(record, "device_id", ResourceKind::Device)
            .or_else(|| parent_ref(record, "source_id", ResourceKind::Source)),
    };
    match parent {
        Some(parent) => present.contains(&parent) && !to_kill.contains(&parent),
        None => false,
    }
}

fn parent_ref(record: &Value, field: &str, kind: ResourceKind) -> Option<(ResourceKind, String)> {
    record.get(field).and_then(Value::as_str).map(|id| (kind, id.to_string()))
}

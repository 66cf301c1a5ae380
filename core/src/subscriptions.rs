use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use mediafabric_proto::{ApiVersion, Grain, ResourceKind, SubscriptionInfo, SubscriptionSpec};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueryError;
use crate::filter;
use crate::query::{QueryService, ResourceQuery};
use crate::schema;
use crate::substrate::{keys, ChangeAction, ChangeEvent};
use crate::watch::WatchMessage;

struct SocketHandle {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

struct Entry {
    id: Uuid,
    resource_path: String,
    params: Map<String, Value>,
    max_update_rate_ms: u64,
    persist: bool,
    api_version: ApiVersion,
    ws_href: String,
    sockets: Vec<SocketHandle>,
    /// Non-persistent subscriptions are only culled once a socket has
    /// attached and the last one has gone again.
    had_socket: bool,
}

impl Entry {
    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            ws_href: self.ws_href.clone(),
            max_update_rate_ms: self.max_update_rate_ms,
            persist: self.persist,
            resource_path: self.resource_path.clone(),
            params: self.params.clone(),
            secure: (self.api_version >= ApiVersion::V1_1).then_some(false),
        }
    }

    fn downgrade_floor(&self) -> Option<ApiVersion> {
        self.params.get("query.downgrade").and_then(Value::as_str).and_then(|s| s.parse().ok())
    }

    fn should_retain(&self) -> bool { self.persist || !self.had_socket || !self.sockets.is_empty() }
}

/// A socket freshly attached to a subscription. Frames appear on `rx`
/// ready to send; the channel closing means the server side let go.
pub struct SocketAttachment {
    pub subscription_id: Uuid,
    pub socket_id: u64,
    pub rx: mpsc::UnboundedReceiver<String>,
}

/// The set of active subscriptions and their attached sockets. HTTP
/// handlers add and remove entries; the dispatch task fans substrate
/// events out as change grains. One mutex guards the table; every
/// operation under it is short.
#[derive(Clone)]
pub struct SubscriptionManager(Arc<Inner>);

struct Inner {
    query: QueryService,
    /// Host (and optional port) advertised in `ws_href`s.
    advertised_host: String,
    /// Stable per-process identity stamped into every grain.
    source_id: Uuid,
    table: Mutex<Vec<Entry>>,
    next_socket_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(query: QueryService, advertised_host: impl Into<String>) -> Self {
        Self(Arc::new(Inner {
            query,
            advertised_host: advertised_host.into(),
            source_id: process_source_id(),
            table: Mutex::new(Vec::new()),
            next_socket_id: AtomicU64::new(1),
        }))
    }

    pub fn source_id(&self) -> Uuid { self.0.source_id }

    /// Create a subscription, or hand back an identical non-persistent one
    /// that already exists. The bool is true when a new entry was made.
    pub fn create(&self, spec: SubscriptionSpec, api_version: ApiVersion) -> (SubscriptionInfo, bool) {
        let mut table = self.0.table.lock().unwrap();
        if !spec.persist {
            if let Some(existing) = table.iter().find(|e| {
                !e.persist
                    && e.api_version == api_version
                    && e.resource_path == spec.resource_path
                    && e.params == spec.params
            }) {
                return (existing.info(), false);
            }
        }

        let id = Uuid::new_v4();
        let entry = Entry {
            id,
            ws_href: format!("ws://{}/x-nmos/query/{api_version}/ws/?uid={id}", self.0.advertised_host),
            resource_path: spec.resource_path,
            params: spec.params,
            max_update_rate_ms: spec.max_update_rate_ms,
            persist: spec.persist,
            api_version,
            sockets: Vec::new(),
            had_socket: false,
        };
        let info = entry.info();
        debug!(id = %id, persist = entry.persist, "subscription created, {} active", table.len() + 1);
        table.push(entry);
        (info, true)
    }

    pub fn get(&self, id: Uuid) -> Option<SubscriptionInfo> {
        self.0.table.lock().unwrap().iter().find(|e| e.id == id).map(Entry::info)
    }

    pub fn list(&self) -> Vec<SubscriptionInfo> {
        self.0.table.lock().unwrap().iter().map(Entry::info).collect()
    }

    /// Subscriptions created through one API version, as that version's
    /// introspection surface presents them.
    pub fn list_for(&self, api_version: ApiVersion) -> Vec<SubscriptionInfo> {
        self.0.table.lock().unwrap().iter().filter(|e| e.api_version == api_version).map(Entry::info).collect()
    }

    /// Explicit deletion is only allowed for persistent subscriptions;
    /// non-persistent ones die with their last socket.
    pub fn delete(&self, id: Uuid) -> Result<(), QueryError> {
        let mut table = self.0.table.lock().unwrap();
        let index = table.iter().position(|e| e.id == id).ok_or(QueryError::SubscriptionNotFound(id))?;
        if !table[index].persist {
            return Err(QueryError::NotPersistent(id));
        }
        table.remove(index);
        Ok(())
    }

    /// Attach a socket: deliver the sync grain describing every currently
    /// matching resource, then stream increments until detach.
    pub async fn attach(&self, id: Uuid) -> Result<SocketAttachment, QueryError> {
        let (resource_path, params, api_version) = {
            let table = self.0.table.lock().unwrap();
            let entry = table.iter().find(|e| e.id == id).ok_or(QueryError::SubscriptionNotFound(id))?;
            (entry.resource_path.clone(), entry.params.clone(), entry.api_version)
        };

        let records = self.current_records(&resource_path, &params, api_version).await?;

        let mut table = self.0.table.lock().unwrap();
        let entry = table.iter_mut().find(|e| e.id == id).ok_or(QueryError::SubscriptionNotFound(id))?;

        let mut grain = Grain::event(self.0.source_id, entry.id, &resource_path);
        for record in records {
            grain.push(record.clone(), record);
        }

        let socket_id = self.0.next_socket_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // Sent before the handle can see any dispatch, so the sync grain
        // always precedes incremental grains on this socket.
        let _ = tx.send(grain_frame(&grain));
        entry.sockets.push(SocketHandle { id: socket_id, tx });
        entry.had_socket = true;
        debug!(subscription = %id, "socket attached, {} on this subscription", entry.sockets.len());

        Ok(SocketAttachment { subscription_id: id, socket_id, rx })
    }

    pub fn detach(&self, subscription_id: Uuid, socket_id: u64) {
        let mut table = self.0.table.lock().unwrap();
        if let Some(entry) = table.iter_mut().find(|e| e.id == subscription_id) {
            entry.sockets.retain(|s| s.id != socket_id);
            debug!(subscription = %subscription_id, "socket detached, {} left", entry.sockets.len());
        }
        table.retain(Entry::should_retain);
    }

    /// Feed one message from the change-feed consumer through the table.
    pub fn dispatch(&self, message: WatchMessage) {
        match message {
            WatchMessage::Event(event) => self.dispatch_event(event),
            WatchMessage::IndexSkip { from, to } => {
                info!("change feed skipped {from} -> {to}, disconnecting subscribers to force a resync");
                self.disconnect_all();
            }
            WatchMessage::ConnectionLost => {
                info!("change feed lost, disconnecting subscribers to force a resync");
                self.disconnect_all();
            }
        }
    }

    /// Close every attached socket. Clients reconnect and resync; only
    /// subscriptions due to die with their sockets are culled.
    pub fn disconnect_all(&self) {
        let mut table = self.0.table.lock().unwrap();
        for entry in table.iter_mut() {
            entry.sockets.clear();
        }
        table.retain(Entry::should_retain);
    }

    fn dispatch_event(&self, event: ChangeEvent) {
        let Some(kind) = keys::resource_kind_of(&event.key) else {
            debug!(key = %event.key, "change for a key outside the catalogue");
            return;
        };

        let post = match event.action {
            ChangeAction::Set => parse_or_empty(event.value.as_deref()),
            ChangeAction::Delete => json!({}),
        };
        let pre = parse_or_empty(event.prev_value.as_deref());
        if event.action == ChangeAction::Set && pre == post {
            return;
        }

        let mut table = self.0.table.lock().unwrap();
        for entry in table.iter_mut() {
            if entry.sockets.is_empty() || !path_matches(&entry.resource_path, &event.key) {
                continue;
            }
            // Candidate check on the raw objects; the per-version
            // projections below decide the precise transition.
            if !filter::matches(&entry.params, &post) && !filter::matches(&entry.params, &pre) {
                continue;
            }

            let floor = entry.downgrade_floor();
            let pre_proj = projection(&pre, kind, entry.api_version, floor);
            let post_proj = projection(&post, kind, entry.api_version, floor);
            if pre_proj.is_none() && post_proj.is_none() {
                continue;
            }

            let pre_visible = pre_proj.as_ref().is_some_and(|v| filter::matches(&entry.params, v));
            let post_visible = post_proj.as_ref().is_some_and(|v| filter::matches(&entry.params, v));
            let (grain_pre, grain_post) = match (pre_visible, post_visible) {
                (false, true) => (json!({}), post_proj.unwrap_or_else(|| json!({}))),
                (true, false) => (pre_proj.unwrap_or_else(|| json!({})), json!({})),
                (true, true) => (
                    pre_proj.unwrap_or_else(|| json!({})),
                    post_proj.unwrap_or_else(|| json!({})),
                ),
                (false, false) => continue,
            };

            let subscription_id = entry.id;
            let mut grain = Grain::event(self.0.source_id, subscription_id, kind.plural());
            grain.push(grain_pre, grain_post);
            let frame = grain_frame(&grain);
            entry.sockets.retain(|socket| {
                let alive = socket.tx.send(frame.clone()).is_ok();
                if !alive {
                    warn!(subscription = %subscription_id, "dropping dead socket");
                }
                alive
            });
        }
        table.retain(Entry::should_retain);
    }

    /// Everything currently matching a subscription, via the same pipeline
    /// the GET surface uses, so a sync grain equals the equivalent query.
    async fn current_records(
        &self,
        resource_path: &str,
        params: &Map<String, Value>,
        api_version: ApiVersion,
    ) -> Result<Vec<Value>, QueryError> {
        let query = ResourceQuery::new(api_version, params.clone());
        let trimmed = resource_path.trim_matches('/');
        if trimmed.is_empty() {
            let mut all = Vec::new();
            for kind in ResourceKind::ALL {
                all.extend(self.0.query.list(kind, &query).await?);
            }
            return Ok(all);
        }

        let mut segments = trimmed.split('/');
        let Ok(kind) = ResourceKind::from_plural(segments.next().unwrap_or("")) else {
            return Ok(Vec::new());
        };
        match segments.next() {
            Some(id) => Ok(self.0.query.get_one(kind, &id.to_lowercase(), &query).await?.into_iter().collect()),
            None => Ok(self.0.query.list(kind, &query).await?),
        }
    }
}

fn grain_frame(grain: &Grain) -> String { serde_json::to_string(grain).unwrap_or_default() }

fn parse_or_empty(raw: Option<&str>) -> Value {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_else(|| json!({}))
}

fn projection(obj: &Value, kind: ResourceKind, version: ApiVersion, floor: Option<ApiVersion>) -> Option<Value> {
    if obj.as_object().is_none_or(Map::is_empty) {
        return None;
    }
    let mut projected = schema::downgrade(obj, kind, version, floor)?;
    schema::strip_metadata(&mut projected);
    Some(projected)
}

/// Whether a subscription scoped to `resource_path` covers a substrate
/// key. An empty path covers the whole catalogue; `/nodes/<id>` narrows to
/// one record.
fn path_matches(resource_path: &str, key: &str) -> bool {
    let trimmed = resource_path.trim_matches('/');
    if trimmed.is_empty() {
        return true;
    }
    key.trim_start_matches('/')
        .strip_prefix(keys::RESOURCE_ROOT)
        .map(|rest| rest.trim_start_matches('/'))
        .is_some_and(|rest| rest.to_lowercase().starts_with(&trimmed.to_lowercase()))
}

fn process_source_id() -> Uuid {
    let host = hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_default();
    let seed = format!("{}{host}", std::process::id());
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, seed.as_bytes())
}

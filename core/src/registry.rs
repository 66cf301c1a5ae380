use std::sync::Arc;
use std::time::Duration;

use mediafabric_proto::{ApiVersion, ResourceKind, TimelineSegment};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{RegistrationError, SubstrateError};
use crate::modifier;
use crate::schema;
use crate::substrate::{keys, Substrate, Written};

/// Seconds a node stays "alive" after its last heartbeat.
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(12);

const TIMELINE_MAPPING: [(&str, &str); 1] = [("flowsegment", "flows")];

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub heartbeat_ttl: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self { Self { heartbeat_ttl: DEFAULT_HEARTBEAT_TTL } }
}

/// Outcome of a successful resource registration.
#[derive(Debug, Clone)]
pub struct Registered {
    /// The stored record with metadata stripped, echoed to the registrant.
    pub resource: Value,
    pub created: bool,
    /// Canonical resource URL for the `Location` header.
    pub location: String,
}

/// The registration core: validates advertisements, enforces parentage,
/// writes records and liveness keys. The substrate is the only state.
#[derive(Clone)]
pub struct RegistrationService {
    substrate: Arc<dyn Substrate>,
    config: RegistrationConfig,
}

impl RegistrationService {
    pub fn new(substrate: Arc<dyn Substrate>) -> Self { Self::with_config(substrate, RegistrationConfig::default()) }

    pub fn with_config(substrate: Arc<dyn Substrate>, config: RegistrationConfig) -> Self { Self { substrate, config } }

    /// Register a resource from a `{"type": ..., "data": {...}}` body.
    pub async fn register(&self, version: ApiVersion, body: &Value) -> Result<Registered, RegistrationError> {
        for key in ["type", "data"] {
            if body.get(key).is_none() {
                return Err(invalid(format!("Attribute \"{key}\" is mandatory for \"resource\" type")));
            }
        }
        let kind_name = body["type"]
            .as_str()
            .ok_or_else(|| invalid("Attribute \"type\" must be a string".to_string()))?;
        let mut data = body["data"].clone();
        if data.get("id").is_none() {
            return Err(invalid(format!("Attribute \"id\" is mandatory for \"{kind_name}\" type")));
        }

        modifier::canonicalise(&mut data);

        let kind = ResourceKind::from_singular(kind_name).map_err(|_| {
            let expected: Vec<&str> = ResourceKind::ALL.iter().map(|k| k.singular()).collect();
            invalid(format!("resource: \"type\" attribute is malformed, expected one of {expected:?}"))
        })?;
        let id = data["id"]
            .as_str()
            .ok_or_else(|| invalid("Attribute \"id\" must be a string".to_string()))?
            .to_string();
        if Uuid::parse_str(&id).is_ok_and(|u| u.is_nil()) {
            return Err(invalid("Attribute \"id\" must not be the zero UUID".to_string()));
        }

        schema::validate(kind, version, &data).map_err(invalid)?;
        self.ensure_parents(kind, &data).await?;

        data[schema::API_VERSION_ATTR] = Value::String(version.to_string());
        let written = self.substrate.put(&keys::resource(kind, &id), &data.to_string(), None).await?;

        if kind == ResourceKind::Node {
            let now = chrono::Utc::now().timestamp().to_string();
            self.substrate.put(&keys::health(&id), &now, Some(self.config.heartbeat_ttl)).await?;
        }

        let created = written == Written::Created;
        info!(kind = %kind, id = %id, created, "registered resource");

        let mut resource = data;
        schema::strip_metadata(&mut resource);
        let location = format!("/x-nmos/registration/{version}/resource/{}/{id}/", kind.plural());
        Ok(Registered { resource, created, location })
    }

    async fn ensure_parents(&self, kind: ResourceKind, data: &Value) -> Result<(), RegistrationError> {
        match kind {
            ResourceKind::Node => Ok(()),
            ResourceKind::Device => self.ensure_parent(data, "node_id", ResourceKind::Node).await,
            ResourceKind::Source | ResourceKind::Sender | ResourceKind::Receiver => {
                self.ensure_parent(data, "device_id", ResourceKind::Device).await
            }
            ResourceKind::Flow => {
                self.ensure_parent(data, "source_id", ResourceKind::Source).await?;
                if data.get("device_id").is_some() {
                    self.ensure_parent(data, "device_id", ResourceKind::Device).await?;
                }
                Ok(())
            }
        }
    }

    async fn ensure_parent(&self, data: &Value, field: &str, parent: ResourceKind) -> Result<(), RegistrationError> {
        let Some(parent_id) = data.get(field).and_then(Value::as_str) else {
            return Err(invalid(format!("Attribute \"{field}\" is mandatory")));
        };
        if !self.substrate.exists(&keys::resource(parent, parent_id)).await? {
            let title = {
                let mut s = parent.singular().to_string();
                s[..1].make_ascii_uppercase();
                s
            };
            return Err(invalid(format!("{title} {parent_id} does not exist")));
        }
        Ok(())
    }

    pub async fn get_resource(&self, kind: ResourceKind, id: &str) -> Result<Option<Value>, RegistrationError> {
        match self.substrate.get(&keys::resource(kind, id)).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw)
                    .map_err(|e| SubstrateError::Decode(format!("record {kind}/{id}: {e}")))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub async fn list_ids(&self, kind: ResourceKind) -> Result<Vec<String>, RegistrationError> {
        let entries = self.substrate.list(&keys::resource_kind(kind)).await?;
        Ok(entries.iter().map(|kv| keys::leaf(&kv.key).to_string()).collect())
    }

    /// Remove a record. Descendants are left to the collector, so the tree
    /// may briefly hold dangling references.
    pub async fn delete_resource(&self, kind: ResourceKind, id: &str) -> Result<(), RegistrationError> {
        let key = keys::resource(kind, id);
        if !self.substrate.exists(&key).await? {
            return Err(RegistrationError::NotFound);
        }
        info!(kind = %kind, id = %id, "unregister resource");
        self.substrate.delete(&key).await?;
        Ok(())
    }

    /// Renew a node's liveness key. The node record must exist and the key
    /// must not have lapsed already; a lapsed node re-registers instead.
    pub async fn heartbeat(&self, node_id: &str) -> Result<(), RegistrationError> {
        if !self.substrate.exists(&keys::resource(ResourceKind::Node, node_id)).await? {
            return Err(RegistrationError::UnknownNode(node_id.to_string()));
        }
        let now = chrono::Utc::now().timestamp().to_string();
        match self.substrate.refresh(&keys::health(node_id), &now, self.config.heartbeat_ttl).await {
            Ok(()) => Ok(()),
            Err(SubstrateError::NotFound(_)) => {
                warn!(node_id, "heartbeat for lapsed node");
                Err(RegistrationError::HealthLapsed(node_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn health(&self, node_id: &str) -> Result<Option<String>, RegistrationError> {
        Ok(self.substrate.get(&keys::health(node_id)).await?)
    }

    pub async fn list_health(&self) -> Result<Vec<String>, RegistrationError> {
        let entries = self.substrate.list(keys::HEALTH_ROOT).await?;
        Ok(entries.iter().map(|kv| keys::leaf(&kv.key).to_string()).collect())
    }

    /// Store an opaque timeline segment record. Returns the stored key as a
    /// `Location` path.
    pub async fn record_segment(&self, body: &Value) -> Result<(String, bool), RegistrationError> {
        let rtype = require_str(body, "type")?;
        let data = body.get("data").ok_or_else(|| invalid("Required 'data' attribute missing".to_string()))?;
        let segment: TimelineSegment = serde_json::from_value(data.clone())
            .map_err(|e| invalid(format!("Required attribute missing: {e}")))?;

        let mapped = TIMELINE_MAPPING
            .iter()
            .find(|(from, _)| *from == rtype)
            .map(|(_, to)| *to)
            .ok_or_else(|| invalid(format!("No mapping for type {rtype}")))?;

        let key = keys::timeline_segment(mapped, &segment.id, &segment.store_id, &segment.min_ts_utc);
        let written = self.substrate.put(&key, &data.to_string(), None).await?;
        Ok((format!("/{key}"), written == Written::Created))
    }

    /// Segment keys under `timeline/<mapped_type>/`, relative to it.
    pub async fn list_segments(&self, mapped_type: &str) -> Result<Vec<String>, RegistrationError> {
        if !TIMELINE_MAPPING.iter().any(|(_, to)| *to == mapped_type) {
            return Err(invalid(format!("No mapping for type '{mapped_type}'")));
        }
        let prefix = format!("{}/{}", keys::TIMELINE_ROOT, mapped_type);
        let entries = self.substrate.list(&prefix).await?;
        let strip = format!("/{prefix}/");
        Ok(entries.iter().map(|kv| kv.key.trim_start_matches(&strip).to_string()).collect())
    }

    pub async fn delete_segments(&self, mapped_type: &str, rest: &str) -> Result<(), RegistrationError> {
        let key = format!("{}/{}/{}", keys::TIMELINE_ROOT, mapped_type, rest.trim_matches('/'));
        self.substrate.delete(&key).await?;
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> RegistrationError { RegistrationError::Invalid(message.into()) }

fn require_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, RegistrationError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("Required '{key}' attribute missing")))
}

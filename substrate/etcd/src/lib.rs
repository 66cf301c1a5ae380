//! [`Substrate`] backend speaking the etcd v2 `/v2/keys` HTTP API:
//! form-encoded writes, `recursive=true` reads and deletes, `prevExist`
//! compare-and-swap, and `wait=true&waitIndex=N` long-polls for the change
//! feed. Everything registry-shaped stays in the core; this crate only
//! translates the wire.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use mediafabric_core::error::SubstrateError;
use mediafabric_core::substrate::{ChangeAction, ChangeEvent, KeyValue, Substrate, WatchOutcome, Written};

/// Bound on plain reads and writes; the long-poll gets its own budget.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// etcd error code for "the requested history has been cleared".
const ECODE_EVENT_INDEX_CLEARED: u64 = 401;
/// etcd error code for "key not found".
const ECODE_KEY_NOT_FOUND: u64 = 100;

const INDEX_HEADER: &str = "x-etcd-index";

#[derive(Clone)]
pub struct EtcdSubstrate {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    action: Option<String>,
    node: Option<EtcdNode>,
    #[serde(rename = "prevNode")]
    prev_node: Option<EtcdNode>,
    #[serde(rename = "errorCode")]
    error_code: Option<u64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    key: Option<String>,
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    nodes: Option<Vec<EtcdNode>>,
    #[serde(rename = "modifiedIndex")]
    modified_index: Option<u64>,
}

impl EtcdSubstrate {
    /// `base_url` is the store's root, e.g. `http://127.0.0.1:4001`.
    pub fn new(base_url: &str) -> Result<Self, SubstrateError> {
        let parsed = url::Url::parse(base_url).map_err(SubstrateError::unavailable)?;
        let client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SubstrateError::unavailable)?;
        Ok(Self { client, base: parsed.as_str().trim_end_matches('/').to_string() })
    }

    fn keys_url(&self, key: &str) -> String { format!("{}/v2/keys/{}", self.base, key.trim_matches('/')) }

    async fn write(
        &self,
        key: &str,
        query: &[(&str, &str)],
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<reqwest::Response, SubstrateError> {
        let mut form: Vec<(&str, String)> = vec![("value", value.to_string())];
        if let Some(ttl) = ttl {
            form.push(("ttl", ttl.as_secs().to_string()));
        }
        self.client
            .put(self.keys_url(key))
            .query(query)
            .form(&form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(SubstrateError::unavailable)
    }

    /// etcd v2 leaves empty parent directories behind after a recursive
    /// delete; sweep them from the leaf upward.
    async fn prune_empty_branches(client: reqwest::Client, base: String, key: String) {
        let mut parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();
        while parts.len() > 1 {
            parts.pop();
            let url = format!("{}/v2/keys/{}", base, parts.join("/"));
            let Ok(response) = client.get(&url).timeout(REQUEST_TIMEOUT).send().await else { return };
            if response.status() != StatusCode::OK {
                return;
            }
            let Ok(body) = response.json::<EtcdResponse>().await else { return };
            let Some(node) = body.node else { return };
            if !node.dir || node.nodes.is_some_and(|n| !n.is_empty()) {
                return;
            }
            debug!(url, "pruning empty directory");
            let _ = client.delete(&url).query(&[("dir", "true")]).timeout(REQUEST_TIMEOUT).send().await;
        }
    }
}

fn collect_leaves(node: &EtcdNode, out: &mut Vec<KeyValue>) {
    if let Some(children) = &node.nodes {
        for child in children {
            collect_leaves(child, out);
        }
    }
    if !node.dir {
        if let (Some(key), Some(value)) = (&node.key, &node.value) {
            out.push(KeyValue { key: key.clone(), value: value.clone() });
        }
    }
}

fn header_index(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn action_of(name: &str) -> Option<ChangeAction> {
    match name {
        "set" | "create" | "update" | "compareAndSwap" => Some(ChangeAction::Set),
        "delete" | "expire" | "compareAndDelete" => Some(ChangeAction::Delete),
        _ => None,
    }
}

#[async_trait]
impl Substrate for EtcdSubstrate {
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Written, SubstrateError> {
        let response = self.write(key, &[], value, ttl).await?;
        match response.status() {
            StatusCode::CREATED => Ok(Written::Created),
            StatusCode::OK => Ok(Written::Updated),
            status => Err(SubstrateError::Unavailable(format!("PUT {key}: {status}"))),
        }
    }

    async fn create_exclusive(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, SubstrateError> {
        let response = self.write(key, &[("prevExist", "false")], value, Some(ttl)).await?;
        match response.status() {
            StatusCode::CREATED => Ok(true),
            StatusCode::PRECONDITION_FAILED => Ok(false),
            status => Err(SubstrateError::Unavailable(format!("CAS {key}: {status}"))),
        }
    }

    async fn refresh(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SubstrateError> {
        let response = self.write(key, &[("prevExist", "true")], value, Some(ttl)).await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::NOT_FOUND => Err(SubstrateError::NotFound(key.to_string())),
            status => Err(SubstrateError::Unavailable(format!("refresh {key}: {status}"))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        let response = self
            .client
            .get(self.keys_url(key))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(SubstrateError::unavailable)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let body: EtcdResponse =
                    response.json().await.map_err(|e| SubstrateError::Decode(e.to_string()))?;
                Ok(body.node.and_then(|n| n.value))
            }
            status => Err(SubstrateError::Unavailable(format!("GET {key}: {status}"))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, SubstrateError> {
        let response = self
            .client
            .head(self.keys_url(key))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(SubstrateError::unavailable)?;
        Ok(response.status() == StatusCode::OK)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, SubstrateError> {
        let response = self
            .client
            .get(self.keys_url(prefix))
            .query(&[("recursive", "true")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(SubstrateError::unavailable)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            StatusCode::OK => {
                let body: EtcdResponse =
                    response.json().await.map_err(|e| SubstrateError::Decode(e.to_string()))?;
                let mut out = Vec::new();
                if let Some(node) = &body.node {
                    collect_leaves(node, &mut out);
                }
                Ok(out)
            }
            status => Err(SubstrateError::Unavailable(format!("GET {prefix}: {status}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SubstrateError> {
        let response = self
            .client
            .delete(self.keys_url(key))
            .query(&[("recursive", "true")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(SubstrateError::unavailable)?;
        match response.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => {
                let client = self.client.clone();
                let base = self.base.clone();
                let key = key.trim_matches('/').to_string();
                tokio::spawn(Self::prune_empty_branches(client, base, key));
                Ok(())
            }
            status => Err(SubstrateError::Unavailable(format!("DELETE {key}: {status}"))),
        }
    }

    async fn head_index(&self) -> Result<u64, SubstrateError> {
        let response = self
            .client
            .get(self.keys_url("resource"))
            .timeout(Duration::from_secs(1))
            .send()
            .await
            .map_err(SubstrateError::unavailable)?;
        // Any response carries the current index, a 404 before the first
        // registration included.
        Ok(header_index(&response))
    }

    async fn watch(&self, prefix: &str, after_index: u64, timeout: Duration)
        -> Result<WatchOutcome, SubstrateError>
    {
        let result = self
            .client
            .get(format!("{}/", self.keys_url(prefix)))
            .query(&[
                ("recursive", "true".to_string()),
                ("wait", "true".to_string()),
                ("waitIndex", (after_index + 1).to_string()),
            ])
            .timeout(timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(WatchOutcome::Timeout),
            Err(e) => return Err(SubstrateError::unavailable(e)),
        };

        let status = response.status();
        let head = header_index(&response);
        let body: EtcdResponse = match response.json().await {
            Ok(body) => body,
            // The poll can come back empty when the store drops the
            // connection at its own horizon; treat it like our timeout.
            Err(e) if status == StatusCode::OK => {
                warn!("empty or undecodable watch payload: {e}");
                return Ok(WatchOutcome::Timeout);
            }
            Err(e) => return Err(SubstrateError::Decode(e.to_string())),
        };

        if let Some(code) = body.error_code {
            if code == ECODE_EVENT_INDEX_CLEARED {
                return Ok(WatchOutcome::HistoryGone { head });
            }
            if code == ECODE_KEY_NOT_FOUND {
                // Nothing registered yet; nothing to watch.
                return Ok(WatchOutcome::Timeout);
            }
            return Err(SubstrateError::Unavailable(format!(
                "watch: etcd error {code}: {}",
                body.message.unwrap_or_default()
            )));
        }

        let action = body
            .action
            .as_deref()
            .and_then(action_of)
            .ok_or_else(|| SubstrateError::Decode(format!("watch: unknown action {:?}", body.action)))?;
        let node = body.node.ok_or_else(|| SubstrateError::Decode("watch: response without node".into()))?;
        let key = node.key.ok_or_else(|| SubstrateError::Decode("watch: node without key".into()))?;
        let modified_index = node
            .modified_index
            .ok_or_else(|| SubstrateError::Decode("watch: node without modifiedIndex".into()))?;

        Ok(WatchOutcome::Event(ChangeEvent {
            action,
            key,
            value: node.value,
            prev_value: body.prev_node.and_then(|n| n.value),
            modified_index,
        }))
    }
}

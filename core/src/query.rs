use std::sync::Arc;

use mediafabric_proto::{ApiVersion, ResourceKind};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::QueryError;
use crate::filter;
use crate::schema;
use crate::substrate::{keys, Substrate};

/// A parsed read request: the API version it arrived on plus its query
/// parameters (filters, `query.*` controls, `verbose`).
#[derive(Debug, Clone)]
pub struct ResourceQuery {
    pub version: ApiVersion,
    pub params: Map<String, Value>,
}

impl ResourceQuery {
    pub fn new(version: ApiVersion, params: Map<String, Value>) -> Self { Self { version, params } }

    /// The minimum stored version the caller will accept, from
    /// `query.downgrade`. Unparseable values are treated as absent.
    pub fn downgrade_floor(&self) -> Option<ApiVersion> {
        self.params.get("query.downgrade").and_then(Value::as_str).and_then(|s| s.parse().ok())
    }

    /// Full records unless the caller asked for `verbose=false`.
    pub fn verbose(&self) -> bool {
        self.params.get("verbose").and_then(Value::as_str).map(str::to_lowercase).as_deref() != Some("false")
    }

    /// The parameters the property matcher sees: everything except the
    /// output-shaping `verbose` switch (`query.*`/`paging.*` are skipped
    /// by the matcher itself).
    fn filter_params(&self) -> Map<String, Value> {
        self.params.iter().filter(|(k, _)| k.as_str() != "verbose").map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Read-only catalogue over the substrate: version policy, metadata
/// stripping, property filtering, verbosity. Keeps no state of its own.
#[derive(Clone)]
pub struct QueryService {
    substrate: Arc<dyn Substrate>,
}

impl QueryService {
    pub fn new(substrate: Arc<dyn Substrate>) -> Self { Self { substrate } }

    /// All records of `kind` that survive the query's version policy and
    /// filters. With `verbose=false`, just their ids.
    pub async fn list(&self, kind: ResourceKind, query: &ResourceQuery) -> Result<Vec<Value>, QueryError> {
        let entries = self.substrate.list(&keys::resource_kind(kind)).await?;
        let filters = query.filter_params();
        let mut out = Vec::new();
        for entry in entries {
            if let Some(record) = project(&entry.value, kind, query, &filters) {
                out.push(presentation(record, query.verbose()));
            }
        }
        Ok(out)
    }

    /// A single record by id, or `None` when absent or not visible to this
    /// query.
    pub async fn get_one(&self, kind: ResourceKind, id: &str, query: &ResourceQuery) -> Result<Option<Value>, QueryError> {
        let Some(raw) = self.substrate.get(&keys::resource(kind, id)).await? else {
            return Ok(None);
        };
        let filters = query.filter_params();
        Ok(project(&raw, kind, query, &filters).map(|record| presentation(record, query.verbose())))
    }
}

fn presentation(record: Value, verbose: bool) -> Value {
    if verbose {
        record
    } else {
        record.get("id").cloned().unwrap_or(Value::Null)
    }
}

/// The per-record pipeline: decode, version policy, metadata strip,
/// property filter.
fn project(
    raw: &str,
    kind: ResourceKind,
    query: &ResourceQuery,
    filters: &Map<String, Value>,
) -> Option<Value> {
    let record: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(kind = %kind, "undecodable record in substrate: {err}");
            return None;
        }
    };
    let mut projected = schema::downgrade(&record, kind, query.version, query.downgrade_floor())?;
    schema::strip_metadata(&mut projected);
    filter::matches(filters, &projected).then_some(projected)
}

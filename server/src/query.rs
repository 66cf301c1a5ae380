use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use mediafabric_core::query::ResourceQuery;
use mediafabric_core::{QueryService, SubscriptionManager};
use mediafabric_proto::{ApiVersion, ResourceKind, SubscriptionSpec};

use crate::error::{parse_version, ApiError};
use crate::ws;

#[derive(Clone)]
pub struct QueryState {
    pub query: QueryService,
    pub subscriptions: SubscriptionManager,
}

/// The query API: `/x-nmos/query/{version}/...` for every supported
/// version, including the subscription collection and the WebSocket
/// endpoint.
pub fn router(state: QueryState) -> Router {
    // Both slash spellings resolve; published ws_hrefs and Locations use
    // the slashed form.
    Router::new()
        .route("/x-nmos/query/", get(versions_index))
        .route("/x-nmos/query/{version}/", get(version_root))
        .route("/x-nmos/query/{version}/subscriptions", get(list_subscriptions).post(post_subscription))
        .route("/x-nmos/query/{version}/subscriptions/", get(list_subscriptions).post(post_subscription))
        .route("/x-nmos/query/{version}/subscriptions/{id}", get(get_subscription).delete(delete_subscription))
        .route("/x-nmos/query/{version}/subscriptions/{id}/", get(get_subscription).delete(delete_subscription))
        .route("/x-nmos/query/{version}/ws/", get(ws::ws_handler))
        .route("/x-nmos/query/{version}/{kind}", get(list_resources))
        .route("/x-nmos/query/{version}/{kind}/", get(list_resources))
        .route("/x-nmos/query/{version}/{kind}/{id}", get(get_resource))
        .route("/x-nmos/query/{version}/{kind}/{id}/", get(get_resource))
        .with_state(state)
}

async fn versions_index() -> Json<Value> {
    Json(Value::Array(ApiVersion::SUPPORTED.iter().map(|v| json!(format!("{v}/"))).collect()))
}

async fn version_root(Path(version): Path<String>) -> Result<Json<Value>, ApiError> {
    parse_version(&version)?;
    let mut index = vec![json!("subscriptions/")];
    index.extend(ResourceKind::ALL.iter().map(|k| json!(format!("{}/", k.plural()))));
    Ok(Json(Value::Array(index)))
}

fn query_params(raw: HashMap<String, String>) -> Map<String, Value> {
    raw.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
}

async fn list_resources(
    State(state): State<QueryState>,
    Path((version, kind)): Path<(String, String)>,
    Query(raw_params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let version = parse_version(&version)?;
    let kind = parse_kind(&kind)?;
    let query = ResourceQuery::new(version, query_params(raw_params));
    Ok(Json(state.query.list(kind, &query).await?))
}

async fn get_resource(
    State(state): State<QueryState>,
    Path((version, kind, id)): Path<(String, String, String)>,
    Query(raw_params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let version = parse_version(&version)?;
    let kind = parse_kind(&kind)?;
    let query = ResourceQuery::new(version, query_params(raw_params));
    match state.query.get_one(kind, &id.to_lowercase(), &query).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound("resource not found".to_string())),
    }
}

async fn list_subscriptions(
    State(state): State<QueryState>,
    Path(version): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let version = parse_version(&version)?;
    Ok(Json(json!(state.subscriptions.list_for(version))))
}

async fn post_subscription(
    State(state): State<QueryState>,
    Path(version): Path<String>,
    body: String,
) -> Result<Response, ApiError> {
    let version = parse_version(&version)?;
    let spec: SubscriptionSpec =
        serde_json::from_str(&body).map_err(|_| ApiError::BadRequest("No data supplied".to_string()))?;
    let (info, created) = state.subscriptions.create(spec, version);
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(json!(info))).into_response())
}

async fn get_subscription(
    State(state): State<QueryState>,
    Path((version, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    parse_version(&version)?;
    let id = parse_subscription_id(&id)?;
    match state.subscriptions.get(id) {
        Some(info) => Ok(Json(json!(info))),
        None => Err(ApiError::NotFound("Subscription not found".to_string())),
    }
}

async fn delete_subscription(
    State(state): State<QueryState>,
    Path((version, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    parse_version(&version)?;
    let id = parse_subscription_id(&id)?;
    state.subscriptions.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_kind(plural: &str) -> Result<ResourceKind, ApiError> {
    ResourceKind::from_plural(plural)
        .map_err(|_| ApiError::NotFound(format!("unknown resource type {plural:?}")))
}

pub(crate) fn parse_subscription_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Subscription not found".to_string()))
}

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::{json, Value};

use mediafabric_core::RegistrationService;
use mediafabric_proto::{ApiVersion, ResourceKind};

use crate::error::{parse_version, ApiError};

#[derive(Clone)]
pub struct RegistrationState {
    pub registry: RegistrationService,
}

/// The registration API: `/x-nmos/registration/{version}/...` for every
/// supported version.
pub fn router(registry: RegistrationService) -> Router {
    // Trailing-slash spellings are first-class: the Location header hands
    // clients the slashed form.
    Router::new()
        .route("/x-nmos/registration/", get(versions_index))
        .route("/x-nmos/registration/{version}/", get(version_root))
        .route("/x-nmos/registration/{version}/resource", get(resource_index).post(post_resource))
        .route("/x-nmos/registration/{version}/resource/", get(resource_index).post(post_resource))
        .route("/x-nmos/registration/{version}/resource/{kind}", get(list_kind))
        .route("/x-nmos/registration/{version}/resource/{kind}/", get(list_kind))
        .route("/x-nmos/registration/{version}/resource/{kind}/{id}", get(get_resource).delete(delete_resource))
        .route("/x-nmos/registration/{version}/resource/{kind}/{id}/", get(get_resource).delete(delete_resource))
        .route("/x-nmos/registration/{version}/health/nodes/", get(list_health))
        .route("/x-nmos/registration/{version}/health/nodes/{id}", get(get_health).post(post_health))
        .route("/x-nmos/registration/{version}/health/nodes/{id}/", get(get_health).post(post_health))
        .route("/x-nmos/registration/{version}/timeline", get(timeline_index).post(post_timeline))
        .route("/x-nmos/registration/{version}/timeline/{rtype}", get(list_timeline))
        .route("/x-nmos/registration/{version}/timeline/{rtype}/{*rest}", delete(delete_timeline))
        .with_state(RegistrationState { registry })
}

async fn versions_index() -> Json<Value> {
    Json(Value::Array(ApiVersion::SUPPORTED.iter().map(|v| json!(format!("{v}/"))).collect()))
}

async fn version_root(Path(version): Path<String>) -> Result<Json<Value>, ApiError> {
    parse_version(&version)?;
    Ok(Json(json!(["resource", "health/"])))
}

async fn resource_index(Path(version): Path<String>) -> Result<Json<Value>, ApiError> {
    parse_version(&version)?;
    Ok(Json(Value::Array(ResourceKind::ALL.iter().map(|k| json!(k.plural())).collect())))
}

async fn post_resource(
    State(state): State<RegistrationState>,
    Path(version): Path<String>,
    body: String,
) -> Result<Response, ApiError> {
    let version = parse_version(&version)?;
    let body: Value =
        serde_json::from_str(&body).map_err(|_| ApiError::BadRequest("No data supplied".to_string()))?;
    let registered = state.registry.register(version, &body).await?;
    let status = if registered.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, [(header::LOCATION, registered.location)], Json(registered.resource)).into_response())
}

async fn list_kind(
    State(state): State<RegistrationState>,
    Path((version, kind)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    parse_version(&version)?;
    let kind = parse_kind(&kind)?;
    Ok(Json(state.registry.list_ids(kind).await?))
}

async fn get_resource(
    State(state): State<RegistrationState>,
    Path((version, kind, id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    parse_version(&version)?;
    let kind = parse_kind(&kind)?;
    match state.registry.get_resource(kind, &id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound("resource not found".to_string())),
    }
}

async fn delete_resource(
    State(state): State<RegistrationState>,
    Path((version, kind, id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    parse_version(&version)?;
    let kind = parse_kind(&kind)?;
    state.registry.delete_resource(kind, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_health(
    State(state): State<RegistrationState>,
    Path(version): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    parse_version(&version)?;
    Ok(Json(state.registry.list_health().await?))
}

async fn get_health(
    State(state): State<RegistrationState>,
    Path((version, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    parse_version(&version)?;
    match state.registry.health(&id).await? {
        Some(value) => Ok(Json(json!({"health": value}))),
        None => Err(ApiError::NotFound("no health record".to_string())),
    }
}

async fn post_health(
    State(state): State<RegistrationState>,
    Path((version, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    parse_version(&version)?;
    state.registry.heartbeat(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn timeline_index(Path(version): Path<String>) -> Result<Json<Value>, ApiError> {
    parse_version(&version)?;
    Ok(Json(json!(["flows"])))
}

async fn post_timeline(
    State(state): State<RegistrationState>,
    Path(version): Path<String>,
    body: String,
) -> Result<Response, ApiError> {
    parse_version(&version)?;
    let body: Value =
        serde_json::from_str(&body).map_err(|_| ApiError::BadRequest("No data supplied".to_string()))?;
    let (location, created) = state.registry.record_segment(&body).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, [(header::LOCATION, location)], "").into_response())
}

async fn list_timeline(
    State(state): State<RegistrationState>,
    Path((version, rtype)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    parse_version(&version)?;
    Ok(Json(state.registry.list_segments(&rtype).await?))
}

async fn delete_timeline(
    State(state): State<RegistrationState>,
    Path((version, rtype, rest)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    parse_version(&version)?;
    state.registry.delete_segments(&rtype, &rest).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_kind(plural: &str) -> Result<ResourceKind, ApiError> {
    ResourceKind::from_plural(plural)
        .map_err(|_| ApiError::NotFound(format!("unknown resource type {plural:?}")))
}

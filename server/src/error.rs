use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use mediafabric_core::error::{QueryError, RegistrationError};
use mediafabric_proto::ApiVersion;

/// An unknown or unsupported version segment is an unknown URL.
pub(crate) fn parse_version(segment: &str) -> Result<ApiVersion, ApiError> {
    segment
        .parse::<ApiVersion>()
        .ok()
        .filter(ApiVersion::is_supported)
        .ok_or_else(|| ApiError::NotFound(format!("unsupported API version {segment:?}")))
}

/// HTTP-facing error, rendered as the standard `{code, error, debug}`
/// body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(m) | ApiError::Forbidden(m) | ApiError::NotFound(m) | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "code": status.as_u16(),
            "error": self.message(),
            "debug": null,
        });
        (status, Json(body)).into_response()
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::Invalid(m) => ApiError::BadRequest(m),
            RegistrationError::NotFound => ApiError::NotFound("resource not found".to_string()),
            RegistrationError::UnknownNode(_) | RegistrationError::HealthLapsed(_) => {
                ApiError::NotFound(err.to_string())
            }
            RegistrationError::Substrate(_) => ApiError::Internal("Registry unavailable".to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Invalid(m) => ApiError::BadRequest(m),
            QueryError::NotFound => ApiError::NotFound("not found".to_string()),
            QueryError::SubscriptionNotFound(_) => ApiError::NotFound("Subscription not found".to_string()),
            QueryError::NotPersistent(_) => ApiError::Forbidden("Not a persistent websocket".to_string()),
            QueryError::Substrate(_) => ApiError::Internal("Registry unavailable".to_string()),
        }
    }
}

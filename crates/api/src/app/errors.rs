use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use keel_core::DomainError;
use keel_infra::AccessError;

pub fn access_error_to_response(err: AccessError) -> axum::response::Response {
    match err {
        AccessError::Unauthenticated => json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "not logged in"),
        AccessError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        AccessError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        AccessError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        AccessError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        AccessError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        AccessError::Store(msg) => {
            tracing::error!(error = %msg, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path/query/body value, answering `400` on failure.
pub fn parse<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.parse::<T>()
        .map_err(|e| access_error_to_response(AccessError::from(e)))
}

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::errors;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(ctx): Extension<PrincipalContext>) -> axum::response::Response {
    let Some(principal) = ctx.principal() else {
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "not logged in");
    };

    Json(serde_json::json!({
        "principal_id": principal.id.to_string(),
        "email": principal.email,
        "roles": principal.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "group_ids": principal.group_ids,
        "is_admin": principal.is_admin(),
    }))
    .into_response()
}

//! Group grants on a project: `/projects/:id/groups`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};

use keel_auth::{GroupId, Role};
use keel_core::ProjectId;

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/projects/:id/groups", get(list_groups).post(add_group))
        .route("/projects/:id/groups/:group_id", patch(change_role).delete(remove_group))
}

pub async fn list_groups(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.access.list_grants(ctx.principal(), project_id).await {
        Ok(grants) => Json(serde_json::json!({ "groups": grants })).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

pub async fn add_group(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddGroupRequest>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role: Role = match errors::parse(&body.role) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let group_id = body.group_id.trim();
    if group_id.is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "group_id must not be empty");
    }

    match services
        .access
        .add_group(ctx.principal(), project_id, GroupId::new(group_id), role)
        .await
    {
        Ok(added) => (
            StatusCode::CREATED,
            Json(dto::mutation_json("grant", &added.value, &added.audit)),
        )
            .into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

pub async fn change_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path((id, group_id)): Path<(String, String)>,
    Json(body): Json<dto::ChangeRoleRequest>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role: Role = match errors::parse(&body.role) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .access
        .change_group_role(ctx.principal(), project_id, GroupId::new(group_id), role)
        .await
    {
        Ok(changed) => {
            let mut body = dto::mutation_json("grant", &changed.value.after, &changed.audit);
            body["previous_role"] = serde_json::json!(changed.value.before.role);
            Json(body).into_response()
        }
        Err(e) => errors::access_error_to_response(e),
    }
}

pub async fn remove_group(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path((id, group_id)): Path<(String, String)>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .access
        .remove_group(ctx.principal(), project_id, GroupId::new(group_id))
        .await
    {
        Ok(removed) => Json(dto::mutation_json("grant", &removed.value, &removed.audit)).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

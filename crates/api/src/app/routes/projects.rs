use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{patch, post},
    Json, Router,
};

use keel_auth::GroupId;
use keel_core::ProjectId;
use keel_infra::NewProject;

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/projects", post(create_project))
        .route("/projects/:id", patch(update_project))
        .route("/projects/:id/archive", post(archive_project))
}

pub async fn create_project(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateProjectRequest>,
) -> axum::response::Response {
    let input = NewProject {
        name: body.name,
        description: body.description.unwrap_or_default(),
        owner_group: GroupId::new(body.owner_group.trim()),
    };

    match services.access.create_project(ctx.principal(), input).await {
        Ok(created) => {
            let mut body = dto::mutation_json("project", &created.value.project, &created.audit);
            body["owner_grant"] = serde_json::json!(created.value.owner_grant);
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(e) => errors::access_error_to_response(e),
    }
}

pub async fn update_project(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateProjectRequest>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let patch = match body.into_patch() {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.access.update_project(ctx.principal(), project_id, patch).await {
        Ok(updated) => Json(dto::mutation_json("project", &updated.value, &updated.audit)).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

pub async fn archive_project(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.access.archive_project(ctx.principal(), project_id).await {
        Ok(archived) => Json(dto::mutation_json("project", &archived.value, &archived.audit)).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

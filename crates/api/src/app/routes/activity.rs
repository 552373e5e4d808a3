//! Read-side endpoints: activity feed and authorization explanation.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use keel_activity::Page;
use keel_auth::Permission;
use keel_core::ProjectId;

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/projects/:id/activity", get(list_activity))
        .route("/projects/:id/access", get(explain_access))
}

/// GET /projects/:id/activity?limit&offset - newest first
pub async fn list_activity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::ActivityQuery>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let page = Page::new(query.limit, query.offset);
    match services.access.activity(ctx.principal(), project_id, page).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// GET /projects/:id/access?permission=... - why a check would pass or fail
pub async fn explain_access(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::AccessQuery>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let permission: Permission = match errors::parse(&query.permission) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.access.check_access(ctx.principal(), project_id, permission).await {
        Ok(explanation) => Json(explanation).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

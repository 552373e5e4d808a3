use axum::{Router, routing::get};

pub mod activity;
pub mod groups;
pub mod projects;
pub mod system;

/// Router for every endpoint behind the credential middleware.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .merge(projects::router())
        .merge(groups::router())
        .merge(activity::router())
}

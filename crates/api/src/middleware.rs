use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use keel_auth::{AuthenticationError, Credential, GroupDirectory, PrincipalResolver, TrustedHeaders};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_EMAIL_HEADER: &str = "x-principal-email";
pub const PRINCIPAL_ROLES_HEADER: &str = "x-principal-roles";
pub const PRINCIPAL_GROUPS_HEADER: &str = "x-principal-groups";

#[derive(Clone)]
pub struct AuthState {
    pub resolver: Arc<PrincipalResolver<Arc<dyn GroupDirectory>>>,
}

/// Resolve the request credential into a `PrincipalContext`.
///
/// A missing credential is not rejected here; a present but invalid one is.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let credential = extract_credential(req.headers()).map_err(unauthorized)?;

    let principal = match state.resolver.resolve(credential, Utc::now()).await {
        Ok(principal) => Some(principal),
        Err(AuthenticationError::MissingCredential) => None,
        Err(err) => {
            tracing::info!(error = %err, "credential rejected");
            return Err(unauthorized(err.to_string()));
        }
    };

    req.extensions_mut().insert(PrincipalContext::new(principal));
    Ok(next.run(req).await)
}

fn unauthorized(message: String) -> Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message)
}

/// Bearer token wins over identity headers; neither yields `Credential::None`.
fn extract_credential(headers: &HeaderMap) -> Result<Credential, String> {
    if let Some(header) = headers.get(AUTHORIZATION) {
        let header = header
            .to_str()
            .map_err(|_| "authorization header is not valid ASCII".to_string())?;
        let token = match header.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => return Err("authorization header must use the Bearer scheme".to_string()),
        };
        if token.is_empty() {
            return Err("bearer token is empty".to_string());
        }
        return Ok(Credential::Bearer(token.to_string()));
    }

    let Some(principal_id) = header_str(headers, PRINCIPAL_ID_HEADER)? else {
        return Ok(Credential::None);
    };

    Ok(Credential::TrustedHeaders(TrustedHeaders {
        principal_id,
        email: header_str(headers, PRINCIPAL_EMAIL_HEADER)?.unwrap_or_default(),
        roles: header_str(headers, PRINCIPAL_ROLES_HEADER)?,
        groups: header_str(headers, PRINCIPAL_GROUPS_HEADER)?,
    }))
}

fn header_str(headers: &HeaderMap, name: &str) -> Result<Option<String>, String> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::to_string)
                .map_err(|_| format!("{name} header is not valid ASCII"))
        })
        .transpose()
}

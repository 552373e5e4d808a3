//! Principal resolution: credential → `Principal`.
//!
//! Embedded group memberships are authoritative. When a credential carries
//! none, the injected `GroupDirectory` is asked by email; any directory failure
//! degrades to "no memberships" so the caller still gets an authenticated,
//! zero-privilege principal rather than an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{GlobalRole, GroupDirectory, GroupId, JwtValidator, Principal, PrincipalId, TokenValidationError};

/// Identity headers set by a trusted reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrustedHeaders {
    pub principal_id: String,
    pub email: String,
    /// Comma-separated global roles.
    pub roles: Option<String>,
    /// Comma-separated group ids.
    pub groups: Option<String>,
}

/// Credential presented by an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Nothing presented.
    None,
    /// Signed bearer token.
    Bearer(String),
    /// Identity asserted by a trusted proxy.
    TrustedHeaders(TrustedHeaders),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("no credential presented")]
    MissingCredential,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenValidationError),

    #[error("invalid identity headers: {0}")]
    InvalidHeaders(String),

    #[error("identity headers are not trusted by this deployment")]
    UntrustedHeaders,
}

/// Builds a `Principal` for every request.
pub struct PrincipalResolver<D> {
    jwt: Arc<dyn JwtValidator>,
    directory: D,
    trust_headers: bool,
}

impl<D> PrincipalResolver<D>
where
    D: GroupDirectory,
{
    pub fn new(jwt: Arc<dyn JwtValidator>, directory: D) -> Self {
        Self {
            jwt,
            directory,
            trust_headers: false,
        }
    }

    /// Accept `Credential::TrustedHeaders` (only behind a proxy that strips
    /// client-supplied identity headers).
    pub fn trusting_headers(mut self, trust: bool) -> Self {
        self.trust_headers = trust;
        self
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Resolve a credential into a principal.
    ///
    /// - `Err(MissingCredential)`: unauthenticated.
    /// - `Ok(principal)` with empty `group_ids`: authenticated, no project access.
    pub async fn resolve(
        &self,
        credential: Credential,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthenticationError> {
        let (principal, embedded) = match credential {
            Credential::None => return Err(AuthenticationError::MissingCredential),
            Credential::Bearer(token) => {
                let claims = self.jwt.validate(&token, now)?;
                let principal = Principal::new(claims.sub, claims.email).with_roles(claims.roles);
                (principal, claims.groups.unwrap_or_default())
            }
            Credential::TrustedHeaders(headers) => {
                if !self.trust_headers {
                    return Err(AuthenticationError::UntrustedHeaders);
                }
                from_headers(headers)?
            }
        };

        if !embedded.is_empty() {
            return Ok(principal.with_groups(embedded));
        }

        let groups = self.lookup_groups(&principal).await;
        Ok(principal.with_groups(groups))
    }

    async fn lookup_groups(&self, principal: &Principal) -> Vec<GroupId> {
        if principal.email.trim().is_empty() {
            return Vec::new();
        }

        match self.directory.groups_for(&principal.email).await {
            Ok(groups) => {
                tracing::debug!(
                    principal_id = %principal.id,
                    group_count = groups.len(),
                    "resolved groups from directory"
                );
                groups
            }
            Err(err) => {
                tracing::warn!(
                    principal_id = %principal.id,
                    error = %err,
                    "group directory lookup failed; continuing with no memberships"
                );
                Vec::new()
            }
        }
    }
}

fn from_headers(headers: TrustedHeaders) -> Result<(Principal, Vec<GroupId>), AuthenticationError> {
    let id: PrincipalId = headers
        .principal_id
        .trim()
        .parse()
        .map_err(|e| AuthenticationError::InvalidHeaders(format!("principal id: {e}")))?;

    let email = headers.email.trim();
    if email.is_empty() {
        return Err(AuthenticationError::InvalidHeaders("email is empty".to_string()));
    }

    let roles = split_list(headers.roles.as_deref()).map(GlobalRole::new);
    let groups = split_list(headers.groups.as_deref()).map(GroupId::new).collect();

    Ok((Principal::new(id, email).with_roles(roles), groups))
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = String> + '_ {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration;
    use jsonwebtoken::{Algorithm, EncodingKey, Header};

    use super::*;
    use crate::{DirectoryError, Hs256JwtValidator, JwtClaims, StaticGroupDirectory};

    const SECRET: &str = "resolver-secret";

    struct DownDirectory;

    #[async_trait]
    impl GroupDirectory for DownDirectory {
        async fn groups_for(&self, _email: &str) -> Result<Vec<GroupId>, DirectoryError> {
            Err(DirectoryError::Status(503))
        }
    }

    fn token(groups: Option<Vec<GroupId>>, roles: Vec<GlobalRole>) -> String {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: PrincipalId::new(),
            email: "grace@example.com".to_string(),
            roles,
            groups,
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(10),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn resolver<D: GroupDirectory>(directory: D) -> PrincipalResolver<D> {
        PrincipalResolver::new(Arc::new(Hs256JwtValidator::new(SECRET)), directory)
    }

    #[tokio::test]
    async fn missing_credential_is_unauthenticated() {
        let r = resolver(StaticGroupDirectory::new());
        let err = r.resolve(Credential::None, Utc::now()).await.unwrap_err();
        assert_eq!(err, AuthenticationError::MissingCredential);
    }

    #[tokio::test]
    async fn embedded_groups_skip_directory() {
        let directory = StaticGroupDirectory::new()
            .with_member("grace@example.com", [GroupId::new("from-directory")]);
        let r = resolver(directory);

        let principal = r
            .resolve(
                Credential::Bearer(token(Some(vec![GroupId::new("eng")]), vec![])),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(principal.group_ids, vec![GroupId::new("eng")]);
        assert_eq!(r.directory().lookup_count(), 0);
    }

    #[tokio::test]
    async fn absent_groups_fall_back_to_directory() {
        let directory = StaticGroupDirectory::new()
            .with_member("Grace@Example.com", [GroupId::new("design")]);
        let r = resolver(directory);

        let principal = r
            .resolve(Credential::Bearer(token(None, vec![])), Utc::now())
            .await
            .unwrap();

        assert_eq!(principal.group_ids, vec![GroupId::new("design")]);
        assert_eq!(r.directory().lookup_count(), 1);
    }

    #[tokio::test]
    async fn directory_failure_yields_zero_privilege_principal() {
        let r = resolver(DownDirectory);

        let principal = r
            .resolve(Credential::Bearer(token(None, vec![])), Utc::now())
            .await
            .unwrap();

        assert!(principal.group_ids.is_empty());
        assert!(!principal.is_admin());
    }

    #[tokio::test]
    async fn bad_token_is_rejected_not_downgraded() {
        let r = resolver(StaticGroupDirectory::new());
        let err = r
            .resolve(Credential::Bearer("junk".to_string()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn admin_role_carried_from_claims() {
        let r = resolver(StaticGroupDirectory::new());
        let principal = r
            .resolve(Credential::Bearer(token(None, vec![GlobalRole::ADMIN])), Utc::now())
            .await
            .unwrap();
        assert!(principal.is_admin());
    }

    #[tokio::test]
    async fn trusted_headers_require_opt_in() {
        let headers = TrustedHeaders {
            principal_id: PrincipalId::new().to_string(),
            email: "lin@example.com".to_string(),
            roles: Some("admin".to_string()),
            groups: Some("ops, eng ,".to_string()),
        };

        let strict = resolver(StaticGroupDirectory::new());
        let err = strict
            .resolve(Credential::TrustedHeaders(headers.clone()), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::UntrustedHeaders);

        let trusting = resolver(StaticGroupDirectory::new()).trusting_headers(true);
        let principal = trusting
            .resolve(Credential::TrustedHeaders(headers), Utc::now())
            .await
            .unwrap();
        assert!(principal.is_admin());
        assert_eq!(principal.group_ids, vec![GroupId::new("ops"), GroupId::new("eng")]);
    }

    #[tokio::test]
    async fn malformed_principal_header_is_rejected() {
        let r = resolver(StaticGroupDirectory::new()).trusting_headers(true);
        let err = r
            .resolve(
                Credential::TrustedHeaders(TrustedHeaders {
                    principal_id: "nope".to_string(),
                    email: "x@example.com".to_string(),
                    ..Default::default()
                }),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidHeaders(_)));
    }
}

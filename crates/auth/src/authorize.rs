use serde::Serialize;
use thiserror::Error;

use keel_core::{DomainError, ProjectId};

use crate::{
    GrantStore, GrantStoreError, GroupId, Permission, PermissionPolicy, Principal, PrincipalId,
    Requirement, Role, RoleResolver,
};

/// Granted access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Access {
    /// Effective project role. `None` only for permissions that do not
    /// consult grants (`project.read`).
    pub role: Option<Role>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No principal at all.
    Unauthenticated,
    /// Authenticated, but no grant on the project.
    NoGrant,
    /// Authenticated with a grant below the required role.
    InsufficientRole,
}

/// Refused access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub kind: DenialKind,
    pub reason: String,
}

impl Denial {
    /// HTTP status equivalent: 401 for unauthenticated, 403 otherwise.
    pub fn status(&self) -> u16 {
        match self.kind {
            DenialKind::Unauthenticated => 401,
            DenialKind::NoGrant | DenialKind::InsufficientRole => 403,
        }
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow(Access),
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    /// Collapse into a `Result` for callers that short-circuit on denial.
    pub fn into_result(self) -> Result<Access, AuthzError> {
        match self {
            Decision::Allow(access) => Ok(access),
            Decision::Deny(denial) => Err(denial.into()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl From<Denial> for AuthzError {
    fn from(value: Denial) -> Self {
        match value.kind {
            DenialKind::Unauthenticated => AuthzError::Unauthenticated,
            DenialKind::NoGrant | DenialKind::InsufficientRole => AuthzError::Forbidden(value.reason),
        }
    }
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Unauthenticated => DomainError::Unauthenticated,
            AuthzError::Forbidden(msg) => DomainError::Forbidden(msg),
        }
    }
}

/// Project permission gate.
///
/// Decision order:
/// 1. no principal → deny (unauthenticated)
/// 2. global admin → allow as owner
/// 3. requirement `Authenticated` (`project.read`) → allow, no grant lookup
/// 4. no effective role → deny (forbidden)
/// 5. effective role checked against the policy table
///
/// The only IO is the grant lookup; store errors propagate and never turn
/// into an allow.
#[derive(Debug, Clone)]
pub struct PermissionGate<S> {
    roles: RoleResolver<S>,
    policy: PermissionPolicy,
}

impl<S> PermissionGate<S>
where
    S: GrantStore,
{
    pub fn new(store: S) -> Self {
        Self::with_policy(store, PermissionPolicy::default())
    }

    pub fn with_policy(store: S, policy: PermissionPolicy) -> Self {
        Self {
            roles: RoleResolver::new(store),
            policy,
        }
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    pub fn roles(&self) -> &RoleResolver<S> {
        &self.roles
    }

    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
        permission: Permission,
    ) -> Result<Decision, GrantStoreError> {
        let Some(principal) = principal else {
            return Ok(deny(DenialKind::Unauthenticated, "not logged in"));
        };

        if principal.is_admin() {
            return Ok(Decision::Allow(Access {
                role: Some(Role::Owner),
                is_admin: true,
            }));
        }

        let requirement = self.policy.requirement(permission);
        if requirement == Requirement::Authenticated {
            return Ok(Decision::Allow(Access {
                role: None,
                is_admin: false,
            }));
        }

        let role = self.roles.resolve_role(project_id, &principal.group_ids).await?;
        let decision = decide(permission, requirement, role);

        match &decision {
            Decision::Allow(access) => tracing::debug!(
                principal_id = %principal.id,
                project_id = %project_id,
                permission = %permission,
                role = ?access.role,
                "access granted"
            ),
            Decision::Deny(denial) => tracing::info!(
                principal_id = %principal.id,
                project_id = %project_id,
                permission = %permission,
                reason = %denial.reason,
                "access denied"
            ),
        }

        Ok(decision)
    }

    /// Explain why a permission check would pass or fail.
    ///
    /// Unlike `authorize`, this always resolves the effective role so the
    /// explanation can show it.
    pub async fn explain(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
        permission: Permission,
    ) -> Result<AuthorizationExplanation, GrantStoreError> {
        let requirement = self.policy.requirement(permission);

        let state = match principal {
            Some(p) => Some(PrincipalState {
                principal_id: p.id,
                roles: p.roles.iter().map(|r| r.as_str().to_string()).collect(),
                group_ids: p.group_ids.clone(),
                effective_role: self.roles.resolve_role(project_id, &p.group_ids).await?,
                is_admin: p.is_admin(),
            }),
            None => None,
        };

        let decision = self.authorize(principal, project_id, permission).await?;

        let (granted, reason, denial_reason) = match &decision {
            Decision::Allow(access) if access.is_admin => {
                (true, "principal is a global admin".to_string(), None)
            }
            Decision::Allow(_) if requirement == Requirement::Authenticated => (
                true,
                format!("'{permission}' is open to every authenticated principal"),
                None,
            ),
            Decision::Allow(access) => (
                true,
                format!(
                    "effective role '{}' satisfies '{permission}'",
                    access.role.map(|r| r.as_str()).unwrap_or("none")
                ),
                None,
            ),
            Decision::Deny(denial) => (
                false,
                denial.reason.clone(),
                Some(DenialReason {
                    kind: denial.kind,
                    message: denial.reason.clone(),
                    suggestions: suggestions(denial.kind, permission, requirement),
                }),
            ),
        };

        Ok(AuthorizationExplanation {
            project_id,
            required_permission: permission,
            requirement,
            granted,
            reason,
            principal: state,
            denial_reason,
        })
    }
}

fn deny(kind: DenialKind, reason: impl Into<String>) -> Decision {
    Decision::Deny(Denial {
        kind,
        reason: reason.into(),
    })
}

fn decide(permission: Permission, requirement: Requirement, role: Option<Role>) -> Decision {
    let Some(role) = role else {
        return deny(DenialKind::NoGrant, "forbidden: no grant on this project");
    };

    if requirement.is_satisfied_by(role) {
        Decision::Allow(Access {
            role: Some(role),
            is_admin: false,
        })
    } else {
        deny(
            DenialKind::InsufficientRole,
            format!("forbidden: role '{role}' does not grant '{permission}'"),
        )
    }
}

fn suggestions(kind: DenialKind, permission: Permission, requirement: Requirement) -> Vec<String> {
    match (kind, requirement) {
        (DenialKind::Unauthenticated, _) => vec!["Sign in and retry with a valid credential".to_string()],
        (_, Requirement::AtLeast(min)) => vec![
            format!("Ask a project owner to grant one of your groups at least '{min}'"),
            format!("'{permission}' requires role '{min}' or higher"),
        ],
        (_, Requirement::Authenticated) => Vec::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub project_id: ProjectId,

    /// The permission that was being checked.
    pub required_permission: Permission,

    /// What the policy table demands for it.
    pub requirement: Requirement,

    /// Whether the authorization was granted.
    pub granted: bool,

    /// Human-readable reason for the decision.
    pub reason: String,

    /// `None` when no principal was presented.
    pub principal: Option<PrincipalState>,

    /// If denied, this explains what was missing.
    pub denial_reason: Option<DenialReason>,
}

/// State of the principal being checked.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub principal_id: PrincipalId,
    pub roles: Vec<String>,
    pub group_ids: Vec<GroupId>,
    pub effective_role: Option<Role>,
    pub is_admin: bool,
}

/// Detailed reason why authorization was denied.
#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::testing::FixedGrants;
    use crate::{GlobalRole, GroupId};

    fn member(groups: &[&str]) -> Principal {
        Principal::new(PrincipalId::new(), "member@example.com")
            .with_groups(groups.iter().map(|g| GroupId::new(*g)))
    }

    fn admin() -> Principal {
        Principal::new(PrincipalId::new(), "root@example.com").with_roles([GlobalRole::ADMIN])
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    async fn allowed(
        gate: &PermissionGate<FixedGrants>,
        principal: Principal,
        project: ProjectId,
        permission: Permission,
    ) -> bool {
        gate.authorize(Some(&principal), project, permission)
            .await
            .unwrap()
            .is_allowed()
    }

    fn permission_strategy() -> impl Strategy<Value = Permission> {
        prop::sample::select(Permission::ALL.to_vec())
    }

    #[tokio::test]
    async fn missing_principal_is_unauthenticated() {
        let gate = PermissionGate::new(FixedGrants::new());
        let decision = gate
            .authorize(None, ProjectId::new(), Permission::ProjectRead)
            .await
            .unwrap();

        let Decision::Deny(denial) = decision else {
            panic!("expected deny");
        };
        assert_eq!(denial.kind, DenialKind::Unauthenticated);
        assert_eq!(denial.status(), 401);
    }

    #[tokio::test]
    async fn no_grant_milestones_manage_is_forbidden_without_writes() {
        let store = FixedGrants::new();
        let gate = PermissionGate::new(store);
        let principal = member(&["nobody"]);

        let decision = gate
            .authorize(Some(&principal), ProjectId::new(), Permission::MilestonesManage)
            .await
            .unwrap();

        let Decision::Deny(denial) = decision else {
            panic!("expected deny");
        };
        assert_eq!(denial.status(), 403);
        assert_eq!(denial.kind, DenialKind::NoGrant);
    }

    #[tokio::test]
    async fn read_does_not_consult_grants() {
        let gate = PermissionGate::new(FixedGrants::new());
        let principal = member(&["anyone"]);

        let decision = gate
            .authorize(Some(&principal), ProjectId::new(), Permission::ProjectRead)
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Allow(Access {
                role: None,
                is_admin: false
            })
        );
        assert_eq!(gate.roles().store().query_count(), 0);
    }

    #[tokio::test]
    async fn role_table_is_applied() {
        let project = ProjectId::new();
        let store = FixedGrants::new()
            .with(project, "contrib", Role::Contributor)
            .with(project, "mgmt", Role::Manager);
        let gate = PermissionGate::new(store);

        let contributor = member(&["contrib"]);
        let manager = member(&["mgmt"]);

        let check = |p: &Principal, perm: Permission| allowed(&gate, p.clone(), project, perm);

        assert!(check(&contributor, Permission::MilestonesManage).await);
        assert!(!check(&contributor, Permission::LinksManage).await);
        assert!(!check(&contributor, Permission::ProjectUpdate).await);

        assert!(check(&manager, Permission::ProjectUpdate).await);
        assert!(check(&manager, Permission::LinksManage).await);
        assert!(!check(&manager, Permission::ProjectArchive).await);
        assert!(!check(&manager, Permission::GroupsManage).await);
    }

    #[tokio::test]
    async fn insufficient_role_names_the_role() {
        let project = ProjectId::new();
        let gate = PermissionGate::new(FixedGrants::new().with(project, "readers", Role::Viewer));

        let decision = gate
            .authorize(Some(&member(&["readers"])), project, Permission::ProjectUpdate)
            .await
            .unwrap();

        let Decision::Deny(denial) = decision else {
            panic!("expected deny");
        };
        assert_eq!(denial.kind, DenialKind::InsufficientRole);
        assert!(denial.reason.contains("viewer"));
        assert!(matches!(
            Decision::Deny(denial).into_result(),
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn explain_reports_effective_role_and_suggestion() {
        let project = ProjectId::new();
        let gate = PermissionGate::new(FixedGrants::new().with(project, "mgmt", Role::Manager));

        let explanation = gate
            .explain(Some(&member(&["mgmt"])), project, Permission::GroupsManage)
            .await
            .unwrap();

        assert!(!explanation.granted);
        let state = explanation.principal.unwrap();
        assert_eq!(state.effective_role, Some(Role::Manager));
        let denial = explanation.denial_reason.unwrap();
        assert_eq!(denial.kind, DenialKind::InsufficientRole);
        assert!(denial.suggestions.iter().any(|s| s.contains("owner")));
    }

    proptest! {
        #[test]
        fn admin_is_allowed_everything(permission in permission_strategy()) {
            let gate = PermissionGate::new(FixedGrants::new());
            let decision = block_on(gate.authorize(Some(&admin()), ProjectId::new(), permission)).unwrap();
            prop_assert_eq!(decision, Decision::Allow(Access { role: Some(Role::Owner), is_admin: true }));
        }

        #[test]
        fn no_grant_denies_everything_but_read(permission in permission_strategy()) {
            let gate = PermissionGate::new(FixedGrants::new().with(ProjectId::new(), "elsewhere", Role::Owner));
            let principal = member(&["elsewhere"]);
            let decision = block_on(gate.authorize(Some(&principal), ProjectId::new(), permission)).unwrap();

            if permission == Permission::ProjectRead {
                prop_assert!(decision.is_allowed());
            } else {
                let Decision::Deny(denial) = decision else {
                    return Err(TestCaseError::fail("expected deny"));
                };
                prop_assert_eq!(denial.status(), 403);
            }
        }
    }
}

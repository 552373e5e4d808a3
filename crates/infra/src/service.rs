//! Project access orchestration.
//!
//! Every operation runs the same pipeline:
//!
//! ```text
//! authenticate -> project exists? -> authorize -> mutate -> record activity
//! ```
//!
//! ## Audit writes
//!
//! The activity event is written after the mutation has committed. A failed
//! audit write does not undo the mutation; it is logged at `error` and surfaced
//! to the caller as `Audit::Failed` alongside the committed result.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use keel_activity::{
    ActivityEvent, ActivityKind, ActivityLog, ActivityLogError, ActivityPage, ActivityRecorder, InMemoryActivityLog,
    NewActivity, Page,
};
use keel_auth::{
    Access, AuthorizationExplanation, AuthzError, Grant, GrantStore, GrantStoreError, GroupId, NewGrant, Permission,
    PermissionGate, PermissionPolicy, Principal, Role, RoleChange,
};
use keel_core::{DomainError, ProjectId};

use crate::activity_log::PostgresActivityLog;
use crate::grant_store::{InMemoryGrantStore, PostgresGrantStore};
use crate::projects::{
    InMemoryProjectStore, PostgresProjectStore, Project, ProjectPatch, ProjectStore, ProjectStoreError,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// No principal on the request.
    #[error("unauthenticated")]
    Unauthenticated,
    /// Authenticated, but the effective role does not allow the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Unknown project or grant.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    /// Last-owner rule.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Duplicate grant or project.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Storage failed; nothing was decided about access.
    #[error("store error: {0}")]
    Store(String),
}

impl From<DomainError> for AccessError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => AccessError::Validation(msg),
            DomainError::InvariantViolation(msg) => AccessError::InvariantViolation(msg),
            DomainError::NotFound(msg) => AccessError::NotFound(msg),
            DomainError::Conflict(msg) => AccessError::Conflict(msg),
            DomainError::Unauthenticated => AccessError::Unauthenticated,
            DomainError::Forbidden(msg) => AccessError::Forbidden(msg),
        }
    }
}

impl From<AuthzError> for AccessError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Unauthenticated => AccessError::Unauthenticated,
            AuthzError::Forbidden(msg) => AccessError::Forbidden(msg),
        }
    }
}

impl From<GrantStoreError> for AccessError {
    fn from(value: GrantStoreError) -> Self {
        let msg = value.to_string();
        match value {
            GrantStoreError::NotFound { .. } => AccessError::NotFound(msg),
            GrantStoreError::Duplicate { .. } => AccessError::Conflict(msg),
            GrantStoreError::LastOwner { .. } => AccessError::InvariantViolation(msg),
            GrantStoreError::Backend(_) => AccessError::Store(msg),
        }
    }
}

impl From<ProjectStoreError> for AccessError {
    fn from(value: ProjectStoreError) -> Self {
        let msg = value.to_string();
        match value {
            ProjectStoreError::Grant(err) => err.into(),
            ProjectStoreError::NotFound(_) => AccessError::NotFound(msg),
            ProjectStoreError::Duplicate(_) | ProjectStoreError::Concurrency { .. } => AccessError::Conflict(msg),
            ProjectStoreError::Backend(_) => AccessError::Store(msg),
        }
    }
}

impl From<ActivityLogError> for AccessError {
    fn from(value: ActivityLogError) -> Self {
        AccessError::Store(value.to_string())
    }
}

/// Outcome of the audit write that follows a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Audit {
    Recorded(ActivityEvent),
    /// Nothing changed, so nothing was recorded.
    Skipped,
    /// The mutation committed but its event could not be written.
    Failed(String),
}

impl Audit {
    pub fn event(&self) -> Option<&ActivityEvent> {
        match self {
            Audit::Recorded(event) => Some(event),
            _ => None,
        }
    }
}

/// A committed mutation together with its audit outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T> {
    pub value: T,
    pub audit: Audit,
}

/// Input for `create_project`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub name: String,
    pub description: String,
    /// Group that receives the initial `owner` grant.
    pub owner_group: GroupId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedProject {
    pub project: Project,
    pub owner_grant: Grant,
}

pub struct ProjectAccessService<G, P, L> {
    gate: PermissionGate<G>,
    projects: P,
    recorder: ActivityRecorder<L>,
}

/// Service over trait objects, as wired by the HTTP binary.
pub type SharedProjectAccessService =
    ProjectAccessService<Arc<dyn GrantStore>, Arc<dyn ProjectStore>, Arc<dyn ActivityLog>>;

impl SharedProjectAccessService {
    /// Process-local stores for tests and development.
    pub fn in_memory() -> Self {
        let table = Arc::new(InMemoryGrantStore::new());
        let grants: Arc<dyn GrantStore> = table.clone();
        let projects: Arc<dyn ProjectStore> = Arc::new(InMemoryProjectStore::new(table));
        let log: Arc<dyn ActivityLog> = Arc::new(InMemoryActivityLog::new());
        Self::new(grants, projects, log)
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let grants: Arc<dyn GrantStore> = Arc::new(PostgresGrantStore::new(pool.clone()));
        let projects: Arc<dyn ProjectStore> = Arc::new(PostgresProjectStore::new(pool.clone()));
        let log: Arc<dyn ActivityLog> = Arc::new(PostgresActivityLog::new(pool));
        Self::new(grants, projects, log)
    }
}

impl<G, P, L> ProjectAccessService<G, P, L>
where
    G: GrantStore,
    P: ProjectStore,
    L: ActivityLog,
{
    pub fn new(grants: G, projects: P, log: L) -> Self {
        Self::with_policy(grants, projects, log, PermissionPolicy::default())
    }

    pub fn with_policy(grants: G, projects: P, log: L, policy: PermissionPolicy) -> Self {
        Self {
            gate: PermissionGate::with_policy(grants, policy),
            projects,
            recorder: ActivityRecorder::new(log),
        }
    }

    pub fn gate(&self) -> &PermissionGate<G> {
        &self.gate
    }

    pub fn projects(&self) -> &P {
        &self.projects
    }

    pub fn log(&self) -> &L {
        self.recorder.log()
    }

    fn grants(&self) -> &G {
        self.gate.roles().store()
    }

    pub async fn create_project(
        &self,
        principal: Option<&Principal>,
        input: NewProject,
    ) -> Result<Mutation<CreatedProject>, AccessError> {
        let principal = authenticated(principal)?;

        if !principal.is_admin() && !principal.is_member_of(&input.owner_group) {
            return Err(AccessError::Forbidden(format!(
                "principal is not a member of owner group '{}'",
                input.owner_group
            )));
        }

        let now = Utc::now();
        let project = Project::new(&input.name, &input.description, principal.id, now)?;
        let owner = NewGrant {
            project_id: project.id,
            group_id: input.owner_group.clone(),
            role: Role::Owner,
            actor: principal.id,
            at: now,
        };

        let (project, owner_grant) = self.projects.create(project, owner).await?;

        let audit = self
            .audit(NewActivity {
                project_id: project.id,
                kind: ActivityKind::Created,
                actor_id: principal.id,
                description: format!("Project '{}' created", project.name),
                metadata: json!({
                    "name": project.name,
                    "status": project.status,
                    "owner_group": owner_grant.group_id,
                }),
            })
            .await;

        Ok(Mutation {
            value: CreatedProject { project, owner_grant },
            audit,
        })
    }

    /// Patch a project. Moving into or out of `archived` needs
    /// `project.archive`; anything else needs `project.update`.
    pub async fn update_project(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
        patch: ProjectPatch,
    ) -> Result<Mutation<Project>, AccessError> {
        let principal = authenticated(principal)?;
        let project = self.existing(project_id).await?;

        let permission = if patch.touches_archive(project.status) {
            Permission::ProjectArchive
        } else {
            Permission::ProjectUpdate
        };
        self.authorize(principal, project_id, permission).await?;

        self.apply_patch(principal, project, &patch).await
    }

    pub async fn archive_project(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
    ) -> Result<Mutation<Project>, AccessError> {
        let principal = authenticated(principal)?;
        let project = self.existing(project_id).await?;
        self.authorize(principal, project_id, Permission::ProjectArchive).await?;

        self.apply_patch(principal, project, &ProjectPatch::archive()).await
    }

    pub async fn list_grants(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
    ) -> Result<Vec<Grant>, AccessError> {
        let principal = authenticated(principal)?;
        self.existing(project_id).await?;
        self.authorize(principal, project_id, Permission::ProjectRead).await?;

        Ok(self.grants().list(project_id).await?)
    }

    pub async fn add_group(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
        group_id: GroupId,
        role: Role,
    ) -> Result<Mutation<Grant>, AccessError> {
        let principal = authenticated(principal)?;
        self.existing(project_id).await?;
        self.authorize(principal, project_id, Permission::GroupsManage).await?;

        let grant = self
            .grants()
            .insert(NewGrant {
                project_id,
                group_id,
                role,
                actor: principal.id,
                at: Utc::now(),
            })
            .await?;

        let audit = self
            .audit(NewActivity {
                project_id,
                kind: ActivityKind::GroupAdded,
                actor_id: principal.id,
                description: format!("Group '{}' added as {}", grant.group_id, grant.role),
                metadata: json!({ "group_id": grant.group_id, "role": grant.role }),
            })
            .await;

        Ok(Mutation { value: grant, audit })
    }

    pub async fn change_group_role(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
        group_id: GroupId,
        role: Role,
    ) -> Result<Mutation<RoleChange>, AccessError> {
        let principal = authenticated(principal)?;
        self.existing(project_id).await?;
        self.authorize(principal, project_id, Permission::GroupsManage).await?;

        let change = self
            .grants()
            .change_role(project_id, &group_id, role, principal.id, Utc::now())
            .await?;

        if change.before.role == change.after.role {
            return Ok(Mutation {
                value: change,
                audit: Audit::Skipped,
            });
        }

        let audit = self
            .audit(NewActivity {
                project_id,
                kind: ActivityKind::GroupRoleChanged,
                actor_id: principal.id,
                description: format!(
                    "Group '{}' role changed from {} to {}",
                    group_id, change.before.role, change.after.role
                ),
                metadata: json!({
                    "group_id": group_id,
                    "from": change.before.role,
                    "to": change.after.role,
                }),
            })
            .await;

        Ok(Mutation { value: change, audit })
    }

    pub async fn remove_group(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
        group_id: GroupId,
    ) -> Result<Mutation<Grant>, AccessError> {
        let principal = authenticated(principal)?;
        self.existing(project_id).await?;
        self.authorize(principal, project_id, Permission::GroupsManage).await?;

        let removed = self.grants().remove(project_id, &group_id).await?;

        let audit = self
            .audit(NewActivity {
                project_id,
                kind: ActivityKind::GroupRemoved,
                actor_id: principal.id,
                description: format!("Group '{}' removed (was {})", removed.group_id, removed.role),
                metadata: json!({ "group_id": removed.group_id, "role": removed.role }),
            })
            .await;

        Ok(Mutation { value: removed, audit })
    }

    pub async fn activity(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
        page: Page,
    ) -> Result<ActivityPage, AccessError> {
        let principal = authenticated(principal)?;
        self.existing(project_id).await?;
        self.authorize(principal, project_id, Permission::ProjectRead).await?;

        Ok(self.recorder.log().list(project_id, page).await?)
    }

    /// Explain the decision for `permission` without enforcing it.
    pub async fn check_access(
        &self,
        principal: Option<&Principal>,
        project_id: ProjectId,
        permission: Permission,
    ) -> Result<AuthorizationExplanation, AccessError> {
        let principal = authenticated(principal)?;
        self.existing(project_id).await?;

        Ok(self.gate.explain(Some(principal), project_id, permission).await?)
    }

    async fn existing(&self, project_id: ProjectId) -> Result<Project, AccessError> {
        self.projects
            .get(project_id)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("project {project_id}")))
    }

    async fn authorize(
        &self,
        principal: &Principal,
        project_id: ProjectId,
        permission: Permission,
    ) -> Result<Access, AccessError> {
        let decision = self.gate.authorize(Some(principal), project_id, permission).await?;
        Ok(decision.into_result()?)
    }

    async fn apply_patch(
        &self,
        principal: &Principal,
        project: Project,
        patch: &ProjectPatch,
    ) -> Result<Mutation<Project>, AccessError> {
        let (next, changes) = project.apply(patch, Utc::now())?;
        if changes.is_empty() {
            return Ok(Mutation {
                value: project,
                audit: Audit::Skipped,
            });
        }

        let updated = self.projects.update(next).await?;

        let audit = match self
            .recorder
            .record_update(updated.id, principal.id, "Project", &changes)
            .await
        {
            Ok(Some(event)) => Audit::Recorded(event),
            Ok(None) => Audit::Skipped,
            Err(err) => audit_failed(updated.id, err),
        };

        Ok(Mutation { value: updated, audit })
    }

    async fn audit(&self, activity: NewActivity) -> Audit {
        let project_id = activity.project_id;
        match self.recorder.record(activity).await {
            Ok(event) => Audit::Recorded(event),
            Err(err) => audit_failed(project_id, err),
        }
    }
}

fn authenticated(principal: Option<&Principal>) -> Result<&Principal, AccessError> {
    principal.ok_or(AccessError::Unauthenticated)
}

fn audit_failed(project_id: ProjectId, err: ActivityLogError) -> Audit {
    tracing::error!(project_id = %project_id, error = %err, "activity write failed after committed mutation");
    Audit::Failed(err.to_string())
}

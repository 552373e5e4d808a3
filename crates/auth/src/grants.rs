//! Grant table seam: `(project, group) → role`.
//!
//! Invariants every `GrantStore` implementation must uphold:
//! - at most one grant per `(project_id, group_id)`;
//! - a project keeps at least one `owner` grant. `change_role` and `remove`
//!   must recount owner grants and write in the same atomic step (one
//!   transaction or one lock scope); a check-then-act across two round trips
//!   lets concurrent demotions both pass.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keel_core::ProjectId;

use crate::{GroupId, PrincipalId, Role};

/// A persisted grant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub project_id: ProjectId,
    pub group_id: GroupId,
    pub role: Role,
    pub created_by: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub last_updated_by: PrincipalId,
    pub last_updated_at: DateTime<Utc>,
}

/// Input for creating a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrant {
    pub project_id: ProjectId,
    pub group_id: GroupId,
    pub role: Role,
    pub actor: PrincipalId,
    pub at: DateTime<Utc>,
}

impl NewGrant {
    pub fn into_grant(self) -> Grant {
        Grant {
            project_id: self.project_id,
            group_id: self.group_id,
            role: self.role,
            created_by: self.actor,
            created_at: self.at,
            last_updated_by: self.actor,
            last_updated_at: self.at,
        }
    }
}

/// Before/after pair returned by a role change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChange {
    pub before: Grant,
    pub after: Grant,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrantStoreError {
    #[error("group '{group_id}' has no grant on project {project_id}")]
    NotFound {
        project_id: ProjectId,
        group_id: GroupId,
    },

    #[error("group '{group_id}' already has a grant on project {project_id}")]
    Duplicate {
        project_id: ProjectId,
        group_id: GroupId,
    },

    #[error(
        "group '{group_id}' holds the last owner grant on project {project_id}; \
         grant owner to another group before removing or demoting it"
    )]
    LastOwner {
        project_id: ProjectId,
        group_id: GroupId,
    },

    #[error("grant store backend error: {0}")]
    Backend(String),
}

/// Last-owner rule, shared by every store.
///
/// `owner_count` is the number of owner grants on the project *before* the
/// change; `current` is the role of the grant being changed and `next` its new
/// role (`None` when the grant is removed).
pub fn ensure_owner_retained(
    project_id: ProjectId,
    group_id: &GroupId,
    owner_count: usize,
    current: Role,
    next: Option<Role>,
) -> Result<(), GrantStoreError> {
    let loses_owner = current == Role::Owner && next != Some(Role::Owner);
    if loses_owner && owner_count <= 1 {
        return Err(GrantStoreError::LastOwner {
            project_id,
            group_id: group_id.clone(),
        });
    }
    Ok(())
}

/// Authoritative grant table.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Grants on `project_id` whose group is in `group_ids`.
    async fn grants_for_groups(
        &self,
        project_id: ProjectId,
        group_ids: &[GroupId],
    ) -> Result<Vec<Grant>, GrantStoreError>;

    /// All grants on a project, ordered by group id.
    async fn list(&self, project_id: ProjectId) -> Result<Vec<Grant>, GrantStoreError>;

    /// Create a grant; `Duplicate` if the pair already exists.
    async fn insert(&self, grant: NewGrant) -> Result<Grant, GrantStoreError>;

    /// Change a grant's role, enforcing the last-owner rule atomically.
    ///
    /// Changing to the role the grant already has writes nothing; the stored
    /// grant comes back as both `before` and `after`.
    async fn change_role(
        &self,
        project_id: ProjectId,
        group_id: &GroupId,
        role: Role,
        actor: PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<RoleChange, GrantStoreError>;

    /// Delete a grant, enforcing the last-owner rule atomically.
    async fn remove(&self, project_id: ProjectId, group_id: &GroupId) -> Result<Grant, GrantStoreError>;
}

#[async_trait]
impl<S> GrantStore for Arc<S>
where
    S: GrantStore + ?Sized,
{
    async fn grants_for_groups(
        &self,
        project_id: ProjectId,
        group_ids: &[GroupId],
    ) -> Result<Vec<Grant>, GrantStoreError> {
        (**self).grants_for_groups(project_id, group_ids).await
    }

    async fn list(&self, project_id: ProjectId) -> Result<Vec<Grant>, GrantStoreError> {
        (**self).list(project_id).await
    }

    async fn insert(&self, grant: NewGrant) -> Result<Grant, GrantStoreError> {
        (**self).insert(grant).await
    }

    async fn change_role(
        &self,
        project_id: ProjectId,
        group_id: &GroupId,
        role: Role,
        actor: PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<RoleChange, GrantStoreError> {
        (**self).change_role(project_id, group_id, role, actor, at).await
    }

    async fn remove(&self, project_id: ProjectId, group_id: &GroupId) -> Result<Grant, GrantStoreError> {
        (**self).remove(project_id, group_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(owner_count: usize, current: Role, next: Option<Role>) -> bool {
        ensure_owner_retained(ProjectId::new(), &GroupId::new("g"), owner_count, current, next).is_ok()
    }

    #[test]
    fn sole_owner_cannot_be_removed_or_demoted() {
        assert!(!check(1, Role::Owner, None));
        assert!(!check(1, Role::Owner, Some(Role::Manager)));
    }

    #[test]
    fn one_of_two_owners_can_go() {
        assert!(check(2, Role::Owner, None));
        assert!(check(2, Role::Owner, Some(Role::Viewer)));
    }

    #[test]
    fn non_owner_changes_are_unconstrained() {
        assert!(check(1, Role::Manager, None));
        assert!(check(1, Role::Viewer, Some(Role::Contributor)));
        assert!(check(1, Role::Owner, Some(Role::Owner)));
    }

    #[test]
    fn last_owner_message_is_actionable() {
        let err = ensure_owner_retained(ProjectId::new(), &GroupId::new("core-team"), 1, Role::Owner, None)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("core-team"));
        assert!(msg.contains("grant owner to another group"));
    }
}

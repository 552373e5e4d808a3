//! In-memory grant store for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keel_auth::{
    Grant, GrantStore, GrantStoreError, GroupId, NewGrant, PrincipalId, Role, RoleChange, ensure_owner_retained,
};
use keel_core::ProjectId;

type ProjectGrants = BTreeMap<GroupId, Grant>;

/// In-memory grant table.
///
/// Every write (including the last-owner recount) happens under a single
/// write-lock scope, so concurrent demotions are serialized.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    grants: RwLock<HashMap<ProjectId, ProjectGrants>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous insert, shared with the in-memory project store so that a
    /// project and its first owner grant land together.
    pub(crate) fn insert_now(&self, grant: NewGrant) -> Result<Grant, GrantStoreError> {
        let mut all = self.write()?;
        let project = all.entry(grant.project_id).or_default();

        if project.contains_key(&grant.group_id) {
            return Err(GrantStoreError::Duplicate {
                project_id: grant.project_id,
                group_id: grant.group_id,
            });
        }

        let grant = grant.into_grant();
        project.insert(grant.group_id.clone(), grant.clone());
        Ok(grant)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ProjectId, ProjectGrants>>, GrantStoreError> {
        self.grants
            .read()
            .map_err(|_| GrantStoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ProjectId, ProjectGrants>>, GrantStoreError> {
        self.grants
            .write()
            .map_err(|_| GrantStoreError::Backend("lock poisoned".to_string()))
    }
}

fn owner_count(project: &ProjectGrants) -> usize {
    project.values().filter(|g| g.role == Role::Owner).count()
}

fn not_found(project_id: ProjectId, group_id: &GroupId) -> GrantStoreError {
    GrantStoreError::NotFound {
        project_id,
        group_id: group_id.clone(),
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn grants_for_groups(
        &self,
        project_id: ProjectId,
        group_ids: &[GroupId],
    ) -> Result<Vec<Grant>, GrantStoreError> {
        let all = self.read()?;
        let Some(project) = all.get(&project_id) else {
            return Ok(Vec::new());
        };

        Ok(group_ids
            .iter()
            .filter_map(|group_id| project.get(group_id).cloned())
            .collect())
    }

    async fn list(&self, project_id: ProjectId) -> Result<Vec<Grant>, GrantStoreError> {
        let all = self.read()?;
        Ok(all
            .get(&project_id)
            .map(|project| project.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, grant: NewGrant) -> Result<Grant, GrantStoreError> {
        self.insert_now(grant)
    }

    async fn change_role(
        &self,
        project_id: ProjectId,
        group_id: &GroupId,
        role: Role,
        actor: PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<RoleChange, GrantStoreError> {
        let mut all = self.write()?;
        let project = all
            .get_mut(&project_id)
            .ok_or_else(|| not_found(project_id, group_id))?;

        let owners = owner_count(project);
        let grant = project
            .get_mut(group_id)
            .ok_or_else(|| not_found(project_id, group_id))?;

        if grant.role == role {
            return Ok(RoleChange {
                before: grant.clone(),
                after: grant.clone(),
            });
        }
        ensure_owner_retained(project_id, group_id, owners, grant.role, Some(role))?;

        let before = grant.clone();
        grant.role = role;
        grant.last_updated_by = actor;
        grant.last_updated_at = at;

        Ok(RoleChange {
            before,
            after: grant.clone(),
        })
    }

    async fn remove(&self, project_id: ProjectId, group_id: &GroupId) -> Result<Grant, GrantStoreError> {
        let mut all = self.write()?;
        let project = all
            .get_mut(&project_id)
            .ok_or_else(|| not_found(project_id, group_id))?;

        let current = project
            .get(group_id)
            .map(|g| g.role)
            .ok_or_else(|| not_found(project_id, group_id))?;
        ensure_owner_retained(project_id, group_id, owner_count(project), current, None)?;

        project
            .remove(group_id)
            .ok_or_else(|| not_found(project_id, group_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn new_grant(project_id: ProjectId, group: &str, role: Role) -> NewGrant {
        NewGrant {
            project_id,
            group_id: GroupId::new(group),
            role,
            actor: PrincipalId::new(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_pair_is_rejected() {
        let store = InMemoryGrantStore::new();
        let project = ProjectId::new();
        store.insert(new_grant(project, "a", Role::Owner)).await.unwrap();

        let err = store.insert(new_grant(project, "a", Role::Viewer)).await.unwrap_err();
        assert!(matches!(err, GrantStoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn lookup_only_returns_requested_groups() {
        let store = InMemoryGrantStore::new();
        let project = ProjectId::new();
        store.insert(new_grant(project, "a", Role::Owner)).await.unwrap();
        store.insert(new_grant(project, "b", Role::Viewer)).await.unwrap();
        store.insert(new_grant(ProjectId::new(), "c", Role::Owner)).await.unwrap();

        let grants = store
            .grants_for_groups(project, &[GroupId::new("b"), GroupId::new("c")])
            .await
            .unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].role, Role::Viewer);

        let listed = store.list(project).await.unwrap();
        let groups: Vec<&str> = listed.iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(groups, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn sole_owner_is_protected() {
        let store = InMemoryGrantStore::new();
        let project = ProjectId::new();
        let a = GroupId::new("a");
        store.insert(new_grant(project, "a", Role::Owner)).await.unwrap();

        let err = store.remove(project, &a).await.unwrap_err();
        assert!(matches!(err, GrantStoreError::LastOwner { .. }));

        let err = store
            .change_role(project, &a, Role::Manager, PrincipalId::new(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, GrantStoreError::LastOwner { .. }));
        assert_eq!(store.list(project).await.unwrap()[0].role, Role::Owner);
    }

    #[tokio::test]
    async fn one_of_two_owners_can_be_demoted_or_removed() {
        let store = InMemoryGrantStore::new();
        let project = ProjectId::new();
        store.insert(new_grant(project, "a", Role::Owner)).await.unwrap();
        store.insert(new_grant(project, "b", Role::Owner)).await.unwrap();

        let actor = PrincipalId::new();
        let change = store
            .change_role(project, &GroupId::new("a"), Role::Manager, actor, Utc::now())
            .await
            .unwrap();
        assert_eq!(change.before.role, Role::Owner);
        assert_eq!(change.after.role, Role::Manager);
        assert_eq!(change.after.last_updated_by, actor);

        let err = store.remove(project, &GroupId::new("b")).await.unwrap_err();
        assert!(matches!(err, GrantStoreError::LastOwner { .. }));

        store.remove(project, &GroupId::new("a")).await.unwrap();
        assert_eq!(store.list(project).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_role_change_leaves_grant_untouched() {
        let store = InMemoryGrantStore::new();
        let project = ProjectId::new();
        let original = store.insert(new_grant(project, "a", Role::Owner)).await.unwrap();

        let change = store
            .change_role(project, &GroupId::new("a"), Role::Owner, PrincipalId::new(), Utc::now())
            .await
            .unwrap();

        assert_eq!(change.before, original);
        assert_eq!(change.after, original);
        assert_eq!(store.list(project).await.unwrap(), vec![original]);
    }

    #[tokio::test]
    async fn missing_grant_is_not_found() {
        let store = InMemoryGrantStore::new();
        let err = store.remove(ProjectId::new(), &GroupId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, GrantStoreError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_demotions_keep_one_owner() {
        let store = Arc::new(InMemoryGrantStore::new());
        let project = ProjectId::new();
        store.insert(new_grant(project, "a", Role::Owner)).await.unwrap();
        store.insert(new_grant(project, "b", Role::Owner)).await.unwrap();

        let tasks: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|group| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .change_role(project, &GroupId::new(group), Role::Viewer, PrincipalId::new(), Utc::now())
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                ok += 1;
            }
        }

        assert_eq!(ok, 1);
        let owners = store
            .list(project)
            .await
            .unwrap()
            .into_iter()
            .filter(|g| g.role == Role::Owner)
            .count();
        assert_eq!(owners, 1);
    }
}

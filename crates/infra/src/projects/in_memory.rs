use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use keel_auth::{Grant, NewGrant};
use keel_core::ProjectId;

use super::{Project, ProjectStore, ProjectStoreError};
use crate::grant_store::InMemoryGrantStore;

/// In-memory project table for tests/dev.
///
/// Shares its grant table with the caller so that `create` can write the
/// first owner grant under the same project-table lock.
#[derive(Debug)]
pub struct InMemoryProjectStore {
    projects: RwLock<HashMap<ProjectId, Project>>,
    grants: Arc<InMemoryGrantStore>,
}

impl InMemoryProjectStore {
    pub fn new(grants: Arc<InMemoryGrantStore>) -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            grants,
        }
    }

    pub fn grants(&self) -> &Arc<InMemoryGrantStore> {
        &self.grants
    }
}

fn poisoned() -> ProjectStoreError {
    ProjectStoreError::Backend("lock poisoned".to_string())
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        let projects = self.projects.read().map_err(|_| poisoned())?;
        Ok(projects.get(&id).cloned())
    }

    async fn create(&self, project: Project, owner: NewGrant) -> Result<(Project, Grant), ProjectStoreError> {
        let mut projects = self.projects.write().map_err(|_| poisoned())?;
        if projects.contains_key(&project.id) {
            return Err(ProjectStoreError::Duplicate(project.id));
        }

        let grant = self.grants.insert_now(owner)?;
        projects.insert(project.id, project.clone());
        Ok((project, grant))
    }

    async fn update(&self, project: Project) -> Result<Project, ProjectStoreError> {
        let mut projects = self.projects.write().map_err(|_| poisoned())?;
        let slot = projects
            .get_mut(&project.id)
            .ok_or(ProjectStoreError::NotFound(project.id))?;
        if slot.version != project.version {
            return Err(ProjectStoreError::Concurrency {
                id: project.id,
                expected: project.version,
            });
        }

        let next = Project {
            version: project.version + 1,
            ..project
        };
        *slot = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use keel_auth::{GrantStore, GroupId, PrincipalId, Role};

    use super::*;

    #[tokio::test]
    async fn create_writes_project_and_owner_grant() {
        let grants = Arc::new(InMemoryGrantStore::new());
        let store = InMemoryProjectStore::new(grants.clone());
        let actor = PrincipalId::new();
        let project = Project::new("Apollo", "", actor, Utc::now()).unwrap();

        let (created, grant) = store
            .create(
                project.clone(),
                NewGrant {
                    project_id: project.id,
                    group_id: GroupId::new("core"),
                    role: Role::Owner,
                    actor,
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.get(created.id).await.unwrap(), Some(project));
        assert_eq!(grant.role, Role::Owner);
        assert_eq!(grants.list(created.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_project_is_not_found() {
        let store = InMemoryProjectStore::new(Arc::new(InMemoryGrantStore::new()));
        let project = Project::new("Ghost", "", PrincipalId::new(), Utc::now()).unwrap();

        let err = store.update(project.clone()).await.unwrap_err();
        assert_eq!(err, ProjectStoreError::NotFound(project.id));
    }

    #[tokio::test]
    async fn stale_update_is_rejected() {
        let grants = Arc::new(InMemoryGrantStore::new());
        let store = InMemoryProjectStore::new(grants);
        let actor = PrincipalId::new();
        let project = Project::new("Apollo", "", actor, Utc::now()).unwrap();
        store
            .create(
                project.clone(),
                NewGrant {
                    project_id: project.id,
                    group_id: GroupId::new("core"),
                    role: Role::Owner,
                    actor,
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let renamed = Project {
            name: "Apollo II".into(),
            ..project.clone()
        };
        let stored = store.update(renamed).await.unwrap();
        assert_eq!(stored.version, 1);

        let stale = Project {
            description: "overwrites the rename".into(),
            ..project.clone()
        };
        let err = store.update(stale).await.unwrap_err();
        assert_eq!(
            err,
            ProjectStoreError::Concurrency {
                id: project.id,
                expected: 0
            }
        );
        assert_eq!(store.get(project.id).await.unwrap(), Some(stored));
    }
}

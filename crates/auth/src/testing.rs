//! Test doubles shared by unit tests in this crate.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keel_core::ProjectId;

use crate::{Grant, GrantStore, GrantStoreError, GroupId, NewGrant, PrincipalId, Role, RoleChange};

/// Read-only grant table that counts queries.
#[derive(Debug, Default)]
pub struct FixedGrants {
    grants: Mutex<Vec<Grant>>,
    queries: AtomicUsize,
}

impl FixedGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, project_id: ProjectId, group: &str, role: Role) -> Self {
        let actor = PrincipalId::new();
        if let Ok(mut grants) = self.grants.lock() {
            grants.push(
                NewGrant {
                    project_id,
                    group_id: GroupId::new(group),
                    role,
                    actor,
                    at: Utc::now(),
                }
                .into_grant(),
            );
        }
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GrantStore for FixedGrants {
    async fn grants_for_groups(
        &self,
        project_id: ProjectId,
        group_ids: &[GroupId],
    ) -> Result<Vec<Grant>, GrantStoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let grants = self.grants.lock().map_err(|_| GrantStoreError::Backend("poisoned".into()))?;
        Ok(grants
            .iter()
            .filter(|g| g.project_id == project_id && group_ids.contains(&g.group_id))
            .cloned()
            .collect())
    }

    async fn list(&self, project_id: ProjectId) -> Result<Vec<Grant>, GrantStoreError> {
        let grants = self.grants.lock().map_err(|_| GrantStoreError::Backend("poisoned".into()))?;
        Ok(grants.iter().filter(|g| g.project_id == project_id).cloned().collect())
    }

    async fn insert(&self, _grant: NewGrant) -> Result<Grant, GrantStoreError> {
        Err(GrantStoreError::Backend("read-only".into()))
    }

    async fn change_role(
        &self,
        _project_id: ProjectId,
        _group_id: &GroupId,
        _role: Role,
        _actor: PrincipalId,
        _at: DateTime<Utc>,
    ) -> Result<RoleChange, GrantStoreError> {
        Err(GrantStoreError::Backend("read-only".into()))
    }

    async fn remove(&self, _project_id: ProjectId, _group_id: &GroupId) -> Result<Grant, GrantStoreError> {
        Err(GrantStoreError::Backend("read-only".into()))
    }
}

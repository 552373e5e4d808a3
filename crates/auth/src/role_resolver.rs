//! Effective-role resolution.
//!
//! A principal may reach a project through several groups with different
//! grants. The effective role is the **maximum** of those grants by role
//! precedence (most privilege wins). It is never the first match and never a
//! combination of grants.

use keel_core::ProjectId;

use crate::{Grant, GrantStore, GrantStoreError, GroupId, Role};

/// Max-by-precedence reduction over matched grants.
pub fn effective_role<'a>(grants: impl IntoIterator<Item = &'a Grant>) -> Option<Role> {
    grants.into_iter().map(|g| g.role).max()
}

/// Resolves a principal's effective role on a project from the grant table.
#[derive(Debug, Clone)]
pub struct RoleResolver<S> {
    store: S,
}

impl<S> RoleResolver<S>
where
    S: GrantStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn resolve_role(
        &self,
        project_id: ProjectId,
        group_ids: &[GroupId],
    ) -> Result<Option<Role>, GrantStoreError> {
        if group_ids.is_empty() {
            return Ok(None);
        }

        let grants = self.store.grants_for_groups(project_id, group_ids).await?;
        Ok(effective_role(&grants))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;
    use crate::testing::FixedGrants;
    use crate::{NewGrant, PrincipalId};

    fn role_strategy() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    #[tokio::test]
    async fn empty_groups_short_circuit_without_query() {
        let project = ProjectId::new();
        let resolver = RoleResolver::new(FixedGrants::new().with(project, "a", Role::Owner));

        assert_eq!(resolver.resolve_role(project, &[]).await.unwrap(), None);
        assert_eq!(resolver.store().query_count(), 0);
    }

    #[tokio::test]
    async fn viewer_and_owner_resolve_to_owner() {
        let project = ProjectId::new();
        let store = FixedGrants::new()
            .with(project, "readers", Role::Viewer)
            .with(project, "leads", Role::Owner);
        let resolver = RoleResolver::new(store);

        let groups = [GroupId::new("readers"), GroupId::new("leads")];
        assert_eq!(resolver.resolve_role(project, &groups).await.unwrap(), Some(Role::Owner));
    }

    #[tokio::test]
    async fn grants_on_other_projects_do_not_leak() {
        let project = ProjectId::new();
        let other = ProjectId::new();
        let resolver = RoleResolver::new(FixedGrants::new().with(other, "leads", Role::Owner));

        let groups = [GroupId::new("leads")];
        assert_eq!(resolver.resolve_role(project, &groups).await.unwrap(), None);
    }

    proptest! {
        #[test]
        fn effective_role_is_max_of_grants(roles in prop::collection::vec(role_strategy(), 0..8)) {
            let project = ProjectId::new();
            let actor = PrincipalId::new();
            let grants: Vec<Grant> = roles
                .iter()
                .enumerate()
                .map(|(i, role)| NewGrant {
                    project_id: project,
                    group_id: GroupId::new(format!("g{i}")),
                    role: *role,
                    actor,
                    at: Utc::now(),
                }
                .into_grant())
                .collect();

            let expected = roles.iter().copied().max();
            prop_assert_eq!(effective_role(&grants), expected);

            // Order of grants never changes the answer.
            let reversed: Vec<Grant> = grants.iter().rev().cloned().collect();
            prop_assert_eq!(effective_role(&reversed), expected);
        }
    }
}

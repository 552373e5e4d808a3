//! Postgres-backed grant store (`project_groups` table).
//!
//! ## Last-owner enforcement
//!
//! `change_role` and `remove` run in one transaction that first locks every
//! owner row of the project plus the target row:
//!
//! ```sql
//! SELECT group_id, role FROM project_groups
//! WHERE project_id = $1 AND (role = 'owner' OR group_id = $2)
//! FOR UPDATE
//! ```
//!
//! A concurrent demotion of another owner blocks on the row lock and, once it
//! proceeds, re-evaluates the predicate against the committed row, so it sees
//! the reduced owner count.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use keel_auth::{
    Grant, GrantStore, GrantStoreError, GroupId, NewGrant, PrincipalId, Role, RoleChange, ensure_owner_retained,
};
use keel_core::ProjectId;

use crate::pg::{describe, is_unique_violation};

const GRANT_COLUMNS: &str =
    "project_id, group_id, role, created_by, created_at, last_updated_by, last_updated_at";

#[derive(Debug, Clone)]
pub struct PostgresGrantStore {
    pool: Arc<PgPool>,
}

impl PostgresGrantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> GrantStoreError {
    GrantStoreError::Backend(describe(operation, &err))
}

fn not_found(project_id: ProjectId, group_id: &GroupId) -> GrantStoreError {
    GrantStoreError::NotFound {
        project_id,
        group_id: group_id.clone(),
    }
}

#[async_trait]
impl GrantStore for PostgresGrantStore {
    #[instrument(skip(self, group_ids), fields(project_id = %project_id, groups = group_ids.len()), err)]
    async fn grants_for_groups(
        &self,
        project_id: ProjectId,
        group_ids: &[GroupId],
    ) -> Result<Vec<Grant>, GrantStoreError> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }

        let groups: Vec<String> = group_ids.iter().map(|g| g.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM project_groups WHERE project_id = $1 AND group_id = ANY($2)"
        ))
        .bind(project_id.as_uuid())
        .bind(&groups)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("grants_for_groups", e))?;

        rows.iter().map(grant_from_row).collect()
    }

    #[instrument(skip(self), fields(project_id = %project_id), err)]
    async fn list(&self, project_id: ProjectId) -> Result<Vec<Grant>, GrantStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM project_groups WHERE project_id = $1 ORDER BY group_id ASC"
        ))
        .bind(project_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(grant_from_row).collect()
    }

    #[instrument(skip(self, grant), fields(project_id = %grant.project_id, group_id = %grant.group_id), err)]
    async fn insert(&self, grant: NewGrant) -> Result<Grant, GrantStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert.begin", e))?;
        let grant = insert_grant(&mut tx, grant).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("insert.commit", e))?;
        Ok(grant)
    }

    #[instrument(skip(self, actor, at), fields(project_id = %project_id, group_id = %group_id, role = %role), err)]
    async fn change_role(
        &self,
        project_id: ProjectId,
        group_id: &GroupId,
        role: Role,
        actor: PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<RoleChange, GrantStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("change_role.begin", e))?;

        let locked = lock_owner_rows(&mut tx, project_id, group_id).await?;
        let current = locked.target.ok_or_else(|| not_found(project_id, group_id))?;
        let before = fetch_grant(&mut tx, project_id, group_id).await?;
        if current == role {
            tx.commit().await.map_err(|e| map_sqlx_error("change_role.commit", e))?;
            return Ok(RoleChange {
                after: before.clone(),
                before,
            });
        }
        ensure_owner_retained(project_id, group_id, locked.owner_count, current, Some(role))?;

        let row = sqlx::query(&format!(
            "UPDATE project_groups SET role = $3, last_updated_by = $4, last_updated_at = $5 \
             WHERE project_id = $1 AND group_id = $2 RETURNING {GRANT_COLUMNS}"
        ))
        .bind(project_id.as_uuid())
        .bind(group_id.as_str())
        .bind(role.as_str())
        .bind(actor.as_uuid())
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("change_role.update", e))?;
        let after = grant_from_row(&row)?;

        tx.commit().await.map_err(|e| map_sqlx_error("change_role.commit", e))?;
        Ok(RoleChange { before, after })
    }

    #[instrument(skip(self), fields(project_id = %project_id, group_id = %group_id), err)]
    async fn remove(&self, project_id: ProjectId, group_id: &GroupId) -> Result<Grant, GrantStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("remove.begin", e))?;

        let locked = lock_owner_rows(&mut tx, project_id, group_id).await?;
        let current = locked.target.ok_or_else(|| not_found(project_id, group_id))?;
        ensure_owner_retained(project_id, group_id, locked.owner_count, current, None)?;

        let row = sqlx::query(&format!(
            "DELETE FROM project_groups WHERE project_id = $1 AND group_id = $2 RETURNING {GRANT_COLUMNS}"
        ))
        .bind(project_id.as_uuid())
        .bind(group_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("remove.delete", e))?;
        let removed = grant_from_row(&row)?;

        tx.commit().await.map_err(|e| map_sqlx_error("remove.commit", e))?;
        Ok(removed)
    }
}

/// Insert inside an open transaction; also used by project creation.
pub(crate) async fn insert_grant(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    grant: NewGrant,
) -> Result<Grant, GrantStoreError> {
    let project_id = grant.project_id;
    let group_id = grant.group_id.clone();

    let row = sqlx::query(&format!(
        "INSERT INTO project_groups ({GRANT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $4, $5) RETURNING {GRANT_COLUMNS}"
    ))
    .bind(grant.project_id.as_uuid())
    .bind(grant.group_id.as_str())
    .bind(grant.role.as_str())
    .bind(grant.actor.as_uuid())
    .bind(grant.at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            GrantStoreError::Duplicate { project_id, group_id }
        } else {
            map_sqlx_error("insert", e)
        }
    })?;

    grant_from_row(&row)
}

struct LockedOwners {
    owner_count: usize,
    target: Option<Role>,
}

async fn lock_owner_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    project_id: ProjectId,
    group_id: &GroupId,
) -> Result<LockedOwners, GrantStoreError> {
    let rows = sqlx::query(
        r#"
        SELECT group_id, role
        FROM project_groups
        WHERE project_id = $1 AND (role = 'owner' OR group_id = $2)
        FOR UPDATE
        "#,
    )
    .bind(project_id.as_uuid())
    .bind(group_id.as_str())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_owner_rows", e))?;

    let mut locked = LockedOwners {
        owner_count: 0,
        target: None,
    };
    for row in rows {
        let group: String = row
            .try_get("group_id")
            .map_err(|e| map_sqlx_error("lock_owner_rows.decode", e))?;
        let role = parse_role(
            row.try_get("role")
                .map_err(|e| map_sqlx_error("lock_owner_rows.decode", e))?,
        )?;

        if role == Role::Owner {
            locked.owner_count += 1;
        }
        if group == group_id.as_str() {
            locked.target = Some(role);
        }
    }
    Ok(locked)
}

async fn fetch_grant(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    project_id: ProjectId,
    group_id: &GroupId,
) -> Result<Grant, GrantStoreError> {
    let row = sqlx::query(&format!(
        "SELECT {GRANT_COLUMNS} FROM project_groups WHERE project_id = $1 AND group_id = $2"
    ))
    .bind(project_id.as_uuid())
    .bind(group_id.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_grant", e))?
    .ok_or_else(|| not_found(project_id, group_id))?;

    grant_from_row(&row)
}

fn parse_role(raw: String) -> Result<Role, GrantStoreError> {
    raw.parse::<Role>()
        .map_err(|e| GrantStoreError::Backend(format!("stored role '{raw}' is invalid: {e}")))
}

fn grant_from_row(row: &sqlx::postgres::PgRow) -> Result<Grant, GrantStoreError> {
    let decode = |e| map_sqlx_error("decode_grant", e);

    let project_id: uuid::Uuid = row.try_get("project_id").map_err(decode)?;
    let group_id: String = row.try_get("group_id").map_err(decode)?;
    let role: String = row.try_get("role").map_err(decode)?;
    let created_by: uuid::Uuid = row.try_get("created_by").map_err(decode)?;
    let last_updated_by: uuid::Uuid = row.try_get("last_updated_by").map_err(decode)?;

    Ok(Grant {
        project_id: ProjectId::from_uuid(project_id),
        group_id: GroupId::new(group_id),
        role: parse_role(role)?,
        created_by: PrincipalId::from_uuid(created_by),
        created_at: row.try_get("created_at").map_err(decode)?,
        last_updated_by: PrincipalId::from_uuid(last_updated_by),
        last_updated_at: row.try_get("last_updated_at").map_err(decode)?,
    })
}

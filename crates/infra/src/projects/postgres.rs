//! Postgres-backed project table (`projects`).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use keel_auth::{Grant, NewGrant, PrincipalId};
use keel_core::ProjectId;

use super::{Project, ProjectStatus, ProjectStore, ProjectStoreError};
use crate::grant_store::postgres::insert_grant;
use crate::pg::{describe, is_unique_violation};

const PROJECT_COLUMNS: &str = "id, name, description, status, created_by, created_at, updated_at, version";

#[derive(Debug, Clone)]
pub struct PostgresProjectStore {
    pool: Arc<PgPool>,
}

impl PostgresProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ProjectStoreError {
    ProjectStoreError::Backend(describe(operation, &err))
}

#[async_trait]
impl ProjectStore for PostgresProjectStore {
    #[instrument(skip(self), fields(project_id = %id), err)]
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(project_from_row).transpose()
    }

    #[instrument(skip(self, project, owner), fields(project_id = %project.id, owner_group = %owner.group_id), err)]
    async fn create(&self, project: Project, owner: NewGrant) -> Result<(Project, Grant), ProjectStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create.begin", e))?;

        sqlx::query(&format!(
            "INSERT INTO projects ({PROJECT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(project.id.as_uuid())
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.status.as_str())
        .bind(project.created_by.as_uuid())
        .bind(project.created_at)
        .bind(project.updated_at)
        .bind(project.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ProjectStoreError::Duplicate(project.id)
            } else {
                map_sqlx_error("create.insert_project", e)
            }
        })?;

        let grant = insert_grant(&mut tx, owner).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("create.commit", e))?;
        Ok((project, grant))
    }

    #[instrument(skip(self, project), fields(project_id = %project.id), err)]
    async fn update(&self, project: Project) -> Result<Project, ProjectStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE projects \
             SET name = $2, description = $3, status = $4, updated_at = $5, version = version + 1 \
             WHERE id = $1 AND version = $6 \
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(project.id.as_uuid())
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.status.as_str())
        .bind(project.updated_at)
        .bind(project.version)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if let Some(row) = row {
            return project_from_row(&row);
        }

        // No row matched: either the project is gone or another writer got there first.
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM projects WHERE id = $1)")
            .bind(project.id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update.exists", e))?;

        if exists {
            Err(ProjectStoreError::Concurrency {
                id: project.id,
                expected: project.version,
            })
        } else {
            Err(ProjectStoreError::NotFound(project.id))
        }
    }
}

fn project_from_row(row: &sqlx::postgres::PgRow) -> Result<Project, ProjectStoreError> {
    let decode = |e| map_sqlx_error("decode_project", e);

    let id: uuid::Uuid = row.try_get("id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let created_by: uuid::Uuid = row.try_get("created_by").map_err(decode)?;

    Ok(Project {
        id: ProjectId::from_uuid(id),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        status: status
            .parse::<ProjectStatus>()
            .map_err(|e| ProjectStoreError::Backend(format!("stored status is invalid: {e}")))?,
        created_by: PrincipalId::from_uuid(created_by),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        version: row.try_get("version").map_err(decode)?,
    })
}

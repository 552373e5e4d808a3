//! Postgres-backed activity log (`project_activity` table).
//!
//! Rows are insert-only; the only deletion path is `ON DELETE CASCADE` from
//! `projects`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use keel_activity::{
    ActivityEvent, ActivityKind, ActivityLog, ActivityLogError, ActivityPage, ActivityTypeRef, EventType, Page,
};
use keel_auth::PrincipalId;
use keel_core::{ActivityEventId, ProjectId};

use crate::pg::{describe, is_unique_violation};

const SOURCE_SYSTEM: &str = "system";
const SOURCE_CUSTOM: &str = "custom";

#[derive(Debug, Clone)]
pub struct PostgresActivityLog {
    pool: Arc<PgPool>,
}

impl PostgresActivityLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ActivityLogError {
    ActivityLogError::Backend(describe(operation, &err))
}

#[async_trait]
impl ActivityLog for PostgresActivityLog {
    #[instrument(skip(self, event), fields(project_id = %event.project_id, event_id = %event.id), err)]
    async fn append(&self, event: ActivityEvent) -> Result<(), ActivityLogError> {
        let (source, event_type) = match &event.event_type {
            EventType::System(kind) => (SOURCE_SYSTEM, kind.as_str().to_string()),
            EventType::Custom(type_ref) => (SOURCE_CUSTOM, type_ref.as_str().to_string()),
        };

        sqlx::query(
            r#"
            INSERT INTO project_activity
                (id, project_id, event_source, event_type, actor_id, description, metadata, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.project_id.as_uuid())
        .bind(source)
        .bind(event_type)
        .bind(event.actor_id.as_uuid())
        .bind(&event.description)
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ActivityLogError::DuplicateId(event.id.to_string())
            } else {
                map_sqlx_error("append", e)
            }
        })?;

        Ok(())
    }

    #[instrument(
        skip(self),
        fields(project_id = %project_id, limit = page.limit, offset = page.offset, event_count = tracing::field::Empty),
        err
    )]
    async fn list(&self, project_id: ProjectId, page: Page) -> Result<ActivityPage, ActivityLogError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_activity WHERE project_id = $1")
            .bind(project_id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list.count", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, project_id, event_source, event_type, actor_id, description, metadata, occurred_at
            FROM project_activity
            WHERE project_id = $1
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        let events = rows.iter().map(event_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("event_count", events.len());

        let total = total.max(0) as u64;
        Ok(ActivityPage {
            has_more: total > u64::from(page.offset) + u64::from(page.limit),
            events,
            total,
            page,
        })
    }
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<ActivityEvent, ActivityLogError> {
    let decode = |e| map_sqlx_error("decode_event", e);

    let id: uuid::Uuid = row.try_get("id").map_err(decode)?;
    let project_id: uuid::Uuid = row.try_get("project_id").map_err(decode)?;
    let actor_id: uuid::Uuid = row.try_get("actor_id").map_err(decode)?;
    let source: String = row.try_get("event_source").map_err(decode)?;
    let raw_type: String = row.try_get("event_type").map_err(decode)?;

    let event_type = match source.as_str() {
        SOURCE_SYSTEM => EventType::System(ActivityKind::parse(&raw_type).ok_or_else(|| {
            ActivityLogError::Backend(format!("unknown system activity kind '{raw_type}'"))
        })?),
        SOURCE_CUSTOM => EventType::Custom(ActivityTypeRef::new(raw_type)),
        other => {
            return Err(ActivityLogError::Backend(format!("unknown activity source '{other}'")));
        }
    };

    Ok(ActivityEvent {
        id: ActivityEventId::from_uuid(id),
        project_id: ProjectId::from_uuid(project_id),
        event_type,
        actor_id: PrincipalId::from_uuid(actor_id),
        description: row.try_get("description").map_err(decode)?,
        metadata: row.try_get("metadata").map_err(decode)?,
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
    })
}

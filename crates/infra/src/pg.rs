//! Shared Postgres plumbing: schema bootstrap and sqlx error helpers.

use sqlx::PgPool;

const SCHEMA: &[(&str, &str)] = &[
    (
        "projects",
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id          UUID PRIMARY KEY,
            name        TEXT NOT NULL CHECK (length(trim(name)) > 0),
            description TEXT NOT NULL DEFAULT '',
            status      TEXT NOT NULL,
            created_by  UUID NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL,
            version     BIGINT NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "project_groups",
        r#"
        CREATE TABLE IF NOT EXISTS project_groups (
            project_id      UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            group_id        TEXT NOT NULL,
            role            TEXT NOT NULL CHECK (role IN ('viewer', 'contributor', 'manager', 'owner')),
            created_by      UUID NOT NULL,
            created_at      TIMESTAMPTZ NOT NULL,
            last_updated_by UUID NOT NULL,
            last_updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (project_id, group_id)
        )
        "#,
    ),
    (
        "project_activity",
        r#"
        CREATE TABLE IF NOT EXISTS project_activity (
            id           UUID PRIMARY KEY,
            project_id   UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            event_source TEXT NOT NULL CHECK (event_source IN ('system', 'custom')),
            event_type   TEXT NOT NULL,
            actor_id     UUID NOT NULL,
            description  TEXT NOT NULL,
            metadata     JSONB NOT NULL DEFAULT '{}'::jsonb,
            occurred_at  TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "project_activity_feed_idx",
        r#"
        CREATE INDEX IF NOT EXISTS project_activity_feed_idx
            ON project_activity (project_id, occurred_at DESC, id DESC)
        "#,
    ),
];

/// Create the tables this crate reads and writes, if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, ddl) in SCHEMA {
        sqlx::query(ddl).execute(pool).await?;
        tracing::debug!(object = name, "schema ensured");
    }
    Ok(())
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

/// Human-readable description of a sqlx failure inside `operation`.
pub(crate) fn describe(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!("database error {code} in {operation}: {}", db_err.message()),
            None => format!("database error in {operation}: {}", db_err.message()),
        },
        sqlx::Error::PoolClosed => format!("connection pool closed in {operation}"),
        sqlx::Error::RowNotFound => format!("unexpected row not found in {operation}"),
        other => format!("sqlx error in {operation}: {other}"),
    }
}

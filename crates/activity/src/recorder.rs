use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use keel_auth::PrincipalId;
use keel_core::{ActivityEventId, ProjectId};

use crate::{ActivityEvent, ActivityKind, ActivityLog, ActivityLogError, EventType, FieldChange, classify_update};

/// Input for one system-generated activity event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub project_id: ProjectId,
    pub kind: ActivityKind,
    pub actor_id: PrincipalId,
    pub description: String,
    pub metadata: JsonValue,
}

/// Writes system activity events after successful mutations.
///
/// Callers must only invoke this once the mutation has committed.
#[derive(Debug, Clone)]
pub struct ActivityRecorder<L> {
    log: L,
}

impl<L> ActivityRecorder<L>
where
    L: ActivityLog,
{
    pub fn new(log: L) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub async fn record(&self, activity: NewActivity) -> Result<ActivityEvent, ActivityLogError> {
        self.record_at(activity, Utc::now()).await
    }

    pub async fn record_at(
        &self,
        activity: NewActivity,
        at: DateTime<Utc>,
    ) -> Result<ActivityEvent, ActivityLogError> {
        let event = ActivityEvent {
            id: ActivityEventId::new(),
            project_id: activity.project_id,
            event_type: EventType::System(activity.kind),
            actor_id: activity.actor_id,
            description: activity.description,
            metadata: activity.metadata,
            occurred_at: at,
        };

        self.log.append(event.clone()).await?;

        tracing::debug!(
            project_id = %event.project_id,
            kind = %activity.kind,
            actor_id = %event.actor_id,
            "activity recorded"
        );

        Ok(event)
    }

    /// Record the single event describing an update, chosen by `classify_update`.
    ///
    /// Returns `Ok(None)` when nothing changed.
    pub async fn record_update(
        &self,
        project_id: ProjectId,
        actor_id: PrincipalId,
        subject: &str,
        changes: &[FieldChange],
    ) -> Result<Option<ActivityEvent>, ActivityLogError> {
        let Some(update) = classify_update(subject, changes) else {
            return Ok(None);
        };

        let event = self
            .record(NewActivity {
                project_id,
                kind: update.kind,
                actor_id,
                description: update.description,
                metadata: update.metadata,
            })
            .await?;

        Ok(Some(event))
    }
}

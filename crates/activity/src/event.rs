use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use keel_auth::PrincipalId;
use keel_core::{ActivityEventId, ProjectId};

/// Closed vocabulary of system-generated activity kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Created,
    Updated,
    StatusChanged,
    LinkAdded,
    LinkRemoved,
    LinkUpdated,
    MilestoneCreated,
    MilestoneUpdated,
    MilestoneCompleted,
    MilestoneDeleted,
    GroupAdded,
    GroupRemoved,
    GroupRoleChanged,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 13] = [
        ActivityKind::Created,
        ActivityKind::Updated,
        ActivityKind::StatusChanged,
        ActivityKind::LinkAdded,
        ActivityKind::LinkRemoved,
        ActivityKind::LinkUpdated,
        ActivityKind::MilestoneCreated,
        ActivityKind::MilestoneUpdated,
        ActivityKind::MilestoneCompleted,
        ActivityKind::MilestoneDeleted,
        ActivityKind::GroupAdded,
        ActivityKind::GroupRemoved,
        ActivityKind::GroupRoleChanged,
    ];

    /// Stable storage name (e.g. "status_changed").
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Created => "created",
            ActivityKind::Updated => "updated",
            ActivityKind::StatusChanged => "status_changed",
            ActivityKind::LinkAdded => "link_added",
            ActivityKind::LinkRemoved => "link_removed",
            ActivityKind::LinkUpdated => "link_updated",
            ActivityKind::MilestoneCreated => "milestone_created",
            ActivityKind::MilestoneUpdated => "milestone_updated",
            ActivityKind::MilestoneCompleted => "milestone_completed",
            ActivityKind::MilestoneDeleted => "milestone_deleted",
            ActivityKind::GroupAdded => "group_added",
            ActivityKind::GroupRemoved => "group_removed",
            ActivityKind::GroupRoleChanged => "group_role_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl core::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a user-defined activity type (user-authored entries).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityTypeRef(String);

impl ActivityTypeRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What an activity event is tagged with.
///
/// System kinds are written by this crate. Custom entries are authored by
/// users through a separate CRUD path and only read back here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", content = "type", rename_all = "snake_case")]
pub enum EventType {
    System(ActivityKind),
    Custom(ActivityTypeRef),
}

impl EventType {
    pub fn is_system(&self) -> bool {
        matches!(self, EventType::System(_))
    }

    pub fn kind(&self) -> Option<ActivityKind> {
        match self {
            EventType::System(kind) => Some(*kind),
            EventType::Custom(_) => None,
        }
    }
}

impl From<ActivityKind> for EventType {
    fn from(value: ActivityKind) -> Self {
        EventType::System(value)
    }
}

/// Immutable audit record of a project change.
///
/// Events are facts: there is no API to update one, and they only disappear
/// when the whole project is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: ActivityEventId,
    pub project_id: ProjectId,
    pub event_type: EventType,
    pub actor_id: PrincipalId,
    pub description: String,
    pub metadata: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        for kind in ActivityKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, JsonValue::String(kind.as_str().to_string()));
            assert_eq!(ActivityKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn custom_types_have_no_system_kind() {
        let t = EventType::Custom(ActivityTypeRef::new("standup-note"));
        assert!(!t.is_system());
        assert_eq!(t.kind(), None);
        assert_eq!(EventType::from(ActivityKind::Created).kind(), Some(ActivityKind::Created));
    }
}

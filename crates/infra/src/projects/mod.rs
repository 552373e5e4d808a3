//! Minimal project record: existence checks and the fields whose changes
//! drive update-kind selection.

pub mod in_memory;
pub mod postgres;

use core::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keel_activity::FieldChange;
use keel_auth::{Grant, GrantStoreError, NewGrant, PrincipalId};
use keel_core::{DomainError, ProjectId};

pub use in_memory::InMemoryProjectStore;
pub use postgres::PostgresProjectStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Active,
    OnHold,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 5] = [
        ProjectStatus::Planning,
        ProjectStatus::Active,
        ProjectStatus::OnHold,
        ProjectStatus::Completed,
        ProjectStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::Active => "active",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }
}

impl core::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::validation(format!("unknown project status '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub status: ProjectStatus,
    pub created_by: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful update.
    pub version: i64,
}

impl Project {
    /// A new project in `planning`.
    pub fn new(
        name: &str,
        description: &str,
        created_by: PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            id: ProjectId::new(),
            name: validate_name(name)?,
            description: description.trim().to_string(),
            status: ProjectStatus::Planning,
            created_by,
            created_at: at,
            updated_at: at,
            version: 0,
        })
    }

    /// Apply `patch`, returning the patched record and the fields that
    /// actually changed. An empty change list means the patch is a no-op and
    /// the returned record equals `self`.
    pub fn apply(&self, patch: &ProjectPatch, at: DateTime<Utc>) -> Result<(Project, Vec<FieldChange>), DomainError> {
        let mut next = self.clone();
        let mut changes = Vec::new();

        if let Some(name) = &patch.name {
            let name = validate_name(name)?;
            if name != self.name {
                changes.push(FieldChange::new("name", self.name.as_str(), name.as_str()));
                next.name = name;
            }
        }

        if let Some(description) = &patch.description {
            let description = description.trim();
            if description != self.description {
                changes.push(FieldChange::new("description", self.description.as_str(), description));
                next.description = description.to_string();
            }
        }

        if let Some(status) = patch.status {
            if status != self.status {
                changes.push(FieldChange::new("status", self.status.as_str(), status.as_str()));
                next.status = status;
            }
        }

        if !changes.is_empty() {
            next.updated_at = at;
        }

        Ok((next, changes))
    }
}

fn validate_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("project name must not be empty"));
    }
    Ok(name.to_string())
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
}

impl ProjectPatch {
    pub fn archive() -> Self {
        Self {
            status: Some(ProjectStatus::Archived),
            ..Self::default()
        }
    }

    /// Whether applying this patch to a project in `current` moves it into or
    /// out of `archived`.
    pub fn touches_archive(&self, current: ProjectStatus) -> bool {
        match self.status {
            Some(next) if next != current => {
                next == ProjectStatus::Archived || current == ProjectStatus::Archived
            }
            _ => false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectStoreError {
    #[error("project {0} not found")]
    NotFound(ProjectId),

    #[error("project {0} already exists")]
    Duplicate(ProjectId),

    #[error("optimistic concurrency check failed: project {id} is no longer at version {expected}")]
    Concurrency { id: ProjectId, expected: i64 },

    #[error(transparent)]
    Grant(#[from] GrantStoreError),

    #[error("project store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, ProjectStoreError>;

    /// Persist a new project together with its first owner grant, atomically.
    async fn create(&self, project: Project, owner: NewGrant) -> Result<(Project, Grant), ProjectStoreError>;

    /// Overwrite the mutable fields of an existing project.
    ///
    /// `project.version` is the version the caller read. The write only
    /// happens if the stored record is still at that version; the returned
    /// record carries the bumped version.
    async fn update(&self, project: Project) -> Result<Project, ProjectStoreError>;
}

#[async_trait]
impl<S> ProjectStore for Arc<S>
where
    S: ProjectStore + ?Sized,
{
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        (**self).get(id).await
    }

    async fn create(&self, project: Project, owner: NewGrant) -> Result<(Project, Grant), ProjectStoreError> {
        (**self).create(project, owner).await
    }

    async fn update(&self, project: Project) -> Result<Project, ProjectStoreError> {
        (**self).update(project).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project::new("Apollo", "moon", PrincipalId::new(), Utc::now()).unwrap()
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("On_Hold".parse::<ProjectStatus>().unwrap(), ProjectStatus::OnHold);
        assert!("paused".parse::<ProjectStatus>().is_err());
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(Project::new("  ", "", PrincipalId::new(), Utc::now()).is_err());

        let patch = ProjectPatch {
            name: Some(" ".into()),
            ..ProjectPatch::default()
        };
        assert!(project().apply(&patch, Utc::now()).is_err());
    }

    #[test]
    fn apply_reports_only_real_changes() {
        let p = project();
        let patch = ProjectPatch {
            name: Some("Apollo".into()),
            description: Some("mars".into()),
            status: Some(ProjectStatus::Active),
        };

        let (next, changes) = p.apply(&patch, Utc::now()).unwrap();
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["description", "status"]);
        assert_eq!(next.status, ProjectStatus::Active);
        assert_eq!(changes[1].from, "planning");
    }

    #[test]
    fn noop_patch_keeps_record_untouched() {
        let p = project();
        let (next, changes) = p.apply(&ProjectPatch::default(), Utc::now()).unwrap();
        assert!(changes.is_empty());
        assert_eq!(next, p);
    }

    #[test]
    fn archive_transitions_are_detected_both_ways() {
        assert!(ProjectPatch::archive().touches_archive(ProjectStatus::Active));
        assert!(!ProjectPatch::archive().touches_archive(ProjectStatus::Archived));

        let unarchive = ProjectPatch {
            status: Some(ProjectStatus::Active),
            ..ProjectPatch::default()
        };
        assert!(unarchive.touches_archive(ProjectStatus::Archived));
        assert!(!unarchive.touches_archive(ProjectStatus::Planning));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keel_core::ProjectId;

use crate::ActivityEvent;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Offset pagination for the activity feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// One page of a project's activity feed, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityPage {
    pub events: Vec<ActivityEvent>,
    pub total: u64,
    pub page: Page,
    pub has_more: bool,
}

#[derive(Debug, Error)]
pub enum ActivityLogError {
    #[error("activity event {0} already exists")]
    DuplicateId(String),

    #[error("activity log backend error: {0}")]
    Backend(String),
}

/// Append-only activity storage.
///
/// There is no update or delete operation.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, event: ActivityEvent) -> Result<(), ActivityLogError>;

    async fn list(&self, project_id: ProjectId, page: Page) -> Result<ActivityPage, ActivityLogError>;
}

#[async_trait]
impl<L> ActivityLog for Arc<L>
where
    L: ActivityLog + ?Sized,
{
    async fn append(&self, event: ActivityEvent) -> Result<(), ActivityLogError> {
        (**self).append(event).await
    }

    async fn list(&self, project_id: ProjectId, page: Page) -> Result<ActivityPage, ActivityLogError> {
        (**self).list(project_id, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limits_are_clamped() {
        assert_eq!(Page::new(None, None), Page::default());
        assert_eq!(Page::new(Some(10_000), Some(5)).limit, MAX_PAGE_LIMIT);
        assert_eq!(Page::new(Some(0), None).limit, 1);
    }
}

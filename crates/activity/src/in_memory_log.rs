//! In-memory activity log for tests/dev.

use std::sync::RwLock;

use async_trait::async_trait;

use keel_core::ProjectId;

use crate::{ActivityEvent, ActivityLog, ActivityLogError, ActivityPage, Page};

/// In-memory append-only activity log.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    events: RwLock<Vec<ActivityEvent>>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event, oldest first.
    pub fn snapshot(&self) -> Vec<ActivityEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn append(&self, event: ActivityEvent) -> Result<(), ActivityLogError> {
        let mut events = self
            .events
            .write()
            .map_err(|_| ActivityLogError::Backend("lock poisoned".to_string()))?;

        if events.iter().any(|e| e.id == event.id) {
            return Err(ActivityLogError::DuplicateId(event.id.to_string()));
        }

        events.push(event);
        Ok(())
    }

    async fn list(&self, project_id: ProjectId, page: Page) -> Result<ActivityPage, ActivityLogError> {
        let events = self
            .events
            .read()
            .map_err(|_| ActivityLogError::Backend("lock poisoned".to_string()))?;

        // Newest first; insertion order breaks ties between equal timestamps.
        let mut matching: Vec<(usize, &ActivityEvent)> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.project_id == project_id)
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| b.occurred_at.cmp(&a.occurred_at).then(ib.cmp(ia)));

        let total = matching.len() as u64;
        let page_events: Vec<ActivityEvent> = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|(_, e)| e.clone())
            .collect();

        let has_more = total > u64::from(page.offset) + u64::from(page.limit);

        Ok(ActivityPage {
            events: page_events,
            total,
            page,
            has_more,
        })
    }
}

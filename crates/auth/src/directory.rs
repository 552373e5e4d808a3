//! External group-membership directory seam.
//!
//! The directory is only consulted when a credential carries no memberships.
//! Every failure here is recoverable: the resolver degrades to a principal
//! with no groups instead of failing the request.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::GroupId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("group directory unavailable: {0}")]
    Unavailable(String),

    #[error("group directory timed out")]
    Timeout,

    #[error("group directory returned status {0}")]
    Status(u16),

    #[error("malformed group directory payload: {0}")]
    Malformed(String),
}

/// Lookup of group memberships by a principal's stable identifier (email).
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn groups_for(&self, email: &str) -> Result<Vec<GroupId>, DirectoryError>;
}

#[async_trait]
impl<D> GroupDirectory for Arc<D>
where
    D: GroupDirectory + ?Sized,
{
    async fn groups_for(&self, email: &str) -> Result<Vec<GroupId>, DirectoryError> {
        (**self).groups_for(email).await
    }
}

/// Directory used when no external directory is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGroupDirectory;

#[async_trait]
impl GroupDirectory for NoGroupDirectory {
    async fn groups_for(&self, _email: &str) -> Result<Vec<GroupId>, DirectoryError> {
        Ok(Vec::new())
    }
}

/// Fixed in-memory directory for tests/dev.
///
/// Counts lookups so callers can assert the fallback path was (not) taken.
#[derive(Debug, Default)]
pub struct StaticGroupDirectory {
    members: HashMap<String, Vec<GroupId>>,
    lookups: AtomicUsize,
}

impl StaticGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(
        mut self,
        email: impl Into<String>,
        groups: impl IntoIterator<Item = GroupId>,
    ) -> Self {
        self.members
            .insert(email.into().to_lowercase(), groups.into_iter().collect());
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupDirectory for StaticGroupDirectory {
    async fn groups_for(&self, email: &str) -> Result<Vec<GroupId>, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .members
            .get(&email.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

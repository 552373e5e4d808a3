//! Infrastructure layer: storage adapters, the group directory client,
//! configuration, and the project access service that composes them.

pub mod activity_log;
pub mod config;
pub mod directory;
pub mod grant_store;
pub mod pg;
pub mod projects;
pub mod service;

pub use config::{AppConfig, ConfigError};
pub use pg::ensure_schema;
pub use projects::{Project, ProjectPatch, ProjectStatus, ProjectStore, ProjectStoreError};
pub use service::{
    AccessError, Audit, CreatedProject, Mutation, NewProject, ProjectAccessService, SharedProjectAccessService,
};

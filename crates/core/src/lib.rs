//! `keel-core`: shared building blocks for the project access core.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{ActivityEventId, ProjectId};

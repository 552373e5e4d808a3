//! Project activity log: immutable audit events written after mutations.

pub mod changes;
pub mod event;
pub mod in_memory_log;
pub mod log;
pub mod recorder;

pub use changes::{FieldChange, UpdateActivity, classify_update};
pub use event::{ActivityEvent, ActivityKind, ActivityTypeRef, EventType};
pub use in_memory_log::InMemoryActivityLog;
pub use log::{ActivityLog, ActivityLogError, ActivityPage, Page};
pub use recorder::{ActivityRecorder, NewActivity};

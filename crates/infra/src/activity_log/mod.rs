//! Durable `ActivityLog` implementations. The in-memory log lives in
//! `keel-activity`.

pub mod postgres;

pub use postgres::PostgresActivityLog;

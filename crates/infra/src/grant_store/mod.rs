//! `GrantStore` implementations.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryGrantStore;
pub use postgres::PostgresGrantStore;

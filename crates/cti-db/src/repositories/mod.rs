//! Repository implementations
//!
//! Concrete implementations of the storage traits defined in cti-core,
//! using sqlx for PostgreSQL access.

pub mod call_repo;

pub use call_repo::PgCallStore;

//! CTI Bridge Storage Layer
//!
//! Implementations of the `CallStore` collaborator used by the call state
//! manager:
//!
//! - Connection pool management with sqlx
//! - `PgCallStore`, upserting call and park orbit records into PostgreSQL
//! - `MemoryCallStore`, keeping the latest records in process memory when no
//!   database is configured

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::MemoryCallStore;
pub use pool::create_pool;
pub use repositories::*;

pub use cti_core::{AppError, AppResult};
pub use sqlx::PgPool;

//! Collaborator traits
//!
//! The call state services only reach durable storage through these seams.

use crate::error::AppError;
use crate::models::{CallSession, ExtensionRef, ParkOrbit};
use async_trait::async_trait;

/// Storage collaborator for call transitions.
///
/// Every transition hands the store an immutable snapshot of the session.
/// Terminated calls are written with their terminal state, never deleted.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Insert or update the record for `call.uuid`
    async fn save_call(&self, call: &CallSession) -> Result<(), AppError>;

    /// Insert or update the record for `orbit.orbit_number`
    async fn save_orbit(&self, orbit: &ParkOrbit) -> Result<(), AppError>;

    /// Look up the extension registered under `number`
    async fn find_extension(&self, number: &str) -> Result<Option<ExtensionRef>, AppError>;
}

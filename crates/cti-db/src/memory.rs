//! In-process call store
//!
//! Keeps the latest record per call and per orbit. Used when no database URL
//! is configured.

use async_trait::async_trait;
use cti_core::models::{CallSession, ExtensionRef, ParkOrbit};
use cti_core::traits::CallStore;
use cti_core::AppResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
pub struct MemoryCallStore {
    calls: RwLock<HashMap<String, CallSession>>,
    orbits: RwLock<HashMap<String, ParkOrbit>>,
    extensions: RwLock<HashMap<String, ExtensionRef>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `extension` resolvable by its number
    pub fn register_extension(&self, extension: ExtensionRef) {
        self.extensions
            .write()
            .insert(extension.extension_number.clone(), extension);
    }

    pub fn call(&self, uuid: &str) -> Option<CallSession> {
        self.calls.read().get(uuid).cloned()
    }

    pub fn orbit(&self, orbit_number: &str) -> Option<ParkOrbit> {
        self.orbits.read().get(orbit_number).cloned()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn save_call(&self, call: &CallSession) -> AppResult<()> {
        debug!(call_uuid = %call.uuid, state = %call.state, "Storing call record");
        self.calls.write().insert(call.uuid.clone(), call.clone());
        Ok(())
    }

    async fn save_orbit(&self, orbit: &ParkOrbit) -> AppResult<()> {
        self.orbits
            .write()
            .insert(orbit.orbit_number.clone(), orbit.clone());
        Ok(())
    }

    async fn find_extension(&self, number: &str) -> AppResult<Option<ExtensionRef>> {
        Ok(self.extensions.read().get(number).cloned())
    }
}

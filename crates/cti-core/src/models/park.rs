//! Park orbit model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named holding slot where a call waits to be retrieved.
///
/// At most one call occupies an orbit at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkOrbit {
    pub orbit_number: String,
    pub is_occupied: bool,
    pub occupied_by_call_uuid: Option<String>,
    pub parked_at: Option<DateTime<Utc>>,
}

impl ParkOrbit {
    pub fn vacant(orbit_number: impl Into<String>) -> Self {
        Self {
            orbit_number: orbit_number.into(),
            is_occupied: false,
            occupied_by_call_uuid: None,
            parked_at: None,
        }
    }

    /// Mark the orbit occupied by `call_uuid`, returning the previous occupant
    /// if it was a different call.
    pub fn occupy(&mut self, call_uuid: &str, at: DateTime<Utc>) -> Option<String> {
        let previous = self
            .occupied_by_call_uuid
            .take()
            .filter(|existing| existing != call_uuid);
        self.is_occupied = true;
        self.occupied_by_call_uuid = Some(call_uuid.to_string());
        self.parked_at = Some(at);
        previous
    }

    pub fn release(&mut self) {
        self.is_occupied = false;
        self.occupied_by_call_uuid = None;
        self.parked_at = None;
    }

    pub fn is_held_by(&self, call_uuid: &str) -> bool {
        self.is_occupied && self.occupied_by_call_uuid.as_deref() == Some(call_uuid)
    }
}

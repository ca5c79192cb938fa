//! Call session model
//!
//! One `CallSession` per switch channel identifier, driven through a small
//! lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallState {
    Ringing,
    Active,
    Held,
    Parked,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Ringing => "RINGING",
            CallState::Active => "ACTIVE",
            CallState::Held => "HELD",
            CallState::Parked => "PARKED",
            CallState::Ended => "ENDED",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Any live state may end or be parked; otherwise only
    /// RINGING→ACTIVE, ACTIVE⇄HELD and PARKED→ACTIVE.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Ended, _) => false,
            (_, Ended) => true,
            (Ringing | Active | Held, Parked) => true,
            (Ringing, Active) => true,
            (Active, Held) | (Held, Active) => true,
            (Parked, Active) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call direction as reported by the switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
    Internal,
    #[default]
    Unknown,
}

impl CallDirection {
    /// Parse the switch's `Call-Direction` header value
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => CallDirection::Inbound,
            "outbound" => CallDirection::Outbound,
            "internal" => CallDirection::Internal,
            _ => CallDirection::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
            CallDirection::Internal => "internal",
            CallDirection::Unknown => "unknown",
        }
    }
}

/// Extension a call is associated with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRef {
    pub id: Uuid,
    pub extension_number: String,
}

/// A live (or just terminated) call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    /// Switch-assigned channel identifier
    pub uuid: String,

    pub direction: CallDirection,

    pub caller_id_number: String,

    pub caller_id_name: Option<String>,

    pub destination_number: String,

    /// Resolved extension (inbound: destination, outbound: caller)
    pub extension: Option<ExtensionRef>,

    pub state: CallState,

    pub created_at: DateTime<Utc>,

    pub answered_at: Option<DateTime<Utc>>,

    pub ended_at: Option<DateTime<Utc>>,

    pub park_orbit: Option<String>,

    pub conference_name: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CallSession {
    /// Create a session in its initial RINGING state
    pub fn ringing(
        uuid: impl Into<String>,
        direction: CallDirection,
        caller_id_number: impl Into<String>,
        destination_number: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            direction,
            caller_id_number: caller_id_number.into(),
            caller_id_name: None,
            destination_number: destination_number.into(),
            extension: None,
            state: CallState::Ringing,
            created_at,
            answered_at: None,
            ended_at: None,
            park_orbit: None,
            conference_name: None,
            metadata: HashMap::new(),
        }
    }

    /// Number used to look up the owning extension, if the direction has one
    pub fn extension_lookup_number(&self) -> Option<&str> {
        match self.direction {
            CallDirection::Inbound => Some(self.destination_number.as_str()),
            CallDirection::Outbound => Some(self.caller_id_number.as_str()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Seconds since the call was answered (0 if unanswered)
    pub fn talk_seconds(&self, now: DateTime<Utc>) -> i64 {
        match self.answered_at {
            Some(answered) => {
                let end = self.ended_at.unwrap_or(now);
                (end - answered).num_seconds().max(0)
            }
            None => 0,
        }
    }
}

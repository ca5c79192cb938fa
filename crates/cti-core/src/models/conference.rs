//! Conference membership notifications. Relayed to clients, never stored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceEvent {
    pub conference_name: String,
    pub member_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id_number: Option<String>,
}

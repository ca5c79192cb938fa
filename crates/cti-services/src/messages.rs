//! `{type, data}` envelopes pushed to connected clients

use chrono::{DateTime, Utc};
use cti_core::models::{CallSession, ConferenceEvent};
use serde::{Deserialize, Serialize};

/// Result of a call-control request issued by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_uuid: Option<String>,
    pub message: String,
}

impl CommandOutcome {
    pub fn ok(call_uuid: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            call_uuid,
            message: message.into(),
        }
    }

    pub fn failed(call_uuid: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            call_uuid,
            message: message.into(),
        }
    }
}

/// Message delivered over the client feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    CallCreated(CallSession),
    CallAnswered(CallSession),
    CallParked(CallSession),
    CallUpdated(CallSession),
    CallEnded(CallSession),
    ConferenceMemberAdd(ConferenceEvent),
    ConferenceMemberDel(ConferenceEvent),
    Error { message: String },
    ActiveCalls(Vec<CallSession>),
    TransferResult(CommandOutcome),
    ParkResult(CommandOutcome),
    HangupResult(CommandOutcome),
    OriginateResult(CommandOutcome),
    Pong { timestamp: DateTime<Utc> },
}

impl ClientMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ClientMessage::Error {
            message: message.into(),
        }
    }

    /// The `type` tag as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CallCreated(_) => "call_created",
            ClientMessage::CallAnswered(_) => "call_answered",
            ClientMessage::CallParked(_) => "call_parked",
            ClientMessage::CallUpdated(_) => "call_updated",
            ClientMessage::CallEnded(_) => "call_ended",
            ClientMessage::ConferenceMemberAdd(_) => "conference_member_add",
            ClientMessage::ConferenceMemberDel(_) => "conference_member_del",
            ClientMessage::Error { .. } => "error",
            ClientMessage::ActiveCalls(_) => "active_calls",
            ClientMessage::TransferResult(_) => "transfer_result",
            ClientMessage::ParkResult(_) => "park_result",
            ClientMessage::HangupResult(_) => "hangup_result",
            ClientMessage::OriginateResult(_) => "originate_result",
            ClientMessage::Pong { .. } => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cti_core::models::CallDirection;
    use serde_json::json;

    #[test]
    fn test_call_created_envelope() {
        let call = CallSession::ringing("abc-1", CallDirection::Inbound, "1001", "2002", Utc::now());
        let value = serde_json::to_value(ClientMessage::CallCreated(call)).unwrap();

        assert_eq!(value["type"], "call_created");
        assert_eq!(value["data"]["uuid"], "abc-1");
        assert_eq!(value["data"]["state"], "RINGING");
        assert_eq!(value["data"]["direction"], "inbound");
    }

    #[test]
    fn test_conference_envelope() {
        let message = ClientMessage::ConferenceMemberDel(ConferenceEvent {
            conference_name: "sales".to_string(),
            member_id: "7".to_string(),
            caller_id_number: None,
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conference_member_del",
                "data": {"conference_name": "sales", "member_id": "7"}
            })
        );
        assert_eq!(message.kind(), "conference_member_del");
    }

    #[test]
    fn test_error_envelope() {
        let value = serde_json::to_value(ClientMessage::error("not connected")).unwrap();
        assert_eq!(value, json!({"type": "error", "data": {"message": "not connected"}}));
    }
}

//! Call-control request DTOs
//!
//! The same bodies are accepted by the REST endpoints and, wrapped in a
//! `{type, data}` envelope, over the WebSocket feed.

use cti_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct TransferRequest {
    #[validate(length(min = 1, max = 100))]
    pub uuid: String,

    #[validate(length(min = 1, max = 100))]
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct ParkRequest {
    #[validate(length(min = 1, max = 100))]
    pub uuid: String,

    #[validate(length(min = 1, max = 20))]
    pub orbit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct HangupRequest {
    #[validate(length(min = 1, max = 100))]
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct OriginateRequest {
    #[validate(length(min = 1, max = 20))]
    pub extension: String,

    #[validate(length(min = 1, max = 100))]
    pub destination: String,
}

/// Query string of the `/ws` upgrade request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsQuery {
    pub client_id: Option<String>,
}

impl WsQuery {
    /// The client identity, if one was given
    pub fn identity(&self) -> Option<&str> {
        self.client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// A request received over the client feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    TransferCall(TransferRequest),
    ParkCall(ParkRequest),
    HangupCall(HangupRequest),
    OriginateCall(OriginateRequest),
    GetActiveCalls,
    Ping,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

fn body<T>(data: Value) -> AppResult<T>
where
    T: serde::de::DeserializeOwned + Validate,
{
    let request: T =
        serde_json::from_value(data).map_err(|e| AppError::InvalidInput(e.to_string()))?;
    request.validate()?;
    Ok(request)
}

impl ClientRequest {
    /// Decode and validate one `{type, data}` text frame
    pub fn parse(text: &str) -> AppResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| AppError::InvalidInput(format!("Malformed request: {}", e)))?;

        match envelope.kind.as_str() {
            "transfer_call" => body(envelope.data).map(ClientRequest::TransferCall),
            "park_call" => body(envelope.data).map(ClientRequest::ParkCall),
            "hangup_call" => body(envelope.data).map(ClientRequest::HangupCall),
            "originate_call" => body(envelope.data).map(ClientRequest::OriginateCall),
            "get_active_calls" => Ok(ClientRequest::GetActiveCalls),
            "ping" => Ok(ClientRequest::Ping),
            other => Err(AppError::InvalidInput(format!(
                "Unknown message type: {}",
                other
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::TransferCall(_) => "transfer_call",
            ClientRequest::ParkCall(_) => "park_call",
            ClientRequest::HangupCall(_) => "hangup_call",
            ClientRequest::OriginateCall(_) => "originate_call",
            ClientRequest::GetActiveCalls => "get_active_calls",
            ClientRequest::Ping => "ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfer() {
        let request = ClientRequest::parse(
            r#"{"type":"transfer_call","data":{"uuid":"abc-1","destination":"3003"}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            ClientRequest::TransferCall(TransferRequest {
                uuid: "abc-1".to_string(),
                destination: "3003".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_without_data() {
        assert_eq!(
            ClientRequest::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientRequest::Ping
        );
        assert_eq!(
            ClientRequest::parse(r#"{"type":"get_active_calls","data":{}}"#).unwrap(),
            ClientRequest::GetActiveCalls
        );
    }

    #[test]
    fn test_empty_uuid_fails_validation() {
        let err = ClientRequest::parse(r#"{"type":"hangup_call","data":{"uuid":""}}"#)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_missing_field_is_invalid_input() {
        let err = ClientRequest::parse(r#"{"type":"park_call","data":{"uuid":"abc-1"}}"#)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_unknown_type() {
        let err = ClientRequest::parse(r#"{"type":"reboot"}"#).unwrap_err();
        assert!(err.to_string().contains("Unknown message type: reboot"));
    }

    #[test]
    fn test_ws_query_identity() {
        let query = WsQuery {
            client_id: Some("  ".to_string()),
        };
        assert_eq!(query.identity(), None);

        let query = WsQuery {
            client_id: Some("agent-7".to_string()),
        };
        assert_eq!(query.identity(), Some("agent-7"));
    }
}

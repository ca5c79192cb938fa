//! ESL event parsing and representation
//!
//! Plain events carry URL-encoded `Key: Value` headers inside the frame body,
//! optionally followed by an inner body announced by its own
//! `Content-Length`. JSON events carry the same fields as a flat object with
//! the inner body under `_body`. Both decode into `EslEvent`.

use crate::codec::{EslFrame, FrameKind};
use crate::events;
use chrono::{DateTime, TimeZone, Utc};
use cti_core::{AppError, AppResult};
use std::collections::HashMap;
use std::fmt;

/// A decoded switch event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EslEvent {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl EslEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an event from already decoded header pairs
    pub fn from_headers<K, V, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            body: None,
        }
    }

    /// Decode the event carried by an event frame
    pub fn from_frame(frame: &EslFrame) -> AppResult<Self> {
        let body = frame
            .body()
            .ok_or_else(|| AppError::Decode("event frame without body".to_string()))?;

        let event = match frame.kind() {
            FrameKind::EventPlain => Self::parse_plain(body)?,
            FrameKind::EventJson => Self::parse_json(body)?,
            other => {
                return Err(AppError::Decode(format!(
                    "{:?} frame is not an event",
                    other
                )))
            }
        };

        if event.event_name().is_none() {
            return Err(AppError::Decode("event without Event-Name".to_string()));
        }
        Ok(event)
    }

    /// Parse a `text/event-plain` body
    ///
    /// ```text
    /// Event-Name: CHANNEL_CREATE
    /// Unique-ID: abc-1
    /// Content-Length: 5
    ///
    /// hello
    /// ```
    pub fn parse_plain(raw: &str) -> AppResult<Self> {
        let (header_block, rest) = match raw.split_once("\n\n") {
            Some((headers, rest)) => (headers, rest),
            None => (raw, ""),
        };

        let mut headers = HashMap::new();
        for line in header_block.lines() {
            let line = line.trim_end_matches('\r');
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim_start();
            let decoded = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            headers.insert(key.trim().to_string(), decoded);
        }

        let body = match headers.get("Content-Length") {
            Some(len) => {
                let len: usize = len.trim().parse().map_err(|_| {
                    AppError::Decode(format!("invalid inner Content-Length {:?}", len))
                })?;
                let bytes = rest.as_bytes();
                if bytes.len() < len {
                    return Err(AppError::Decode(format!(
                        "inner body truncated: {} of {} bytes",
                        bytes.len(),
                        len
                    )));
                }
                Some(String::from_utf8_lossy(&bytes[..len]).into_owned())
            }
            None if !rest.trim().is_empty() => Some(rest.to_string()),
            None => None,
        };

        Ok(Self { headers, body })
    }

    /// Parse a `text/event-json` body
    pub fn parse_json(raw: &str) -> AppResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| AppError::Decode(format!("invalid event json: {}", e)))?;
        let serde_json::Value::Object(fields) = value else {
            return Err(AppError::Decode("event json is not an object".to_string()));
        };

        let mut headers = HashMap::with_capacity(fields.len());
        let mut body = None;
        for (key, value) in fields {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            if key == "_body" {
                body = Some(text);
            } else {
                headers.insert(key, text);
            }
        }

        Ok(Self { headers, body })
    }

    /// Get a header value by name
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = Some(body.into());
    }

    // Common event headers with convenient accessors

    pub fn event_name(&self) -> Option<&str> {
        self.get_header("Event-Name")
    }

    pub fn subclass(&self) -> Option<&str> {
        self.get_header("Event-Subclass")
    }

    /// Key handlers are registered under: the subclass for `CUSTOM` events,
    /// the event name otherwise. Always an exact header value.
    pub fn dispatch_key(&self) -> Option<&str> {
        match self.event_name()? {
            events::CUSTOM => self.subclass().or(Some(events::CUSTOM)),
            name => Some(name),
        }
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.get_header("Unique-ID")
            .or_else(|| self.get_header("Channel-Call-UUID"))
    }

    pub fn caller_number(&self) -> Option<&str> {
        self.get_header("Caller-Caller-ID-Number")
            .or_else(|| self.get_header("Caller-ANI"))
    }

    pub fn caller_name(&self) -> Option<&str> {
        self.get_header("Caller-Caller-ID-Name")
    }

    pub fn destination_number(&self) -> Option<&str> {
        self.get_header("Caller-Destination-Number")
    }

    pub fn direction(&self) -> Option<&str> {
        self.get_header("Call-Direction")
            .or_else(|| self.get_header("variable_direction"))
    }

    pub fn hangup_cause(&self) -> Option<&str> {
        self.get_header("Hangup-Cause")
            .or_else(|| self.get_header("variable_hangup_cause"))
    }

    pub fn hostname(&self) -> Option<&str> {
        self.get_header("FreeSWITCH-Hostname")
    }

    /// Conference sub-action (`add-member`, `del-member`, ...)
    pub fn action(&self) -> Option<&str> {
        self.get_header("Action")
    }

    /// `Event-Date-Timestamp` (microseconds since the epoch)
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let micros: i64 = self.get_header("Event-Date-Timestamp")?.parse().ok()?;
        Utc.timestamp_micros(micros).single()
    }

    /// Get a channel variable (`variable_<name>` header)
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        let key = format!("variable_{}", name);
        self.get_header(&key)
    }
}

impl fmt::Display for EslEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EslEvent {{")?;

        if let Some(event_name) = self.dispatch_key() {
            write!(f, " Event: {}", event_name)?;
        }

        if let Some(uuid) = self.unique_id() {
            write!(f, ", UUID: {}", uuid)?;
        }

        write!(f, ", Headers: {} }}", self.headers.len())
    }
}

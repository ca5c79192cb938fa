//! Length-delimited framing for the event socket
//!
//! Every frame is a block of `Key: Value` lines terminated by a blank line.
//! When the block carries `Content-Length`, exactly that many bytes of body
//! follow. The body is never scanned for blank lines, so event payloads that
//! contain them frame correctly.

use bytes::{BufMut, BytesMut};
use cti_core::AppError;
use std::collections::HashMap;
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on an unterminated header block
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Content types the switch puts on frames
pub mod content_type {
    pub const AUTH_REQUEST: &str = "auth/request";
    pub const COMMAND_REPLY: &str = "command/reply";
    pub const API_RESPONSE: &str = "api/response";
    pub const EVENT_PLAIN: &str = "text/event-plain";
    pub const EVENT_JSON: &str = "text/event-json";
    pub const DISCONNECT_NOTICE: &str = "text/disconnect-notice";
    pub const RUDE_REJECTION: &str = "text/rude-rejection";
}

/// Classification of a decoded frame by its `Content-Type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    AuthRequest,
    CommandReply,
    ApiResponse,
    EventPlain,
    EventJson,
    DisconnectNotice,
    RudeRejection,
    Unknown,
}

impl FrameKind {
    /// Replies that complete a pending command
    pub fn is_reply(&self) -> bool {
        matches!(self, FrameKind::CommandReply | FrameKind::ApiResponse)
    }

    pub fn is_event(&self) -> bool {
        matches!(self, FrameKind::EventPlain | FrameKind::EventJson)
    }
}

/// One frame off the wire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EslFrame {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl EslFrame {
    pub fn new(headers: HashMap<String, String>, body: Option<String>) -> Self {
        Self { headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn kind(&self) -> FrameKind {
        match self.content_type() {
            Some(content_type::AUTH_REQUEST) => FrameKind::AuthRequest,
            Some(content_type::COMMAND_REPLY) => FrameKind::CommandReply,
            Some(content_type::API_RESPONSE) => FrameKind::ApiResponse,
            Some(content_type::EVENT_PLAIN) => FrameKind::EventPlain,
            Some(content_type::EVENT_JSON) => FrameKind::EventJson,
            Some(content_type::DISCONNECT_NOTICE) => FrameKind::DisconnectNotice,
            Some(content_type::RUDE_REJECTION) => FrameKind::RudeRejection,
            _ => FrameKind::Unknown,
        }
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.header("Reply-Text")
    }

    /// Text a command caller cares about: `Reply-Text` for command replies,
    /// the body for api responses.
    pub fn result_text(&self) -> &str {
        match self.kind() {
            FrameKind::ApiResponse => self.body().unwrap_or("").trim_end(),
            _ => self.reply_text().unwrap_or(""),
        }
    }

    /// Check if the switch accepted the command
    pub fn is_ok(&self) -> bool {
        let text = self.result_text();
        !(text.starts_with("-ERR") || text.starts_with("-USAGE"))
    }
}

/// Frame decoder and command encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct EslCodec;

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_header_block(block: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(block);
    let mut headers = HashMap::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), value.trim_start().to_string());
        }
    }
    headers
}

impl Decoder for EslCodec {
    type Item = EslFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<EslFrame>, AppError> {
        // stray separators between frames
        let leading = src.iter().take_while(|b| **b == b'\n' || **b == b'\r').count();
        if leading > 0 {
            let _ = src.split_to(leading);
        }

        let Some(header_end) = find_header_end(src) else {
            if src.len() > MAX_HEADER_BYTES {
                return Err(AppError::Decode(format!(
                    "header block exceeds {} bytes",
                    MAX_HEADER_BYTES
                )));
            }
            return Ok(None);
        };

        let headers = parse_header_block(&src[..header_end]);
        let content_length = match headers.get("Content-Length") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                AppError::Decode(format!("invalid Content-Length {:?}", raw))
            })?,
            None => 0,
        };

        let body_start = header_end + 2;
        let frame_len = body_start + content_length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let body = (content_length > 0)
            .then(|| String::from_utf8_lossy(&frame[body_start..]).into_owned());

        Ok(Some(EslFrame { headers, body }))
    }
}

impl Encoder<String> for EslCodec {
    type Error = AppError;

    fn encode(&mut self, command: String, dst: &mut BytesMut) -> Result<(), AppError> {
        if command.contains(|c| c == '\n' || c == '\r') {
            return Err(AppError::InvalidInput(
                "command must be a single line".to_string(),
            ));
        }
        dst.reserve(command.len() + 2);
        dst.put_slice(command.as_bytes());
        dst.put_slice(b"\n\n");
        Ok(())
    }
}

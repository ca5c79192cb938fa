//! FreeSWITCH Event Socket Layer (ESL) client for the CTI bridge
//!
//! This crate speaks the switch's inbound event socket protocol: it
//! authenticates, subscribes to the event feed, correlates command replies
//! with their callers and dispatches decoded events to registered handlers.
//!
//! # Features
//!
//! - Length-delimited frame decoding (`tokio_util::codec`)
//! - Command/reply correlation alongside an interleaved event stream
//! - Exact event dispatch by name (or subclass for `CUSTOM` events)
//! - Call-control helpers (originate, transfer, park, hangup)
//! - Fixed-delay connect retry policy
//! - Optional tunnel (see `cti-tunnel`) owned for the lifetime of a session
//!
//! # Architecture
//!
//! ```text
//! FreeSWITCH event socket
//!         |
//!         v
//!   reader task (FramedRead<EslCodec>)
//!         |                    \
//!   command/reply, api/response  text/event-*
//!         |                      |
//!         v                      v
//!  pending send_command    dispatcher task
//!       callers                  |
//!                                v
//!                       EventHandler (registration order)
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use cti_esl::{EslClient, RetryPolicy};
//!
//! let client = EslClient::new(config.freeswitch.clone(), None);
//! client.register_handler(events::CHANNEL_CREATE, handler.clone());
//! client.connect_with_retry(&RetryPolicy::default()).await?;
//! let uuid = client.originate("1001", "2002").await?;
//! ```

pub mod client;
pub mod codec;
pub mod event;
pub mod retry;

pub use client::{EslClient, EventHandler};
pub use codec::{EslCodec, EslFrame, FrameKind};
pub use event::EslEvent;
pub use retry::{connect_with_retry, RetryPolicy};

/// ESL protocol constants
pub mod constants {
    /// Default ESL password (FreeSWITCH default)
    pub const DEFAULT_PASSWORD: &str = "ClueCon";

    /// Authentication command
    pub const AUTH_COMMAND: &str = "auth";

    /// Event subscription command
    pub const EVENT_COMMAND: &str = "event";

    /// API command prefix
    pub const API_COMMAND: &str = "api";

    /// Orbit prefix understood by the park dialplan
    pub const PARK_PREFIX: &str = "park+";

    /// Bound on joining the reader and dispatcher tasks on disconnect
    pub const DISCONNECT_TIMEOUT_SECS: u64 = 5;
}

/// Event names and subclasses the bridge reacts to
pub mod events {
    pub const CHANNEL_CREATE: &str = "CHANNEL_CREATE";
    pub const CHANNEL_ANSWER: &str = "CHANNEL_ANSWER";
    pub const CHANNEL_HOLD: &str = "CHANNEL_HOLD";
    pub const CHANNEL_UNHOLD: &str = "CHANNEL_UNHOLD";
    pub const CHANNEL_PARK: &str = "CHANNEL_PARK";
    pub const CHANNEL_UNPARK: &str = "CHANNEL_UNPARK";
    pub const CHANNEL_HANGUP: &str = "CHANNEL_HANGUP";
    pub const CHANNEL_HANGUP_COMPLETE: &str = "CHANNEL_HANGUP_COMPLETE";

    /// Events carrying their real kind in `Event-Subclass`
    pub const CUSTOM: &str = "CUSTOM";

    /// Conference module subclass (`Action: add-member|del-member`)
    pub const CONFERENCE_MANIAC: &str = "conference::maniac";
    pub const CONFERENCE_MEMBER_ADD: &str = "CONFERENCE_MEMBER_ADD";
    pub const CONFERENCE_MEMBER_DEL: &str = "CONFERENCE_MEMBER_DEL";

    /// Every dispatch key the call state manager consumes
    pub const CALL_EVENTS: &[&str] = &[
        CHANNEL_CREATE,
        CHANNEL_ANSWER,
        CHANNEL_HOLD,
        CHANNEL_UNHOLD,
        CHANNEL_PARK,
        CHANNEL_UNPARK,
        CHANNEL_HANGUP,
        CHANNEL_HANGUP_COMPLETE,
        CONFERENCE_MANIAC,
        CONFERENCE_MEMBER_ADD,
        CONFERENCE_MEMBER_DEL,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(constants::DEFAULT_PASSWORD, "ClueCon");
        assert_eq!(constants::AUTH_COMMAND, "auth");
    }

    #[test]
    fn test_call_events() {
        assert!(events::CALL_EVENTS.contains(&events::CHANNEL_CREATE));
        assert!(events::CALL_EVENTS.contains(&events::CONFERENCE_MANIAC));
        assert!(!events::CALL_EVENTS.contains(&"DTMF"));
    }
}

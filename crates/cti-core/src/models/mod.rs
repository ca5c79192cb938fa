//! Domain models for the CTI bridge
//!
//! Live call state, park orbits and relayed conference notifications.

pub mod call;
pub mod conference;
pub mod park;

pub use call::{CallDirection, CallSession, CallState, ExtensionRef};
pub use conference::ConferenceEvent;
pub use park::ParkOrbit;

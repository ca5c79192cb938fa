//! Call state and client fan-out services for the CTI bridge
//!
//! # Services
//!
//! - `CallStateManager` - folds switch events into the live call snapshot,
//!   persists transitions and emits deltas
//! - `BroadcastHub` - registered client connections, broadcast and
//!   addressed delivery with pruning of unreachable clients
//!
//! Both are constructed once by the process entry point and shared behind
//! `Arc`; nothing here is global.

pub mod broadcast;
pub mod call_manager;
pub mod messages;

pub use broadcast::{BroadcastHub, ClientSink, ConnectionId};
pub use call_manager::{CallEvent, CallStateManager};
pub use messages::{ClientMessage, CommandOutcome};

//! Local port forwarding through an SSH gateway
//!
//! The switch's event socket is usually only reachable from the switch host
//! itself. This crate authenticates to a gateway, binds an ephemeral port on
//! the loopback interface and forwards every local connection to one fixed
//! remote `host:port` over the established control channel.
//!
//! # Architecture
//!
//! ```text
//!  local client ──TCP──> TunnelForwarder (127.0.0.1:ephemeral)
//!                              |
//!                              v
//!                     ForwardSession::open_forward
//!                              |
//!                   SSH direct-tcpip channel (or plain TCP)
//!                              |
//!                              v
//!                     remote host:port (event socket)
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use cti_tunnel::{SshTransport, Tunnel, TunnelForwarder};
//!
//! let transport = SshTransport::from_config(&config.tunnel, config.freeswitch.port);
//! let tunnel = TunnelForwarder::new(transport, config.tunnel.stop_timeout());
//! let local = tunnel.start().await?;
//! // connect to `local` as if it were the switch
//! tunnel.stop().await;
//! ```

pub mod forwarder;
pub mod ssh;
pub mod transport;

pub use forwarder::{Tunnel, TunnelForwarder};
pub use ssh::SshTransport;
pub use transport::{BoxedStream, DirectTransport, ForwardSession, TunnelTransport};

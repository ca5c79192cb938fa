//! Transport seams for the forwarder
//!
//! A `TunnelTransport` establishes the control channel once; the resulting
//! `ForwardSession` then opens one forwarded stream per local connection.

use async_trait::async_trait;
use cti_core::{AppError, AppResult};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Byte stream carried by a forwarded pairing
pub trait ForwardStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ForwardStream for T {}

pub type BoxedStream = Box<dyn ForwardStream>;

/// Establishes the authenticated control channel
#[async_trait]
pub trait TunnelTransport: Send + Sync + 'static {
    type Session: ForwardSession;

    /// Authenticate and open the control channel.
    ///
    /// Fails with `AppError::Auth` on credential or host key rejection and
    /// `AppError::Connection` when the gateway is unreachable.
    async fn establish(&self) -> AppResult<Self::Session>;

    /// Human readable target, for logs
    fn describe(&self) -> String;
}

/// An established control channel able to multiplex forwarded streams
#[async_trait]
pub trait ForwardSession: Send + Sync + 'static {
    /// Open a stream to the fixed remote endpoint on behalf of `originator`
    async fn open_forward(&self, originator: SocketAddr) -> AppResult<BoxedStream>;

    /// Close the control channel
    async fn close(&self);
}

/// Plain TCP "tunnel" used when the switch is directly reachable
#[derive(Debug, Clone)]
pub struct DirectTransport {
    host: String,
    port: u16,
}

impl DirectTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl TunnelTransport for DirectTransport {
    type Session = DirectTransport;

    async fn establish(&self) -> AppResult<Self::Session> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("direct://{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl ForwardSession for DirectTransport {
    async fn open_forward(&self, originator: SocketAddr) -> AppResult<BoxedStream> {
        debug!(%originator, host = %self.host, port = self.port, "Opening direct forward");
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                AppError::Connection(format!("{}:{} unreachable: {}", self.host, self.port, e))
            })?;
        Ok(Box::new(stream))
    }

    async fn close(&self) {}
}

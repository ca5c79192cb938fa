//! Loopback listener that pairs each local connection with a forwarded stream

use crate::transport::{ForwardSession, TunnelTransport};
use async_trait::async_trait;
use cti_core::{AppError, AppResult};
use parking_lot::RwLock;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Object-safe handle the switch client uses to drive a tunnel
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Establish the tunnel and return the local address to connect to.
    /// Calling it again while running returns the same address.
    async fn start(&self) -> AppResult<SocketAddr>;

    /// Tear the tunnel down. Safe to call when not running.
    async fn stop(&self);

    fn local_addr(&self) -> Option<SocketAddr>;
}

struct Running<S> {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    session: Arc<S>,
}

/// Forwards connections accepted on `127.0.0.1:<ephemeral>` through a
/// `TunnelTransport` session.
pub struct TunnelForwarder<T: TunnelTransport> {
    transport: T,
    stop_timeout: Duration,
    running: Mutex<Option<Running<T::Session>>>,
    local_addr: RwLock<Option<SocketAddr>>,
    active: Arc<AtomicUsize>,
}

impl<T: TunnelTransport> TunnelForwarder<T> {
    pub fn new(transport: T, stop_timeout: Duration) -> Self {
        Self {
            transport,
            stop_timeout,
            running: Mutex::new(None),
            local_addr: RwLock::new(None),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of pairings currently carrying traffic
    pub fn active_forwards(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

#[async_trait]
impl<T: TunnelTransport> Tunnel for TunnelForwarder<T> {
    async fn start(&self) -> AppResult<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(existing) = running.as_ref() {
            return Ok(existing.local_addr);
        }

        let target = self.transport.describe();
        let session = Arc::new(self.transport.establish().await?);

        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await {
            Ok(listener) => listener,
            Err(e) => {
                session.close().await;
                return Err(AppError::Connection(format!(
                    "Failed to bind local forward port: {}",
                    e
                )));
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                session.close().await;
                return Err(AppError::Connection(format!(
                    "Failed to read local forward address: {}",
                    e
                )));
            }
        };

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            session.clone(),
            cancel.clone(),
            self.active.clone(),
        ));

        *running = Some(Running {
            local_addr,
            cancel,
            accept_task,
            session,
        });
        *self.local_addr.write() = Some(local_addr);

        info!(%local_addr, target = %target, "Tunnel established");
        Ok(local_addr)
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        *self.local_addr.write() = None;

        running.cancel.cancel();
        let mut accept_task = running.accept_task;
        if timeout(self.stop_timeout, &mut accept_task).await.is_err() {
            warn!(
                timeout_secs = self.stop_timeout.as_secs(),
                "Forwarder did not drain in time, aborting"
            );
            accept_task.abort();
        }

        if timeout(self.stop_timeout, running.session.close())
            .await
            .is_err()
        {
            warn!("Tunnel session close timed out");
        }

        info!(local_addr = %running.local_addr, "Tunnel stopped");
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }
}

impl<T: TunnelTransport> Drop for TunnelForwarder<T> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
            running.accept_task.abort();
        }
    }
}

async fn accept_loop<S: ForwardSession>(
    listener: TcpListener,
    session: Arc<S>,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) {
    let mut pairings = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Accepted local connection");
                    pairings.spawn(forward_connection(
                        stream,
                        peer,
                        session.clone(),
                        cancel.clone(),
                        active.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed on forward listener");
                }
            },
            Some(joined) = pairings.join_next(), if !pairings.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "Forward pairing panicked");
                    }
                }
            }
        }
    }

    drop(listener);
    while pairings.join_next().await.is_some() {}
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn forward_connection<S: ForwardSession>(
    mut local: TcpStream,
    peer: SocketAddr,
    session: Arc<S>,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) {
    let remote = match session.open_forward(peer).await {
        Ok(remote) => remote,
        Err(e) => {
            warn!(%peer, error = %e, "Forward request rejected");
            return;
        }
    };
    let _guard = ActiveGuard::enter(active);

    let (mut local_rd, mut local_wr) = local.split();
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    // Whichever direction finishes first tears down both sides
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!(%peer, "Pairing cancelled");
        }
        result = tokio::io::copy(&mut local_rd, &mut remote_wr) => {
            debug!(%peer, ?result, "Local side closed");
        }
        result = tokio::io::copy(&mut remote_rd, &mut local_wr) => {
            debug!(%peer, ?result, "Remote side closed");
        }
    }

    let _ = remote_wr.shutdown().await;
    let _ = local_wr.shutdown().await;
}

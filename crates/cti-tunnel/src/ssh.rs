//! SSH gateway transport built on russh

use crate::transport::{BoxedStream, ForwardSession, TunnelTransport};
use async_trait::async_trait;
use cti_core::config::TunnelConfig;
use cti_core::{AppError, AppResult};
use russh::client::{self, Handle};
use russh::Disconnect;
use russh_keys::key;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Public key authenticated SSH gateway that forwards to one remote endpoint
#[derive(Debug, Clone)]
pub struct SshTransport {
    ssh_host: String,
    ssh_port: u16,
    username: String,
    private_key_path: PathBuf,
    key_passphrase: Option<String>,
    remote_host: String,
    remote_port: u16,
    host_key_fingerprint: Option<String>,
    connect_timeout: Duration,
}

impl SshTransport {
    /// Build from the tunnel section, forwarding to `remote_port` on the
    /// configured remote host.
    pub fn from_config(config: &TunnelConfig, remote_port: u16) -> Self {
        Self {
            ssh_host: config.ssh_host.clone(),
            ssh_port: config.ssh_port,
            username: config.username.clone(),
            private_key_path: config.private_key_path.clone(),
            key_passphrase: config.key_passphrase.clone(),
            remote_host: config.remote_host.clone(),
            remote_port,
            host_key_fingerprint: config.host_key_fingerprint.clone(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    fn load_key(&self) -> AppResult<key::KeyPair> {
        russh_keys::load_secret_key(&self.private_key_path, self.key_passphrase.as_deref())
            .map_err(|e| {
                AppError::Auth(format!(
                    "Cannot load private key {}: {}",
                    self.private_key_path.display(),
                    e
                ))
            })
    }
}

/// Strip the `SHA256:` prefix and base64 padding so fingerprints compare
/// regardless of how they were copied out of `ssh-keygen`.
fn normalize_fingerprint(value: &str) -> &str {
    let value = value.trim();
    let value = value.strip_prefix("SHA256:").unwrap_or(value);
    value.trim_end_matches('=')
}

struct GatewayHandler {
    expected_fingerprint: Option<String>,
    host_key_rejected: Arc<AtomicBool>,
}

#[async_trait]
impl client::Handler for GatewayHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let Some(expected) = self.expected_fingerprint.as_deref() else {
            return Ok(true);
        };

        let presented = server_public_key.fingerprint();
        if normalize_fingerprint(&presented) == normalize_fingerprint(expected) {
            Ok(true)
        } else {
            warn!(presented = %presented, "Gateway host key does not match the pinned fingerprint");
            self.host_key_rejected.store(true, Ordering::SeqCst);
            Ok(false)
        }
    }
}

#[async_trait]
impl TunnelTransport for SshTransport {
    type Session = SshSession;

    #[instrument(skip(self), fields(gateway = %self.ssh_host, port = self.ssh_port))]
    async fn establish(&self) -> AppResult<SshSession> {
        let key_pair = self.load_key()?;
        let host_key_rejected = Arc::new(AtomicBool::new(false));
        let handler = GatewayHandler {
            expected_fingerprint: self.host_key_fingerprint.clone(),
            host_key_rejected: host_key_rejected.clone(),
        };

        let config = Arc::new(client::Config::default());
        let connect = client::connect(config, (self.ssh_host.as_str(), self.ssh_port), handler);
        let mut handle = match timeout(self.connect_timeout, connect).await {
            Err(_) => {
                return Err(AppError::Timeout(format!(
                    "SSH connect to {}:{}",
                    self.ssh_host, self.ssh_port
                )))
            }
            Ok(Err(e)) if host_key_rejected.load(Ordering::SeqCst) => {
                return Err(AppError::Auth(format!("Host key rejected: {}", e)))
            }
            Ok(Err(e)) => {
                return Err(AppError::Connection(format!(
                    "SSH connect to {}:{} failed: {}",
                    self.ssh_host, self.ssh_port, e
                )))
            }
            Ok(Ok(handle)) => handle,
        };

        let authenticated = handle
            .authenticate_publickey(self.username.as_str(), Arc::new(key_pair))
            .await
            .map_err(|e| AppError::Connection(format!("SSH authentication failed: {}", e)))?;
        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(AppError::Auth(format!(
                "Public key for {} rejected by {}",
                self.username, self.ssh_host
            )));
        }

        info!(user = %self.username, "SSH gateway authenticated");
        Ok(SshSession {
            handle,
            remote_host: self.remote_host.clone(),
            remote_port: self.remote_port,
        })
    }

    fn describe(&self) -> String {
        format!(
            "ssh://{}@{}:{} -> {}:{}",
            self.username, self.ssh_host, self.ssh_port, self.remote_host, self.remote_port
        )
    }
}

/// Authenticated gateway connection
pub struct SshSession {
    handle: Handle<GatewayHandler>,
    remote_host: String,
    remote_port: u16,
}

#[async_trait]
impl ForwardSession for SshSession {
    async fn open_forward(&self, originator: SocketAddr) -> AppResult<BoxedStream> {
        debug!(%originator, remote = %self.remote_host, port = self.remote_port, "Opening direct-tcpip channel");
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                self.remote_host.as_str(),
                u32::from(self.remote_port),
                originator.ip().to_string(),
                u32::from(originator.port()),
            )
            .await
            .map_err(|e| AppError::Connection(format!("Forward channel refused: {}", e)))?;

        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(error = %e, "SSH disconnect after session already closed");
        }
    }
}

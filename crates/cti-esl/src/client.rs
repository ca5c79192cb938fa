//! Event socket client
//!
//! One `EslClient` owns at most one live session. A session consists of the
//! write half (shared by command callers), a FIFO of reply waiters, a reader
//! task that demultiplexes replies from events, and a dispatcher task that
//! runs handlers in arrival order. Handlers may issue commands: replies are
//! delivered by the reader, which never waits on a handler.

use crate::codec::{EslCodec, EslFrame, FrameKind};
use crate::constants;
use crate::event::EslEvent;
use crate::retry::{self, RetryPolicy};
use async_trait::async_trait;
use cti_core::config::FreeSwitchConfig;
use cti_core::{AppError, AppResult};
use cti_tunnel::Tunnel;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Receives events registered under a dispatch key
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &EslEvent);
}

type HandlerMap = HashMap<String, Vec<Arc<dyn EventHandler>>>;
type ReplyWaiter = oneshot::Sender<AppResult<EslFrame>>;
type PendingReplies = Arc<SyncMutex<ReplyQueue>>;
type FrameReader = FramedRead<OwnedReadHalf, EslCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, EslCodec>;

/// Reply waiters in command order. Closed for good once the session ends.
#[derive(Default)]
struct ReplyQueue {
    waiters: VecDeque<ReplyWaiter>,
    closed: bool,
}

impl ReplyQueue {
    fn push(&mut self, waiter: ReplyWaiter) -> AppResult<()> {
        if self.closed {
            return Err(AppError::Connection("event socket closed".to_string()));
        }
        self.waiters.push_back(waiter);
        Ok(())
    }

    fn close(&mut self) -> Vec<ReplyWaiter> {
        self.closed = true;
        self.waiters.drain(..).collect()
    }
}

struct Session {
    writer: Arc<Mutex<FrameWriter>>,
    pending: PendingReplies,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

struct Inner {
    config: FreeSwitchConfig,
    tunnel: Option<Arc<dyn Tunnel>>,
    session: Mutex<Option<Session>>,
    handlers: Arc<RwLock<HandlerMap>>,
    connected: Arc<AtomicBool>,
}

/// Inbound event socket client. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct EslClient {
    inner: Arc<Inner>,
}

impl EslClient {
    /// Create a disconnected client. With a tunnel, `connect` starts it and
    /// connects to its local endpoint instead of `config.host:config.port`.
    pub fn new(config: FreeSwitchConfig, tunnel: Option<Arc<dyn Tunnel>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                tunnel,
                session: Mutex::new(None),
                handlers: Arc::new(RwLock::new(HashMap::new())),
                connected: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Register `handler` for an exact dispatch key (event name, or subclass
    /// for `CUSTOM` events). Handlers for one key run in registration order.
    pub fn register_handler(&self, kind: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let kind = kind.into();
        debug!(kind = %kind, "Registering event handler");
        self.inner
            .handlers
            .write()
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Open the socket, authenticate, subscribe and start the read loop.
    /// A no-op while already connected.
    #[instrument(skip(self), fields(host = %self.inner.config.host, port = self.inner.config.port))]
    pub async fn connect(&self) -> AppResult<()> {
        let mut slot = self.inner.session.lock().await;
        if let Some(stale) = slot.take() {
            if self.is_connected() {
                *slot = Some(stale);
                return Ok(());
            }
            teardown(stale).await;
        }

        let endpoint = match &self.inner.tunnel {
            Some(tunnel) => tunnel.start().await?.to_string(),
            None => format!("{}:{}", self.inner.config.host, self.inner.config.port),
        };

        let (reader, writer) = match self.handshake(&endpoint).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Event socket handshake failed");
                if let Some(tunnel) = &self.inner.tunnel {
                    tunnel.stop().await;
                }
                return Err(e);
            }
        };

        let pending: PendingReplies = Arc::new(SyncMutex::new(ReplyQueue::default()));
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.inner.connected.store(true, Ordering::SeqCst);

        let reader = tokio::spawn(read_loop(
            reader,
            pending.clone(),
            events_tx,
            cancel.clone(),
            self.inner.connected.clone(),
        ));
        let dispatcher = tokio::spawn(dispatch_loop(events_rx, self.inner.handlers.clone()));

        *slot = Some(Session {
            writer: Arc::new(Mutex::new(writer)),
            pending,
            cancel,
            reader,
            dispatcher,
        });

        info!(
            endpoint = %endpoint,
            format = self.inner.config.event_format.as_str(),
            "Connected to FreeSWITCH event socket"
        );
        Ok(())
    }

    /// `connect` under a fixed-delay retry policy
    pub async fn connect_with_retry(&self, policy: &RetryPolicy) -> AppResult<()> {
        retry::connect_with_retry(policy, |attempt| {
            debug!(attempt, "Connecting to event socket");
            self.connect()
        })
        .await
    }

    /// Stop the read loop, close the socket and release the tunnel.
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let session = self.inner.session.lock().await.take();
        self.inner.connected.store(false, Ordering::SeqCst);

        if let Some(session) = session {
            teardown(session).await;
            info!("Disconnected from FreeSWITCH event socket");
        }
        if let Some(tunnel) = &self.inner.tunnel {
            tunnel.stop().await;
        }
    }

    /// Send one command and wait for its correlated reply.
    ///
    /// Returns the reply text (`Reply-Text` or api body). `-ERR`/`-USAGE`
    /// replies become `AppError::Command`.
    pub async fn send_command(&self, command: &str) -> AppResult<String> {
        if command.contains(|c| c == '\n' || c == '\r') {
            return Err(AppError::InvalidInput(
                "command must be a single line".to_string(),
            ));
        }
        let verb = command.split_whitespace().take(2).collect::<Vec<_>>().join(" ");

        let (writer, pending) = self.session_handles().await?;
        let (tx, rx) = oneshot::channel();
        {
            let mut writer = writer.lock().await;
            if !self.is_connected() {
                return Err(AppError::NotConnected);
            }
            pending.lock().push(tx)?;
            if let Err(e) = writer.send(command.to_string()).await {
                pending.lock().waiters.pop_back();
                warn!(command = %verb, error = %e, "Failed to write command");
                return Err(e);
            }
        }
        debug!(command = %verb, "Command sent");

        let frame = match timeout(self.inner.config.command_timeout(), rx).await {
            Err(_) => return Err(AppError::Timeout(format!("no reply to {}", verb))),
            Ok(Err(_)) => {
                return Err(AppError::Connection(
                    "connection closed before reply".to_string(),
                ))
            }
            Ok(Ok(reply)) => reply?,
        };

        let text = frame.result_text().to_string();
        if frame.is_ok() {
            Ok(text)
        } else {
            debug!(command = %verb, reply = %text, "Command rejected");
            Err(AppError::Command { raw_response: text })
        }
    }

    /// Run an `api` command
    pub async fn api(&self, command: &str) -> AppResult<String> {
        self.send_command(&format!("{} {}", constants::API_COMMAND, command))
            .await
    }

    /// Ring `extension` and bridge it to `destination`; returns the new
    /// channel id reported by the switch.
    pub async fn originate(&self, extension: &str, destination: &str) -> AppResult<String> {
        require_token("extension", extension)?;
        require_token("destination", destination)?;
        let reply = self
            .api(&format!("originate user/{} {}", extension, destination))
            .await?;
        Ok(ok_payload(&reply))
    }

    pub async fn transfer(&self, call_uuid: &str, destination: &str) -> AppResult<String> {
        require_token("call_uuid", call_uuid)?;
        require_token("destination", destination)?;
        self.api(&format!("uuid_transfer {} {}", call_uuid, destination))
            .await
    }

    pub async fn park(&self, call_uuid: &str, orbit: &str) -> AppResult<String> {
        require_token("call_uuid", call_uuid)?;
        require_token("orbit", orbit)?;
        self.api(&format!(
            "uuid_transfer {} {}{}",
            call_uuid,
            constants::PARK_PREFIX,
            orbit
        ))
        .await
    }

    pub async fn hangup(&self, call_uuid: &str) -> AppResult<String> {
        require_token("call_uuid", call_uuid)?;
        self.api(&format!("uuid_kill {}", call_uuid)).await
    }

    async fn session_handles(&self) -> AppResult<(Arc<Mutex<FrameWriter>>, PendingReplies)> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        let slot = self.inner.session.lock().await;
        slot.as_ref()
            .map(|s| (s.writer.clone(), s.pending.clone()))
            .ok_or(AppError::NotConnected)
    }

    async fn handshake(&self, endpoint: &str) -> AppResult<(FrameReader, FrameWriter)> {
        let config = &self.inner.config;
        let step = config.handshake_timeout();

        let stream = timeout(step, TcpStream::connect(endpoint))
            .await
            .map_err(|_| AppError::Timeout(format!("connecting to {}", endpoint)))?
            .map_err(|e| AppError::Connection(format!("{}: {}", endpoint, e)))?;
        let (rd, wr) = stream.into_split();
        let mut reader = FramedRead::new(rd, EslCodec);
        let mut writer = FramedWrite::new(wr, EslCodec);

        let greeting = next_frame(&mut reader, step, "greeting").await?;
        match greeting.kind() {
            FrameKind::AuthRequest => {}
            FrameKind::RudeRejection => {
                return Err(AppError::Auth(format!(
                    "connection refused by switch: {}",
                    greeting.body().unwrap_or("").trim()
                )))
            }
            other => {
                return Err(AppError::Connection(format!(
                    "unexpected greeting {:?}",
                    other
                )))
            }
        }

        write_frame(
            &mut writer,
            format!("{} {}", constants::AUTH_COMMAND, config.password),
            step,
        )
        .await?;
        let reply = next_reply(&mut reader, step, "auth reply").await?;
        if !reply.result_text().starts_with("+OK") {
            return Err(AppError::Auth(reply.result_text().to_string()));
        }
        debug!("Authenticated");

        write_frame(
            &mut writer,
            format!(
                "{} {} ALL",
                constants::EVENT_COMMAND,
                config.event_format.as_str()
            ),
            step,
        )
        .await?;
        let reply = next_reply(&mut reader, step, "subscription reply").await?;
        if !reply.result_text().starts_with("+OK") {
            return Err(AppError::Command {
                raw_response: reply.result_text().to_string(),
            });
        }
        debug!(format = config.event_format.as_str(), "Subscribed to all events");

        Ok((reader, writer))
    }
}

fn require_token(name: &str, value: &str) -> AppResult<()> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(AppError::InvalidInput(format!(
            "{} must be a non-empty value without whitespace",
            name
        )));
    }
    Ok(())
}

/// `+OK <payload>` → `<payload>`
fn ok_payload(reply: &str) -> String {
    reply
        .strip_prefix("+OK")
        .map(str::trim)
        .unwrap_or(reply)
        .to_string()
}

async fn write_frame(writer: &mut FrameWriter, command: String, step: Duration) -> AppResult<()> {
    timeout(step, writer.send(command))
        .await
        .map_err(|_| AppError::Timeout("writing handshake command".to_string()))?
}

async fn next_frame(reader: &mut FrameReader, step: Duration, waiting_for: &str) -> AppResult<EslFrame> {
    match timeout(step, reader.next()).await {
        Err(_) => Err(AppError::Timeout(format!("waiting for {}", waiting_for))),
        Ok(None) => Err(AppError::Connection(format!(
            "connection closed while waiting for {}",
            waiting_for
        ))),
        Ok(Some(frame)) => frame,
    }
}

async fn next_reply(reader: &mut FrameReader, step: Duration, waiting_for: &str) -> AppResult<EslFrame> {
    loop {
        let frame = next_frame(reader, step, waiting_for).await?;
        match frame.kind() {
            kind if kind.is_reply() => return Ok(frame),
            FrameKind::RudeRejection => {
                return Err(AppError::Auth(frame.body().unwrap_or("").trim().to_string()))
            }
            FrameKind::DisconnectNotice => {
                return Err(AppError::Connection(format!(
                    "switch disconnected while waiting for {}",
                    waiting_for
                )))
            }
            other => debug!(kind = ?other, "Skipping frame during handshake"),
        }
    }
}

fn fail_pending(pending: &PendingReplies, reason: &str) {
    let waiters = pending.lock().close();
    for waiter in waiters {
        let _ = waiter.send(Err(AppError::Connection(reason.to_string())));
    }
}

async fn join_bounded(mut handle: JoinHandle<()>, bound: Duration, task: &str) {
    if timeout(bound, &mut handle).await.is_err() {
        warn!(task, "Task did not stop in time, aborting");
        handle.abort();
    }
}

async fn teardown(session: Session) {
    let bound = Duration::from_secs(constants::DISCONNECT_TIMEOUT_SECS);
    session.cancel.cancel();

    match timeout(bound, session.writer.lock()).await {
        Ok(mut writer) => {
            if let Ok(Err(e)) = timeout(bound, SinkExt::<String>::close(&mut *writer)).await {
                debug!(error = %e, "Socket already closed");
            }
        }
        Err(_) => warn!("Writer busy during disconnect, dropping it"),
    }

    fail_pending(&session.pending, "client disconnected");
    join_bounded(session.reader, bound, "reader").await;
    join_bounded(session.dispatcher, bound, "dispatcher").await;
}

async fn read_loop(
    mut reader: FrameReader,
    pending: PendingReplies,
    events: mpsc::UnboundedSender<EslEvent>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                error!(error = %e, "Event socket stream unreadable");
                break;
            }
            None => {
                warn!("Event socket closed by switch");
                break;
            }
        };

        match frame.kind() {
            kind if kind.is_reply() => {
                let waiter = pending.lock().waiters.pop_front();
                match waiter {
                    Some(waiter) => {
                        // waiter may have timed out; its slot still keeps replies in order
                        let _ = waiter.send(Ok(frame));
                    }
                    None => warn!(reply = frame.result_text(), "Reply without a pending command"),
                }
            }
            kind if kind.is_event() => match EslEvent::from_frame(&frame) {
                Ok(event) => {
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Dropping undecodable event"),
            },
            FrameKind::DisconnectNotice => {
                info!(
                    notice = frame.body().unwrap_or("").trim(),
                    "Switch sent disconnect notice"
                );
                break;
            }
            other => debug!(kind = ?other, "Ignoring frame"),
        }
    }

    connected.store(false, Ordering::SeqCst);
    fail_pending(&pending, "event socket closed");
}

async fn dispatch_loop(
    mut events: mpsc::UnboundedReceiver<EslEvent>,
    handlers: Arc<RwLock<HandlerMap>>,
) {
    while let Some(event) = events.recv().await {
        let Some(key) = event.dispatch_key() else {
            continue;
        };
        let targets = handlers.read().get(key).cloned().unwrap_or_default();
        if targets.is_empty() {
            debug!(event = key, "No handler registered");
            continue;
        }
        for handler in targets {
            handler.handle_event(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_token() {
        assert!(require_token("uuid", "abc-1").is_ok());
        assert!(matches!(
            require_token("uuid", ""),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            require_token("destination", "1001 &park()"),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ok_payload() {
        assert_eq!(ok_payload("+OK 7f4de4bc-1234"), "7f4de4bc-1234");
        assert_eq!(ok_payload("queued"), "queued");
    }

    #[tokio::test]
    async fn test_closed_reply_queue_fails_fast() {
        let pending: PendingReplies = Arc::new(SyncMutex::new(ReplyQueue::default()));
        let (queued, queued_rx) = oneshot::channel();
        pending.lock().push(queued).unwrap();

        fail_pending(&pending, "event socket closed");
        assert!(matches!(queued_rx.await, Ok(Err(AppError::Connection(_)))));

        // a command racing the reader's exit must not wait for a reply
        let (late, _late_rx) = oneshot::channel();
        let err = pending.lock().push(late).unwrap_err();
        assert!(matches!(err, AppError::Connection(_)));
        assert!(pending.lock().waiters.is_empty());
    }

    #[tokio::test]
    async fn test_send_command_when_disconnected() {
        let client = EslClient::new(FreeSwitchConfig::default(), None);
        assert!(!client.is_connected());
        let err = client.api("status").await.unwrap_err();
        assert!(matches!(err, AppError::NotConnected));
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_io() {
        let client = EslClient::new(FreeSwitchConfig::default(), None);
        let err = client.park("abc-1", "").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        let err = client.send_command("api status\n\nexit").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = EslClient::new(FreeSwitchConfig::default(), None);
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());
    }
}

//! WebSocket client feed
//!
//! Each connection is registered with the broadcast hub (under `client_id`
//! when given), receives the active call snapshot, then call deltas as they
//! happen. Call-control requests arrive on the same socket.

use crate::dto::{ClientRequest, WsQuery};
use crate::handlers::calls::execute;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{Message, MessageStream, Session};
use async_trait::async_trait;
use cti_core::{AppError, AppResult};
use cti_services::{BroadcastHub, ClientMessage, ClientSink, ConnectionId};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound half of a WebSocket session
struct WsSink {
    session: Session,
}

#[async_trait]
impl ClientSink for WsSink {
    async fn send_text(&self, text: &str) -> AppResult<()> {
        let mut session = self.session.clone();
        session
            .text(text.to_owned())
            .await
            .map_err(|_| AppError::Connection("WebSocket closed".to_string()))
    }
}

/// GET /ws?client_id=...
pub async fn ws_handler(
    req: HttpRequest,
    body: web::Payload,
    query: web::Query<WsQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;

    let client_ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();
    let identity = query.identity().map(str::to_string);

    let sink = Arc::new(WsSink {
        session: session.clone(),
    });
    let connection_id = state.hub.connect(sink, identity.as_deref());
    info!(client = %client_ip, connection_id = %connection_id, "WebSocket connection established");

    let state = state.get_ref().clone();
    actix_web::rt::spawn(async move {
        ws_session(state, session, msg_stream, connection_id, identity).await;
    });

    Ok(response)
}

async fn ws_session(
    state: AppState,
    mut session: Session,
    mut msg_stream: MessageStream,
    connection_id: ConnectionId,
    identity: Option<String>,
) {
    let snapshot = ClientMessage::ActiveCalls(state.calls.get_active_calls());
    if !state.hub.send_to_connection(connection_id, &snapshot).await {
        warn!(connection_id = %connection_id, "Failed to send snapshot, closing connection");
        let _ = session.close(None).await;
        return;
    }

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = msg_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match ClientRequest::parse(&text) {
                            Ok(request) => execute(&state, request).await,
                            Err(e) => {
                                debug!(connection_id = %connection_id, error = %e, "Rejected client request");
                                ClientMessage::error(e.to_string())
                            }
                        };
                        if !reply_to(&state.hub, connection_id, &reply).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!(connection_id = %connection_id, "Client closed connection: {:?}", reason);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if session.ping(b"").await.is_err() {
                    warn!(connection_id = %connection_id, "Failed to send ping, closing connection");
                    break;
                }
            }
        }
    }

    state.hub.disconnect(connection_id, identity.as_deref());
    let _ = session.close(None).await;
    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Replies always go back on the connection that asked, even when a newer
/// connection has taken over the identity.
async fn reply_to(hub: &BroadcastHub, connection_id: ConnectionId, reply: &ClientMessage) -> bool {
    hub.send_to_connection(connection_id, reply).await
}

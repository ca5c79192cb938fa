//! CTI Bridge Server
//!
//! Connects to FreeSWITCH over the event socket (optionally through an SSH
//! tunnel), tracks live calls and pushes call state to WebSocket clients.

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use cti_api::{configure_routes, AppState};
use cti_core::traits::CallStore;
use cti_core::AppConfig;
use cti_db::{pool::pool_from_config, MemoryCallStore, PgCallStore};
use cti_esl::{EslClient, RetryPolicy};
use cti_services::{BroadcastHub, CallStateManager, ClientMessage};
use cti_tunnel::{SshTransport, Tunnel, TunnelForwarder};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cti_bridge={0},cti_api={0},cti_esl={0},cti_tunnel={0},cti_services={0},cti_db={0},actix_web=info,sqlx=warn,russh=warn",
            log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();
    }
}

fn build_tunnel(config: &AppConfig) -> Option<Arc<dyn Tunnel>> {
    if !config.tunnel.enabled {
        info!(
            host = %config.freeswitch.host,
            port = config.freeswitch.port,
            "Connecting to the switch directly"
        );
        return None;
    }

    let transport = SshTransport::from_config(&config.tunnel, config.freeswitch.port);
    info!(
        gateway = %config.tunnel.ssh_host,
        remote = %config.tunnel.remote_host,
        "Reaching the switch through an SSH tunnel"
    );
    Some(Arc::new(TunnelForwarder::new(
        transport,
        config.tunnel.stop_timeout(),
    )))
}

fn cors(origins: &str) -> Cors {
    let origins: Vec<String> = origins
        .split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();

    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            origin
                .to_str()
                .map(|origin| origins.iter().any(|o| o == origin))
                .unwrap_or(false)
        })
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting CTI Bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;

    let store: Arc<dyn CallStore> = match pool_from_config(&config.database)
        .await
        .context("Failed to connect to the database")?
    {
        Some(pool) => Arc::new(PgCallStore::new(pool)),
        None => {
            warn!("No database configured, call records are kept in memory only");
            Arc::new(MemoryCallStore::new())
        }
    };

    let hub = Arc::new(BroadcastHub::new());
    let calls = Arc::new(CallStateManager::new(store, hub.clone()));

    let esl = EslClient::new(config.freeswitch.clone(), build_tunnel(&config));
    calls.subscribe(&esl);

    let policy = RetryPolicy::from(&config.reconnect);
    {
        let esl = esl.clone();
        let hub = hub.clone();
        actix_web::rt::spawn(async move {
            if let Err(e) = esl.connect_with_retry(&policy).await {
                error!(error = %e, "Switch connection could not be established");
                hub.broadcast(&ClientMessage::error(format!("Switch unavailable: {}", e)))
                    .await;
            }
        });
    }

    let state = AppState::new(esl.clone(), calls, hub);
    let bind_addr = config.server_addr();
    let cors_origins = config.server.cors_origins.clone();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, config.server.workers
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors(&cors_origins))
            .wrap(TracingLogger::default())
            .configure(configure_routes)
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(config.server.workers)
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await
    .context("HTTP server failed")?;

    info!("Shutting down");
    esl.disconnect().await;
    Ok(())
}

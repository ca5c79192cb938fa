//! API layer for the CTI bridge
//!
//! HTTP handlers for health and call snapshot reads, call-control endpoints,
//! and the `/ws` client feed.

pub mod dto;
pub mod handlers;
pub mod state;

pub use dto::{ApiResponse, ClientRequest};
pub use handlers::{configure_calls, configure_health, ws_handler};
pub use state::AppState;

use actix_web::web;

/// Mount every route under its prefix
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(configure_health)
            .configure(configure_calls),
    )
    .route("/ws", web::get().to(ws_handler));
}

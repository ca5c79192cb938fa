//! Health check

use crate::dto::HealthResponse;
use crate::state::AppState;
use actix_web::{web, HttpResponse};

/// GET /api/v1/health
///
/// Always 200; `status` is `degraded` while the switch connection is down.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let esl_connected = state.esl.is_connected();
    HttpResponse::Ok().json(HealthResponse {
        status: if esl_connected { "healthy" } else { "degraded" }.to_string(),
        service: "cti-bridge".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        esl_connected,
        active_calls: state.calls.active_count(),
        clients: state.hub.connection_count(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}

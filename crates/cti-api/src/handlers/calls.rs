//! Call handlers
//!
//! Snapshot reads come from the call state manager; call-control requests go
//! straight to the switch client. The same execution path serves the REST
//! endpoints and the WebSocket feed.

use crate::dto::{
    ApiResponse, ClientRequest, HangupRequest, OriginateRequest, ParkRequest, TransferRequest,
};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use cti_core::{AppError, AppResult};
use cti_services::{ClientMessage, CommandOutcome};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Run one feed request and build the reply for the requesting client
pub async fn execute(state: &AppState, request: ClientRequest) -> ClientMessage {
    debug!(request = request.kind(), "Executing client request");
    match request {
        ClientRequest::TransferCall(req) => outcome(
            state.esl.transfer(&req.uuid, &req.destination).await,
            Some(req.uuid),
            "Call transfer initiated",
            ClientMessage::TransferResult,
        ),
        ClientRequest::ParkCall(req) => outcome(
            state.esl.park(&req.uuid, &req.orbit).await,
            Some(req.uuid),
            "Call park initiated",
            ClientMessage::ParkResult,
        ),
        ClientRequest::HangupCall(req) => outcome(
            state.esl.hangup(&req.uuid).await,
            Some(req.uuid),
            "Call hangup initiated",
            ClientMessage::HangupResult,
        ),
        ClientRequest::OriginateCall(req) => {
            match state.esl.originate(&req.extension, &req.destination).await {
                Ok(call_uuid) => ClientMessage::OriginateResult(CommandOutcome::ok(
                    Some(call_uuid),
                    "Call originated",
                )),
                Err(e) => outcome(Err(e), None, "", ClientMessage::OriginateResult),
            }
        }
        ClientRequest::GetActiveCalls => ClientMessage::ActiveCalls(state.calls.get_active_calls()),
        ClientRequest::Ping => ClientMessage::Pong {
            timestamp: Utc::now(),
        },
    }
}

fn outcome(
    result: AppResult<String>,
    call_uuid: Option<String>,
    done: &str,
    wrap: fn(CommandOutcome) -> ClientMessage,
) -> ClientMessage {
    match result {
        Ok(_) => wrap(CommandOutcome::ok(call_uuid, done)),
        Err(AppError::NotConnected) => ClientMessage::error("ESL connection not available"),
        Err(e) => {
            warn!(call_uuid = call_uuid.as_deref().unwrap_or("-"), error = %e, "Call control failed");
            wrap(CommandOutcome::failed(call_uuid, e.to_string()))
        }
    }
}

/// GET /api/v1/calls/active
#[instrument(skip(state))]
pub async fn list_active_calls(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(state.calls.get_active_calls()))
}

/// GET /api/v1/calls/{uuid}
#[instrument(skip(state))]
pub async fn get_call(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let uuid = path.into_inner();
    let call = state
        .calls
        .get_call(&uuid)
        .ok_or_else(|| AppError::NotFound(format!("Call {} not found", uuid)))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(call)))
}

/// GET /api/v1/park-orbits
#[instrument(skip(state))]
pub async fn list_park_orbits(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(state.calls.park_orbits()))
}

/// POST /api/v1/calls/transfer
#[instrument(skip(state, req), fields(call_uuid = %req.uuid))]
pub async fn transfer_call(
    state: web::Data<AppState>,
    req: web::Json<TransferRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    state.esl.transfer(&req.uuid, &req.destination).await?;
    info!(destination = %req.destination, "Call transfer initiated");

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        CommandOutcome::ok(Some(req.uuid.clone()), "transferred"),
        "Call transfer initiated",
    )))
}

/// POST /api/v1/calls/park
#[instrument(skip(state, req), fields(call_uuid = %req.uuid))]
pub async fn park_call(
    state: web::Data<AppState>,
    req: web::Json<ParkRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    state.esl.park(&req.uuid, &req.orbit).await?;
    info!(orbit = %req.orbit, "Call park initiated");

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        CommandOutcome::ok(Some(req.uuid.clone()), "parked"),
        "Call park initiated",
    )))
}

/// POST /api/v1/calls/hangup
#[instrument(skip(state, req), fields(call_uuid = %req.uuid))]
pub async fn hangup_call(
    state: web::Data<AppState>,
    req: web::Json<HangupRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    state.esl.hangup(&req.uuid).await?;
    info!("Call hangup initiated");

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        CommandOutcome::ok(Some(req.uuid.clone()), "hung up"),
        "Call hangup initiated",
    )))
}

/// POST /api/v1/calls/originate
#[instrument(skip(state, req), fields(extension = %req.extension))]
pub async fn originate_call(
    state: web::Data<AppState>,
    req: web::Json<OriginateRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    let call_uuid = state.esl.originate(&req.extension, &req.destination).await?;
    info!(call_uuid = %call_uuid, "Call originated");

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        CommandOutcome::ok(Some(call_uuid), "originated"),
        "Call originated",
    )))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/calls")
            .route("/active", web::get().to(list_active_calls))
            .route("/transfer", web::post().to(transfer_call))
            .route("/park", web::post().to(park_call))
            .route("/hangup", web::post().to(hangup_call))
            .route("/originate", web::post().to(originate_call))
            .route("/{uuid}", web::get().to(get_call)),
    )
    .route("/park-orbits", web::get().to(list_park_orbits));
}

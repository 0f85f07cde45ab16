//! services/api/src/web/admin.rs
//!
//! Back-office endpoints. Every route here sits behind `require_auth` and
//! `require_admin`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use stage_booking_core::domain::{CurrentUser, PermitDecision};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ErrorBody, ErrorResponse};
use crate::web::rest::{
    InvoiceResponse, PermitDecisionBody, PermitResponse, ReminderResponse, StageRequest,
    StageResponse,
};
use crate::web::state::AppState;

/// POST /admin/stages - Create a stage
#[utoipa::path(
    post,
    path = "/admin/stages",
    request_body = StageRequest,
    responses(
        (status = 201, description = "Stage created", body = StageResponse),
        (status = 400, description = "Invalid stage", body = ErrorBody),
        (status = 403, description = "Administrator role required", body = ErrorBody),
        (status = 409, description = "Stage number already used", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn create_stage_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    payload: Result<Json<StageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StageResponse>), ErrorResponse> {
    let Json(req) = payload?;
    let stage = state.booking.create_stage(admin, req.into()).await?;
    Ok((StatusCode::CREATED, Json(stage.into())))
}

/// PUT /admin/stages/{id} - Replace the details of a stage
#[utoipa::path(
    put,
    path = "/admin/stages/{id}",
    params(("id" = Uuid, Path, description = "Stage id")),
    request_body = StageRequest,
    responses(
        (status = 200, description = "Stage updated", body = StageResponse),
        (status = 400, description = "Invalid stage", body = ErrorBody),
        (status = 404, description = "Unknown stage", body = ErrorBody),
        (status = 409, description = "Stage number already used", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn update_stage_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(stage_id): Path<Uuid>,
    payload: Result<Json<StageRequest>, JsonRejection>,
) -> Result<Json<StageResponse>, ErrorResponse> {
    let Json(req) = payload?;
    let stage = state.booking.update_stage(admin, stage_id, req.into()).await?;
    Ok(Json(stage.into()))
}

/// PUT /admin/users/{id}/permit - Record the review of a user's driving permit
#[utoipa::path(
    put,
    path = "/admin/users/{id}/permit",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = PermitDecisionBody,
    responses(
        (status = 200, description = "Permit status updated", body = PermitResponse),
        (status = 400, description = "Unknown decision", body = ErrorBody),
        (status = 404, description = "Unknown user", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn decide_permit_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(user_id): Path<Uuid>,
    payload: Result<Json<PermitDecisionBody>, JsonRejection>,
) -> Result<Json<PermitResponse>, ErrorResponse> {
    let Json(body) = payload?;
    let decision = match body.decision.as_str() {
        "verified" => PermitDecision::Verified,
        "rejected" => PermitDecision::Rejected {
            reason: body.reason.filter(|r| !r.trim().is_empty()),
        },
        other => {
            return Err(ErrorResponse::bad_request(format!(
                "decision must be 'verified' or 'rejected', got '{}'",
                other
            )))
        }
    };

    let (user, notified) = state.booking.decide_permit(admin, user_id, decision).await?;
    Ok(Json(PermitResponse::new(&user, notified)))
}

/// POST /admin/stages/{id}/reminders - Remind every paid attendee of a stage
#[utoipa::path(
    post,
    path = "/admin/stages/{id}/reminders",
    params(("id" = Uuid, Path, description = "Stage id")),
    responses(
        (status = 200, description = "Reminders dispatched", body = ReminderResponse),
        (status = 404, description = "Unknown stage", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn send_reminders_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(stage_id): Path<Uuid>,
) -> Result<Json<ReminderResponse>, ErrorResponse> {
    let report = state.booking.send_reminders(admin, stage_id).await?;
    Ok(Json(ReminderResponse {
        sent: report.sent,
        failed: report.failed,
    }))
}

/// POST /admin/reservations/{id}/invoice - Regenerate the invoice of a paid reservation
#[utoipa::path(
    post,
    path = "/admin/reservations/{id}/invoice",
    params(("id" = Uuid, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Invoice regenerated", body = InvoiceResponse),
        (status = 404, description = "Unknown reservation", body = ErrorBody),
        (status = 409, description = "Reservation is not paid", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn regenerate_invoice_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, ErrorResponse> {
    let invoice = state.booking.regenerate_invoice(admin, reservation_id).await?;
    Ok(Json(invoice.into()))
}

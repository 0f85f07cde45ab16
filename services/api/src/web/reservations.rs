//! services/api/src/web/reservations.rs
//!
//! Reservation endpoints for logged-in clients: direct booking, listing,
//! cancellation and the start of a card checkout.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use stage_booking_core::domain::{CurrentUser, PaymentMethod, StageType};
use stage_booking_core::CheckoutRequest;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{ErrorBody, ErrorResponse};
use crate::web::rest::{CheckoutBody, CheckoutResponse, CreateReservationRequest, ReservationResponse};
use crate::web::state::AppState;

/// POST /reservations - Book a seat to be paid by check, cash, transfer or card
#[utoipa::path(
    post,
    path = "/reservations",
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Unpaid reservation created", body = ReservationResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 404, description = "Unknown stage", body = ErrorBody),
        (status = 409, description = "Already reserved or no seat left", body = ErrorBody)
    ),
    tag = "booking"
)]
pub async fn create_reservation_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<CreateReservationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReservationResponse>), ErrorResponse> {
    let Json(req) = payload?;
    let payment_method = req
        .payment_method
        .parse::<PaymentMethod>()
        .map_err(ErrorResponse::bad_request)?;
    let stage_type = req
        .stage_type
        .parse::<StageType>()
        .map_err(ErrorResponse::bad_request)?;

    let reservation = state
        .booking
        .reserve(user, req.stage_id, payment_method, stage_type)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation.into())))
}

/// GET /reservations/mine - Reservations held by the current user
#[utoipa::path(
    get,
    path = "/reservations/mine",
    responses(
        (status = 200, description = "The user's reservations", body = [ReservationResponse]),
        (status = 401, description = "Not logged in", body = ErrorBody)
    ),
    tag = "booking"
)]
pub async fn my_reservations_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ReservationResponse>>, ErrorResponse> {
    let reservations = state.booking.reservations_for(user).await?;
    Ok(Json(reservations.into_iter().map(ReservationResponse::from).collect()))
}

/// POST /reservations/{id}/cancel - Cancel an unpaid reservation
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    params(("id" = Uuid, Path, description = "Reservation id")),
    responses(
        (status = 204, description = "Reservation cancelled"),
        (status = 403, description = "Not the owner", body = ErrorBody),
        (status = 404, description = "Unknown reservation", body = ErrorBody),
        (status = 409, description = "Reservation is already paid", body = ErrorBody)
    ),
    tag = "booking"
)]
pub async fn cancel_reservation_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(reservation_id): Path<Uuid>,
) -> Result<StatusCode, ErrorResponse> {
    state.booking.cancel_reservation(user, reservation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /checkout - Open a hosted card checkout for a stage
///
/// Nothing is booked until the gateway reports the completed payment.
#[utoipa::path(
    post,
    path = "/checkout",
    request_body = CheckoutBody,
    responses(
        (status = 200, description = "Redirect URL of the checkout page", body = CheckoutResponse),
        (status = 400, description = "Missing or invalid field", body = ErrorBody),
        (status = 403, description = "Checkout on behalf of another user", body = ErrorBody),
        (status = 409, description = "Already paid or no seat left", body = ErrorBody),
        (status = 502, description = "Payment gateway failure", body = ErrorBody)
    ),
    tag = "booking"
)]
pub async fn checkout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, ErrorResponse> {
    let Json(body) = payload?;
    let request = CheckoutRequest {
        stage_id: body.stage_id,
        stage_title: body.stage_title,
        stage_price: body.stage_price,
        user_id: body.user_id,
        stage_type: body.stage_type,
    };

    let url = state.booking.start_checkout(user, request).await?;
    info!("Redirecting user {} to checkout", user.id);
    Ok(Json(CheckoutResponse { url }))
}

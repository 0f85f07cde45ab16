//! services/api/src/web/payments.rs
//!
//! The two ways a reservation becomes paid: the gateway's signed webhook and an
//! administrator validating a payment received by other means.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Extension, Json,
};
use stage_booking_core::domain::CurrentUser;
use stage_booking_core::ports::{GatewayEvent, PortError};
use stage_booking_core::{BookingError, ValidatePaymentRequest};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ErrorBody, ErrorResponse};
use crate::web::rest::{ConfirmationResponse, ValidatePaymentBody, WebhookAck};
use crate::web::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

fn ack(outcome: &str) -> Json<WebhookAck> {
    Json(WebhookAck {
        received: true,
        outcome: outcome.to_string(),
    })
}

/// POST /webhooks/payments - Payment gateway event delivery
///
/// The raw body is authenticated against the signature header before anything
/// in it is trusted.
#[utoipa::path(
    post,
    path = "/webhooks/payments",
    request_body(content = String, description = "Raw gateway event", content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex>")),
    responses(
        (status = 200, description = "Event processed or ignored", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature", body = ErrorBody),
        (status = 409, description = "Payment cannot be applied", body = ErrorBody),
        (status = 500, description = "Confirmation failed, seat released", body = ErrorBody)
    ),
    tag = "payments"
)]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, ErrorResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ErrorResponse::bad_request("Missing webhook signature"))?;

    let event = state
        .payments
        .verify_webhook(signature, &body)
        .map_err(|e| match e {
            PortError::Unauthorized => {
                warn!("Rejected webhook delivery with a bad signature");
                ErrorResponse::bad_request("Invalid webhook signature")
            }
            other => {
                warn!("Rejected webhook delivery: {:?}", other);
                ErrorResponse::bad_request("Malformed webhook payload")
            }
        })?;

    let metadata = match event {
        GatewayEvent::CheckoutCompleted {
            session_id,
            metadata,
        } => {
            info!("Checkout session {} completed", session_id);
            metadata
        }
        GatewayEvent::Other(kind) => {
            info!("Ignoring gateway event {}", kind);
            return Ok(ack("ignored"));
        }
    };

    match state.booking.handle_checkout_completed(&metadata).await {
        Ok(confirmation) => {
            info!(
                "Reservation {} paid through checkout, {} seat(s) left",
                confirmation.reservation.id, confirmation.seats_available
            );
            Ok(ack("confirmed"))
        }
        // Redeliveries of an event that was already applied.
        Err(BookingError::AlreadyPaid) => Ok(ack("already_paid")),
        Err(e) => Err(e.into()),
    }
}

/// POST /admin/payments/validate - Confirm a payment received outside the gateway
#[utoipa::path(
    post,
    path = "/admin/payments/validate",
    request_body = ValidatePaymentBody,
    responses(
        (status = 200, description = "Reservation paid", body = ConfirmationResponse),
        (status = 403, description = "Administrator role required", body = ErrorBody),
        (status = 404, description = "Unknown reservation", body = ErrorBody),
        (status = 409, description = "ALREADY_PAID, NO_PLACES_AVAILABLE or MISMATCHED_IDS", body = ErrorBody),
        (status = 500, description = "Confirmation failed, seat released", body = ErrorBody)
    ),
    tag = "payments"
)]
pub async fn validate_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    payload: Result<Json<ValidatePaymentBody>, JsonRejection>,
) -> Result<Json<ConfirmationResponse>, ErrorResponse> {
    let Json(body) = payload?;
    let confirmation = state
        .booking
        .validate_payment(
            admin,
            ValidatePaymentRequest {
                user_id: body.user_id,
                stage_id: body.stage_id,
                reservation_id: body.reservation_id,
            },
        )
        .await?;

    info!(
        "Admin {} validated payment of reservation {}",
        admin.id, confirmation.reservation.id
    );
    Ok(Json(confirmation.into()))
}

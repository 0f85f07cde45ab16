//! services/api/src/web/rest.rs
//!
//! Contains the request and response payloads of the REST API and the master
//! definition for the OpenAPI specification.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use stage_booking_core::domain::{Invoice, Reservation, Stage, StageDraft, User};
use stage_booking_core::Confirmation;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::ErrorBody;
use crate::web::{account, admin, auth, invoices, payments, reservations, stages};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        stages::list_stages_handler,
        stages::get_stage_handler,
        reservations::create_reservation_handler,
        reservations::my_reservations_handler,
        reservations::cancel_reservation_handler,
        reservations::checkout_handler,
        payments::webhook_handler,
        payments::validate_payment_handler,
        invoices::my_invoices_handler,
        invoices::invoice_document_handler,
        admin::create_stage_handler,
        admin::update_stage_handler,
        admin::decide_permit_handler,
        admin::send_reminders_handler,
        admin::regenerate_invoice_handler,
        account::submit_permit_handler,
    ),
    components(
        schemas(
            ErrorBody,
            auth::SignupRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            StageResponse,
            StageRequest,
            ReservationResponse,
            CreateReservationRequest,
            CheckoutBody,
            CheckoutResponse,
            ValidatePaymentBody,
            ConfirmationResponse,
            WebhookAck,
            InvoiceResponse,
            PermitDecisionBody,
            PermitResponse,
            ReminderResponse,
        )
    ),
    tags(
        (name = "auth", description = "Account creation and login sessions."),
        (name = "stages", description = "Public course catalog."),
        (name = "booking", description = "Reservations, checkout and cancellation."),
        (name = "payments", description = "Payment confirmation, from the gateway or an administrator."),
        (name = "invoices", description = "Invoices issued for paid reservations."),
        (name = "admin", description = "Back-office operations."),
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Stages
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageResponse {
    pub id: Uuid,
    pub title: String,
    pub address: String,
    pub postal_code: String,
    pub city: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub morning_window: String,
    pub afternoon_window: String,
    pub price_cents: i64,
    pub number: String,
    pub seats_available: i32,
    pub hidden: bool,
}

impl From<Stage> for StageResponse {
    fn from(stage: Stage) -> Self {
        Self {
            id: stage.id,
            title: stage.title,
            address: stage.address,
            postal_code: stage.postal_code,
            city: stage.city,
            start_date: stage.start_date,
            end_date: stage.end_date,
            morning_window: stage.morning_window,
            afternoon_window: stage.afternoon_window,
            price_cents: stage.price_cents,
            number: stage.number,
            seats_available: stage.seats_available,
            hidden: stage.hidden,
        }
    }
}

/// The fields an administrator sends to create or replace a stage.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageRequest {
    pub title: String,
    pub address: String,
    pub postal_code: String,
    pub city: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub morning_window: String,
    pub afternoon_window: String,
    pub price_cents: i64,
    pub number: String,
    pub seats_available: i32,
    #[serde(default)]
    pub hidden: bool,
}

impl From<StageRequest> for StageDraft {
    fn from(req: StageRequest) -> Self {
        Self {
            title: req.title,
            address: req.address,
            postal_code: req.postal_code,
            city: req.city,
            start_date: req.start_date,
            end_date: req.end_date,
            morning_window: req.morning_window,
            afternoon_window: req.afternoon_window,
            price_cents: req.price_cents,
            number: req.number,
            seats_available: req.seats_available,
            hidden: req.hidden,
        }
    }
}

//=========================================================================================
// Reservations and Checkout
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stage_id: Uuid,
    pub paid: bool,
    pub payment_method: String,
    #[serde(rename = "typeStage")]
    pub stage_type: String,
    pub created_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            id: reservation.id,
            user_id: reservation.user_id,
            stage_id: reservation.stage_id,
            paid: reservation.paid,
            payment_method: reservation.payment_method.as_str().to_string(),
            stage_type: reservation.stage_type.as_str().to_string(),
            created_at: reservation.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub stage_id: Uuid,
    /// One of `card`, `check`, `cash`, `transfer`.
    pub payment_method: String,
    /// One of `case1` to `case4`.
    #[serde(rename = "typeStage")]
    pub stage_type: String,
}

/// Every field is optional on the wire so that absent ones can be reported together.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub stage_id: Option<Uuid>,
    pub stage_title: Option<String>,
    /// Price in cents. Must match the stored price of the stage.
    pub stage_price: Option<i64>,
    pub user_id: Option<Uuid>,
    #[serde(rename = "typeStage")]
    pub stage_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub url: String,
}

//=========================================================================================
// Payments
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePaymentBody {
    pub user_id: Uuid,
    pub stage_id: Uuid,
    pub reservation_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    pub reservation: ReservationResponse,
    pub seats_available: i32,
}

impl From<Confirmation> for ConfirmationResponse {
    fn from(confirmation: Confirmation) -> Self {
        Self {
            reservation: confirmation.reservation.into(),
            seats_available: confirmation.seats_available,
        }
    }
}

/// Acknowledgement returned to the payment gateway.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// `confirmed`, `already_paid` or `ignored`.
    pub outcome: String,
}

//=========================================================================================
// Invoices
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub number: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            reservation_id: invoice.reservation_id,
            number: invoice.number,
            amount_cents: invoice.amount_cents,
            currency: invoice.currency,
            status: invoice.status.as_str().to_string(),
            created_at: invoice.created_at,
        }
    }
}

//=========================================================================================
// Admin
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermitDecisionBody {
    /// `verified` or `rejected`.
    pub decision: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermitResponse {
    pub user_id: Uuid,
    pub permit_status: String,
    /// Whether the user could be told about the decision.
    pub notified: bool,
}

impl PermitResponse {
    pub fn new(user: &User, notified: bool) -> Self {
        Self {
            user_id: user.id,
            permit_status: user.permit_status.as_str().to_string(),
            notified,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReminderResponse {
    pub sent: usize,
    pub failed: usize,
}

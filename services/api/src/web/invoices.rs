//! services/api/src/web/invoices.rs

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use stage_booking_core::domain::CurrentUser;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ErrorBody, ErrorResponse};
use crate::web::rest::InvoiceResponse;
use crate::web::state::AppState;

/// GET /invoices/mine - Invoices issued to the current user
#[utoipa::path(
    get,
    path = "/invoices/mine",
    responses(
        (status = 200, description = "Invoice metadata", body = [InvoiceResponse]),
        (status = 401, description = "Not logged in", body = ErrorBody)
    ),
    tag = "invoices"
)]
pub async fn my_invoices_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<InvoiceResponse>>, ErrorResponse> {
    let invoices = state.booking.invoices_for(user).await?;
    Ok(Json(invoices.into_iter().map(InvoiceResponse::from).collect()))
}

/// GET /invoices/{id}/document - Download the rendered invoice
#[utoipa::path(
    get,
    path = "/invoices/{id}/document",
    params(("id" = Uuid, Path, description = "Invoice id")),
    responses(
        (status = 200, description = "The invoice document", body = String, content_type = "text/plain"),
        (status = 403, description = "Invoice belongs to someone else", body = ErrorBody),
        (status = 404, description = "Unknown invoice", body = ErrorBody)
    ),
    tag = "invoices"
)]
pub async fn invoice_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let invoice = state.booking.invoice(user, invoice_id).await?;
    let disposition = format!("attachment; filename=\"{}.txt\"", invoice.number);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        invoice.document,
    ))
}

//! services/api/src/web/account.rs

use axum::{extract::State, Extension, Json};
use stage_booking_core::domain::CurrentUser;
use std::sync::Arc;

use crate::error::{ErrorBody, ErrorResponse};
use crate::web::rest::PermitResponse;
use crate::web::state::AppState;

/// PUT /me/permit - Submit the uploaded driving permit for review
#[utoipa::path(
    put,
    path = "/me/permit",
    responses(
        (status = 200, description = "Permit is pending review", body = PermitResponse),
        (status = 401, description = "Not logged in", body = ErrorBody),
        (status = 409, description = "Permit already verified", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn submit_permit_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<PermitResponse>, ErrorResponse> {
    let updated = state.booking.submit_permit(user).await?;
    Ok(Json(PermitResponse::new(&updated, false)))
}

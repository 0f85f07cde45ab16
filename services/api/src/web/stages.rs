//! services/api/src/web/stages.rs
//!
//! Public course catalog.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ErrorBody, ErrorResponse};
use crate::web::rest::StageResponse;
use crate::web::state::AppState;

/// GET /stages - Upcoming, visible stages ordered by start date
#[utoipa::path(
    get,
    path = "/stages",
    responses(
        (status = 200, description = "Upcoming stages", body = [StageResponse]),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    tag = "stages"
)]
pub async fn list_stages_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StageResponse>>, ErrorResponse> {
    let stages = state.booking.public_stages(Utc::now().date_naive()).await?;
    Ok(Json(stages.into_iter().map(StageResponse::from).collect()))
}

/// GET /stages/{id} - A single visible stage
#[utoipa::path(
    get,
    path = "/stages/{id}",
    params(("id" = Uuid, Path, description = "Stage id")),
    responses(
        (status = 200, description = "The stage", body = StageResponse),
        (status = 404, description = "Unknown or hidden stage", body = ErrorBody)
    ),
    tag = "stages"
)]
pub async fn get_stage_handler(
    State(state): State<Arc<AppState>>,
    Path(stage_id): Path<Uuid>,
) -> Result<Json<StageResponse>, ErrorResponse> {
    let stage = state.booking.visible_stage(stage_id).await?;
    Ok(Json(stage.into()))
}

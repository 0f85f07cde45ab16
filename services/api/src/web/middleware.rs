//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use stage_booking_core::domain::CurrentUser;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ErrorResponse;
use crate::web::state::AppState;

pub const SESSION_COOKIE: &str = "session";

/// Reads the auth session id out of the `Cookie` header, if any.
pub fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| {
            c.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|id| !id.is_empty())
}

/// Middleware that validates the auth session cookie.
///
/// If valid, inserts the `CurrentUser` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ErrorResponse> {
    let auth_session_id = session_id(req.headers()).ok_or_else(ErrorResponse::unauthorized)?;

    let current_user = state
        .db
        .validate_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            debug!("Rejected auth session: {:?}", e);
            ErrorResponse::unauthorized()
        })?;

    req.extensions_mut().insert(current_user);
    Ok(next.run(req).await)
}

/// Must run after `require_auth`. Rejects anyone who is not an administrator.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ErrorResponse> {
    match req.extensions().get::<CurrentUser>() {
        Some(user) if user.is_admin() => Ok(next.run(req).await),
        Some(user) => {
            warn!("User {} attempted to reach {}", user.id, req.uri().path());
            Err(ErrorResponse::new(
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Administrator role required",
            ))
        }
        None => Err(ErrorResponse::unauthorized()),
    }
}

//! services/api/src/web/state.rs
//!
//! Defines the application state shared by every handler.

use crate::config::Config;
use stage_booking_core::ports::{DatabaseService, PaymentGateway};
use stage_booking_core::BookingService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    /// Used directly only to authenticate webhook deliveries.
    pub payments: Arc<dyn PaymentGateway>,
    pub booking: BookingService,
}

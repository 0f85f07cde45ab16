//! crates/stage_booking_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the booking core.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the database, the payment gateway and the mail transport.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{
    CurrentUser, Invoice, NewUser, PaymentMethod, PermitDecision, PermitStatus, Reservation,
    Stage, StageDraft, StageType, User, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflicting state: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Seat Accounting Outcomes
//=========================================================================================

/// Result of the atomic "check paid, check seats, decrement, mark paid" unit.
#[derive(Debug, Clone, PartialEq)]
pub enum SeatClaim {
    /// The reservation is now paid and one seat was taken.
    Claimed {
        reservation: Reservation,
        seats_available: i32,
    },
    /// Nothing changed: the reservation was paid before.
    AlreadyPaid,
    /// Nothing changed: the stage had no seat left.
    NoPlacesAvailable,
}

/// Result of the atomic "refuse if paid, delete, give the seat back" unit.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled { seats_available: i32 },
    AlreadyPaid,
}

//=========================================================================================
// Payment Gateway Types
//=========================================================================================

pub const META_USER_ID: &str = "userId";
pub const META_STAGE_ID: &str = "stageId";
pub const META_RESERVATION_ID: &str = "reservationId";
pub const META_STAGE_TYPE: &str = "typeStage";

/// Context embedded in a checkout session so the asynchronous confirmation
/// can find the reservation again.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutMetadata {
    pub user_id: Uuid,
    pub stage_id: Uuid,
    pub reservation_id: Option<Uuid>,
    pub stage_type: StageType,
}

impl CheckoutMetadata {
    /// Flattens the metadata into the key/value pairs sent to the gateway.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (META_USER_ID, self.user_id.to_string()),
            (META_STAGE_ID, self.stage_id.to_string()),
            (META_STAGE_TYPE, self.stage_type.to_string()),
        ];
        if let Some(reservation_id) = self.reservation_id {
            pairs.push((META_RESERVATION_ID, reservation_id.to_string()));
        }
        pairs
    }

    /// Parses the metadata map carried by a gateway event.
    ///
    /// An empty `reservationId` counts as absent.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, String> {
        let required = |key: &str| {
            map.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("metadata field '{}' is missing", key))
        };
        let parse_id = |key: &str, raw: &str| {
            Uuid::parse_str(raw).map_err(|_| format!("metadata field '{}' is not a valid id", key))
        };

        let user_id = parse_id(META_USER_ID, required(META_USER_ID)?)?;
        let stage_id = parse_id(META_STAGE_ID, required(META_STAGE_ID)?)?;
        let stage_type = required(META_STAGE_TYPE)?.parse::<StageType>()?;
        let reservation_id = match map.get(META_RESERVATION_ID).map(|v| v.trim()) {
            Some(raw) if !raw.is_empty() => Some(parse_id(META_RESERVATION_ID, raw)?),
            _ => None,
        };

        Ok(Self {
            user_id,
            stage_id,
            reservation_id,
            stage_type,
        })
    }
}

/// Everything the gateway needs to host a one-item checkout page.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutOrder {
    pub stage_title: String,
    pub price_cents: i64,
    pub metadata: CheckoutMetadata,
}

/// A verified event delivered by the payment gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    CheckoutCompleted {
        session_id: String,
        metadata: HashMap<String, String>,
    },
    Other(String),
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn create_user(&self, user: &NewUser, hashed_password: &str) -> PortResult<User>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn set_permit_status(&self, user_id: Uuid, status: PermitStatus) -> PortResult<User>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<CurrentUser>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Course Catalog ---
    /// Visible stages starting on or after `from`, earliest first.
    async fn list_public_stages(&self, from: NaiveDate) -> PortResult<Vec<Stage>>;

    async fn get_stage(&self, stage_id: Uuid) -> PortResult<Stage>;

    async fn create_stage(&self, draft: &StageDraft) -> PortResult<Stage>;

    async fn update_stage(&self, stage_id: Uuid, draft: &StageDraft) -> PortResult<Stage>;

    // --- Reservations ---
    /// Fails with `PortError::Conflict` when the user already holds a reservation for the stage.
    async fn create_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
        payment_method: PaymentMethod,
        stage_type: StageType,
    ) -> PortResult<Reservation>;

    /// Returns the existing reservation for `(user_id, stage_id)`, updated in place,
    /// or creates it.
    async fn upsert_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
        payment_method: PaymentMethod,
        stage_type: StageType,
    ) -> PortResult<Reservation>;

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation>;

    async fn find_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
    ) -> PortResult<Option<Reservation>>;

    async fn list_reservations_for_user(&self, user_id: Uuid) -> PortResult<Vec<Reservation>>;

    async fn list_paid_reservations_for_stage(&self, stage_id: Uuid)
        -> PortResult<Vec<Reservation>>;

    // --- Seat Accounting ---
    /// Marks the reservation paid and takes one seat from its stage, atomically.
    async fn claim_seat(&self, reservation_id: Uuid) -> PortResult<SeatClaim>;

    /// Compensates a `claim_seat`: marks the reservation unpaid and gives the seat back.
    /// Returns the stage's seat count afterwards.
    async fn release_seat(&self, reservation_id: Uuid) -> PortResult<i32>;

    /// Deletes an unpaid reservation and increments its stage's seat count, atomically.
    async fn cancel_unpaid(&self, reservation_id: Uuid) -> PortResult<CancelOutcome>;

    // --- Invoices ---
    /// Stores the invoice, replacing any previous invoice for the same reservation.
    async fn upsert_invoice(&self, invoice: Invoice) -> PortResult<Invoice>;

    async fn get_invoice(&self, invoice_id: Uuid) -> PortResult<Invoice>;

    async fn list_invoices_for_user(&self, user_id: Uuid) -> PortResult<Vec<Invoice>>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted checkout session and returns the URL to redirect the user to.
    async fn create_checkout_session(&self, order: &CheckoutOrder) -> PortResult<String>;

    /// Verifies the signature of a raw webhook delivery and decodes it.
    ///
    /// Fails with `PortError::Unauthorized` when the signature does not match.
    fn verify_webhook(&self, signature_header: &str, payload: &str) -> PortResult<GatewayEvent>;
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Sends the booking confirmation with the convocation attached.
    async fn send_confirmation(
        &self,
        user: &User,
        stage: &Stage,
        stage_type: StageType,
    ) -> PortResult<()>;

    async fn send_permit_decision(&self, user: &User, decision: &PermitDecision)
        -> PortResult<()>;

    async fn send_reminder(&self, user: &User, stage: &Stage) -> PortResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_reservation_id_counts_as_absent() {
        let user_id = Uuid::new_v4();
        let stage_id = Uuid::new_v4();
        let metadata = CheckoutMetadata::from_map(&map(&[
            (META_USER_ID, &user_id.to_string()),
            (META_STAGE_ID, &stage_id.to_string()),
            (META_RESERVATION_ID, ""),
            (META_STAGE_TYPE, "case2"),
        ]))
        .unwrap();

        assert_eq!(metadata.reservation_id, None);
        assert_eq!(metadata.stage_type, StageType::Case2);
        assert_eq!(metadata.to_pairs().len(), 3);
    }

    #[test]
    fn missing_or_malformed_fields_are_named() {
        let err = CheckoutMetadata::from_map(&map(&[
            (META_USER_ID, "not-a-uuid"),
            (META_STAGE_ID, &Uuid::new_v4().to_string()),
            (META_STAGE_TYPE, "case1"),
        ]))
        .unwrap_err();
        assert!(err.contains(META_USER_ID));

        let err = CheckoutMetadata::from_map(&map(&[
            (META_USER_ID, &Uuid::new_v4().to_string()),
            (META_STAGE_ID, &Uuid::new_v4().to_string()),
        ]))
        .unwrap_err();
        assert!(err.contains(META_STAGE_TYPE));
    }
}

//! crates/stage_booking_core/src/booking.rs
//!
//! The booking workflow: checkout initiation, payment confirmation with its
//! compensating rollback, cancellation, and the admin operations around them.
//!
//! Payment confirmation runs as a small saga. The seat is claimed in one local
//! transaction, the confirmation mail is sent outside of it, and a second
//! transaction gives the seat back if the mail could not be delivered.

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::documents::build_invoice;
use crate::domain::{
    CurrentUser, Invoice, PaymentMethod, PermitDecision, PermitStatus, Reservation, Stage,
    StageDraft, StageType, User,
};
use crate::ports::{
    CancelOutcome, CheckoutMetadata, CheckoutOrder, DatabaseService, NotificationService,
    PaymentGateway, PortError, SeatClaim,
};

//=========================================================================================
// Errors
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden")]
    Forbidden,
    #[error("Reservation is already paid")]
    AlreadyPaid,
    #[error("Reservation is not paid")]
    NotPaid,
    #[error("No places available on this stage")]
    NoPlacesAvailable,
    #[error("Supplied user and stage do not match the reservation")]
    MismatchedIds,
    #[error("User already holds a reservation for this stage")]
    AlreadyReserved,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Confirmation could not be delivered, payment was rolled back: {0}")]
    NotificationFailed(String),
    #[error("Rollback of reservation {reservation_id} on stage {stage_id} failed; manual reconciliation required")]
    CompensationFailed { reservation_id: Uuid, stage_id: Uuid },
    #[error("Payment gateway error: {0}")]
    Gateway(String),
    #[error("Service Port Error: {0}")]
    Port(PortError),
}

impl From<PortError> for BookingError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => BookingError::NotFound(what),
            PortError::Conflict(what) => BookingError::Conflict(what),
            other => BookingError::Port(other),
        }
    }
}

impl BookingError {
    /// Machine-readable code returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "VALIDATION_ERROR",
            BookingError::NotFound(_) => "NOT_FOUND",
            BookingError::Forbidden | BookingError::Port(PortError::Unauthorized) => "FORBIDDEN",
            BookingError::AlreadyPaid => "ALREADY_PAID",
            BookingError::NotPaid => "NOT_PAID",
            BookingError::NoPlacesAvailable => "NO_PLACES_AVAILABLE",
            BookingError::MismatchedIds => "MISMATCHED_IDS",
            BookingError::AlreadyReserved => "ALREADY_RESERVED",
            BookingError::Conflict(_) => "CONFLICT",
            BookingError::NotificationFailed(_) => "NOTIFICATION_FAILED",
            BookingError::CompensationFailed { .. } => "COMPENSATION_FAILED",
            BookingError::Gateway(_) => "GATEWAY_ERROR",
            BookingError::Port(_) => "INTERNAL_ERROR",
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

//=========================================================================================
// Requests and Outcomes
//=========================================================================================

/// Checkout input as received from the client. Every field is required.
#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub stage_id: Option<Uuid>,
    pub stage_title: Option<String>,
    pub stage_price: Option<i64>,
    pub user_id: Option<Uuid>,
    pub stage_type: Option<String>,
}

/// Admin confirmation of a payment tracked outside the gateway (cheque, cash...).
#[derive(Debug, Clone, Copy)]
pub struct ValidatePaymentRequest {
    pub user_id: Uuid,
    pub stage_id: Uuid,
    pub reservation_id: Uuid,
}

/// A successfully confirmed payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub reservation: Reservation,
    pub seats_available: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReminderReport {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub currency: String,
    /// Upper bound on the confirmation send; exceeding it triggers the rollback.
    pub notification_timeout: Duration,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            currency: "eur".to_string(),
            notification_timeout: Duration::from_secs(30),
        }
    }
}

//=========================================================================================
// The Service
//=========================================================================================

#[derive(Clone)]
pub struct BookingService {
    db: Arc<dyn DatabaseService>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationService>,
    settings: BookingSettings,
}

impl BookingService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationService>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            db,
            payments,
            notifier,
            settings,
        }
    }

    // --- Checkout ---

    /// Creates a hosted checkout session for a stage and returns the redirect URL.
    ///
    /// Nothing is written locally; the reservation only changes once the gateway
    /// reports the completed payment.
    pub async fn start_checkout(
        &self,
        requester: CurrentUser,
        request: CheckoutRequest,
    ) -> BookingResult<String> {
        let mut missing = Vec::new();
        if request.stage_id.is_none() {
            missing.push("stage_id");
        }
        if request.stage_title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            missing.push("stage_title");
        }
        if request.stage_price.is_none() {
            missing.push("stage_price");
        }
        if request.user_id.is_none() {
            missing.push("user_id");
        }
        if request.stage_type.as_deref().map_or(true, |t| t.trim().is_empty()) {
            missing.push("stage_type");
        }
        let (Some(stage_id), Some(price), Some(user_id), Some(stage_type), false) = (
            request.stage_id,
            request.stage_price,
            request.user_id,
            request.stage_type.as_deref(),
            !missing.is_empty(),
        ) else {
            return Err(BookingError::Validation(format!(
                "missing fields: {}",
                missing.join(", ")
            )));
        };
        let stage_type = stage_type
            .trim()
            .parse::<StageType>()
            .map_err(BookingError::Validation)?;

        if user_id != requester.id && !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }

        let stage = self.visible_stage(stage_id).await?;
        if price != stage.price_cents {
            return Err(BookingError::Validation(format!(
                "price {} does not match the stage price {}",
                price, stage.price_cents
            )));
        }
        if stage.seats_available <= 0 {
            return Err(BookingError::NoPlacesAvailable);
        }

        let existing = self.db.find_reservation(user_id, stage_id).await?;
        if existing.as_ref().is_some_and(|r| r.paid) {
            return Err(BookingError::AlreadyPaid);
        }

        let order = CheckoutOrder {
            stage_title: stage.title.clone(),
            price_cents: stage.price_cents,
            metadata: CheckoutMetadata {
                user_id,
                stage_id,
                reservation_id: existing.map(|r| r.id),
                stage_type,
            },
        };

        let url = self
            .payments
            .create_checkout_session(&order)
            .await
            .map_err(|e| {
                error!("Failed to create checkout session for stage {}: {:?}", stage_id, e);
                BookingError::Gateway(e.to_string())
            })?;

        info!("Checkout session created for user {} on stage {}", user_id, stage_id);
        Ok(url)
    }

    // --- Payment Confirmation ---

    /// Entry point for the gateway's "checkout completed" callback.
    ///
    /// The caller must have verified the event signature.
    pub async fn handle_checkout_completed(
        &self,
        metadata: &HashMap<String, String>,
    ) -> BookingResult<Confirmation> {
        let metadata = CheckoutMetadata::from_map(metadata).map_err(BookingError::Validation)?;

        let existing = match metadata.reservation_id {
            Some(reservation_id) => match self.db.get_reservation(reservation_id).await {
                Ok(reservation) => {
                    if reservation.user_id != metadata.user_id
                        || reservation.stage_id != metadata.stage_id
                    {
                        return Err(BookingError::MismatchedIds);
                    }
                    Some(reservation)
                }
                // Cancelled while the checkout page was still open.
                Err(PortError::NotFound(_)) => {
                    warn!(
                        "Reservation {} from checkout metadata no longer exists, re-creating it for user {} on stage {}",
                        reservation_id, metadata.user_id, metadata.stage_id
                    );
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let reservation = match existing {
            Some(reservation) => reservation,
            None => {
                self.db
                    .upsert_reservation(
                        metadata.user_id,
                        metadata.stage_id,
                        PaymentMethod::Card,
                        metadata.stage_type,
                    )
                    .await?
            }
        };

        self.confirm_payment(reservation.id).await
    }

    /// Entry point for an administrator confirming a manually tracked payment.
    pub async fn validate_payment(
        &self,
        requester: CurrentUser,
        request: ValidatePaymentRequest,
    ) -> BookingResult<Confirmation> {
        if !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }

        let reservation = self.db.get_reservation(request.reservation_id).await?;
        if reservation.user_id != request.user_id || reservation.stage_id != request.stage_id {
            return Err(BookingError::MismatchedIds);
        }

        self.confirm_payment(reservation.id).await
    }

    /// Moves a reservation from unpaid to paid, taking one seat, then sends the
    /// confirmation. The seat is given back if the confirmation cannot be sent.
    pub async fn confirm_payment(&self, reservation_id: Uuid) -> BookingResult<Confirmation> {
        let (reservation, seats_available) = match self.db.claim_seat(reservation_id).await? {
            SeatClaim::Claimed {
                reservation,
                seats_available,
            } => (reservation, seats_available),
            SeatClaim::AlreadyPaid => {
                info!("Reservation {} already paid, nothing to do", reservation_id);
                return Err(BookingError::AlreadyPaid);
            }
            SeatClaim::NoPlacesAvailable => {
                warn!("No seat left for reservation {}", reservation_id);
                return Err(BookingError::NoPlacesAvailable);
            }
        };
        info!(
            "Reservation {} marked paid, {} seat(s) left on stage {}",
            reservation.id, seats_available, reservation.stage_id
        );

        match self.notify_confirmation(&reservation).await {
            Ok((user, stage)) => {
                self.store_invoice(&reservation, &user, &stage).await;
                Ok(Confirmation {
                    reservation,
                    seats_available,
                })
            }
            Err(reason) => {
                warn!(
                    "Confirmation for reservation {} failed, rolling back: {}",
                    reservation.id, reason
                );
                match self.db.release_seat(reservation.id).await {
                    Ok(seats) => {
                        info!(
                            "Reservation {} rolled back, {} seat(s) left on stage {}",
                            reservation.id, seats, reservation.stage_id
                        );
                        Err(BookingError::NotificationFailed(reason))
                    }
                    Err(e) => {
                        error!(
                            target: "reconciliation",
                            reservation_id = %reservation.id,
                            stage_id = %reservation.stage_id,
                            "Reservation left paid without confirmation, rollback failed: {:?}",
                            e
                        );
                        Err(BookingError::CompensationFailed {
                            reservation_id: reservation.id,
                            stage_id: reservation.stage_id,
                        })
                    }
                }
            }
        }
    }

    async fn notify_confirmation(&self, reservation: &Reservation) -> Result<(User, Stage), String> {
        let send = async {
            let user = self
                .db
                .get_user(reservation.user_id)
                .await
                .map_err(|e| e.to_string())?;
            let stage = self
                .db
                .get_stage(reservation.stage_id)
                .await
                .map_err(|e| e.to_string())?;
            self.notifier
                .send_confirmation(&user, &stage, reservation.stage_type)
                .await
                .map_err(|e| e.to_string())?;
            Ok((user, stage))
        };

        match tokio::time::timeout(self.settings.notification_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "confirmation not sent within {:?}",
                self.settings.notification_timeout
            )),
        }
    }

    async fn store_invoice(&self, reservation: &Reservation, user: &User, stage: &Stage) {
        let invoice = build_invoice(reservation, user, stage, &self.settings.currency, Utc::now());
        match self.db.upsert_invoice(invoice).await {
            Ok(invoice) => info!("Invoice {} issued for reservation {}", invoice.number, reservation.id),
            Err(e) => warn!("Could not issue invoice for reservation {}: {:?}", reservation.id, e),
        }
    }

    /// Regenerates the invoice of a paid reservation, replacing the previous one.
    pub async fn regenerate_invoice(
        &self,
        requester: CurrentUser,
        reservation_id: Uuid,
    ) -> BookingResult<Invoice> {
        if !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }
        let reservation = self.db.get_reservation(reservation_id).await?;
        if !reservation.paid {
            return Err(BookingError::NotPaid);
        }
        let user = self.db.get_user(reservation.user_id).await?;
        let stage = self.db.get_stage(reservation.stage_id).await?;
        let invoice = build_invoice(&reservation, &user, &stage, &self.settings.currency, Utc::now());
        Ok(self.db.upsert_invoice(invoice).await?)
    }

    pub async fn invoices_for(&self, requester: CurrentUser) -> BookingResult<Vec<Invoice>> {
        Ok(self.db.list_invoices_for_user(requester.id).await?)
    }

    pub async fn invoice(&self, requester: CurrentUser, invoice_id: Uuid) -> BookingResult<Invoice> {
        let invoice = self.db.get_invoice(invoice_id).await?;
        if invoice.user_id != requester.id && !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }
        Ok(invoice)
    }

    // --- Reservations ---

    /// Creates an unpaid reservation for the requester.
    pub async fn reserve(
        &self,
        requester: CurrentUser,
        stage_id: Uuid,
        payment_method: PaymentMethod,
        stage_type: StageType,
    ) -> BookingResult<Reservation> {
        let stage = self.visible_stage(stage_id).await?;
        if stage.seats_available <= 0 {
            return Err(BookingError::NoPlacesAvailable);
        }

        let reservation = self
            .db
            .create_reservation(requester.id, stage_id, payment_method, stage_type)
            .await
            .map_err(|e| match e {
                PortError::Conflict(_) => BookingError::AlreadyReserved,
                other => other.into(),
            })?;
        info!("Reservation {} created for user {} on stage {}", reservation.id, requester.id, stage_id);
        Ok(reservation)
    }

    pub async fn reservations_for(&self, requester: CurrentUser) -> BookingResult<Vec<Reservation>> {
        Ok(self.db.list_reservations_for_user(requester.id).await?)
    }

    /// Cancels an unpaid reservation and returns the stage's seat count afterwards.
    pub async fn cancel_reservation(
        &self,
        requester: CurrentUser,
        reservation_id: Uuid,
    ) -> BookingResult<i32> {
        let reservation = self.db.get_reservation(reservation_id).await?;
        if reservation.user_id != requester.id && !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }
        if reservation.paid {
            return Err(BookingError::AlreadyPaid);
        }

        match self.db.cancel_unpaid(reservation_id).await? {
            CancelOutcome::Cancelled { seats_available } => {
                // Adds a seat back even though an unpaid reservation never took one.
                warn!(
                    target: "seat_audit",
                    user_id = %reservation.user_id,
                    stage_id = %reservation.stage_id,
                    cancelled_by = %requester.id,
                    "Reservation {} cancelled, {} seat(s) now available",
                    reservation_id, seats_available
                );
                Ok(seats_available)
            }
            CancelOutcome::AlreadyPaid => Err(BookingError::AlreadyPaid),
        }
    }

    // --- Catalog ---

    pub async fn public_stages(&self, today: NaiveDate) -> BookingResult<Vec<Stage>> {
        Ok(self.db.list_public_stages(today).await?)
    }

    pub async fn visible_stage(&self, stage_id: Uuid) -> BookingResult<Stage> {
        let stage = self.db.get_stage(stage_id).await?;
        if stage.hidden {
            return Err(BookingError::NotFound(format!("Stage {} not found", stage_id)));
        }
        Ok(stage)
    }

    pub async fn create_stage(&self, requester: CurrentUser, draft: StageDraft) -> BookingResult<Stage> {
        if !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }
        validate_draft(&draft)?;
        let stage = self.db.create_stage(&draft).await?;
        info!("Stage {} ({}) created", stage.id, stage.number);
        Ok(stage)
    }

    pub async fn update_stage(
        &self,
        requester: CurrentUser,
        stage_id: Uuid,
        draft: StageDraft,
    ) -> BookingResult<Stage> {
        if !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }
        validate_draft(&draft)?;
        let stage = self.db.update_stage(stage_id, &draft).await?;
        info!("Stage {} ({}) updated", stage.id, stage.number);
        Ok(stage)
    }

    // --- Permits and Reminders ---

    /// Marks the requester's permit as submitted for review.
    pub async fn submit_permit(&self, requester: CurrentUser) -> BookingResult<User> {
        let user = self.db.get_user(requester.id).await?;
        if user.permit_status == PermitStatus::Verified {
            return Err(BookingError::Conflict("permit already verified".to_string()));
        }
        Ok(self.db.set_permit_status(requester.id, PermitStatus::Pending).await?)
    }

    /// Records the admin's verdict on a user's permit and tells the user.
    ///
    /// Returns the updated user and whether the notification went out.
    pub async fn decide_permit(
        &self,
        requester: CurrentUser,
        user_id: Uuid,
        decision: PermitDecision,
    ) -> BookingResult<(User, bool)> {
        if !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }
        let user = self.db.set_permit_status(user_id, decision.status()).await?;
        let notified = match self.notifier.send_permit_decision(&user, &decision).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Permit decision for user {} not delivered: {:?}", user_id, e);
                false
            }
        };
        Ok((user, notified))
    }

    /// Sends a reminder to every paid attendee of a stage.
    pub async fn send_reminders(
        &self,
        requester: CurrentUser,
        stage_id: Uuid,
    ) -> BookingResult<ReminderReport> {
        if !requester.is_admin() {
            return Err(BookingError::Forbidden);
        }
        let stage = self.db.get_stage(stage_id).await?;
        let reservations = self.db.list_paid_reservations_for_stage(stage_id).await?;

        let outcomes = join_all(reservations.iter().map(|reservation| {
            let stage = &stage;
            async move {
                let user = self.db.get_user(reservation.user_id).await?;
                self.notifier.send_reminder(&user, stage).await
            }
        }))
        .await;

        let mut report = ReminderReport::default();
        for (reservation, outcome) in reservations.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!("Reminder for reservation {} failed: {:?}", reservation.id, e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "Reminders for stage {}: {} sent, {} failed",
            stage_id, report.sent, report.failed
        );
        Ok(report)
    }
}

fn validate_draft(draft: &StageDraft) -> BookingResult<()> {
    if draft.title.trim().is_empty() {
        return Err(BookingError::Validation("title must not be empty".to_string()));
    }
    if draft.number.trim().is_empty() {
        return Err(BookingError::Validation("number must not be empty".to_string()));
    }
    if draft.seats_available < 0 {
        return Err(BookingError::Validation(
            "seats_available must not be negative".to_string(),
        ));
    }
    if draft.price_cents < 0 {
        return Err(BookingError::Validation("price must not be negative".to_string()));
    }
    if draft.end_date < draft.start_date {
        return Err(BookingError::Validation(
            "end_date must not precede start_date".to_string(),
        ));
    }
    Ok(())
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::testing::{FakeGateway, InMemoryStore, RecordingNotifier};

    struct Harness {
        store: Arc<InMemoryStore>,
        notifier: Arc<RecordingNotifier>,
        gateway: Arc<FakeGateway>,
        service: BookingService,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let gateway = Arc::new(FakeGateway::new());
        let service = BookingService::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            BookingSettings::default(),
        );
        Harness {
            store,
            notifier,
            gateway,
            service,
        }
    }

    fn admin() -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            role: Role::Admin,
        }
    }

    fn as_current(user: &User) -> CurrentUser {
        CurrentUser {
            id: user.id,
            role: user.role,
        }
    }

    async fn unpaid_reservation(h: &Harness, stage: &Stage) -> Reservation {
        let user = h.store.seed_user(Role::Client).await;
        h.store
            .create_reservation(user.id, stage.id, PaymentMethod::Check, StageType::Case1)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn confirmation_takes_a_seat_and_notifies() {
        let h = harness();
        let stage = h.store.seed_stage(3).await;
        let reservation = unpaid_reservation(&h, &stage).await;

        let confirmation = h.service.confirm_payment(reservation.id).await.unwrap();

        assert!(confirmation.reservation.paid);
        assert_eq!(confirmation.seats_available, 2);
        assert_eq!(h.store.seats(stage.id).await, 2);
        assert_eq!(h.notifier.confirmations().await, vec![reservation.user_id]);
        assert_eq!(h.store.invoice_count().await, 1);
    }

    #[tokio::test]
    async fn confirming_twice_is_rejected_without_touching_seats() {
        let h = harness();
        let stage = h.store.seed_stage(3).await;
        let reservation = unpaid_reservation(&h, &stage).await;

        h.service.confirm_payment(reservation.id).await.unwrap();
        let err = h.service.confirm_payment(reservation.id).await.unwrap_err();

        assert!(matches!(err, BookingError::AlreadyPaid));
        assert_eq!(err.code(), "ALREADY_PAID");
        assert_eq!(h.store.seats(stage.id).await, 2);
        assert_eq!(h.notifier.confirmations().await.len(), 1);
    }

    #[tokio::test]
    async fn three_seats_serve_three_users_then_refuse() {
        let h = harness();
        let stage = h.store.seed_stage(3).await;

        for _ in 0..3 {
            let reservation = unpaid_reservation(&h, &stage).await;
            h.service.confirm_payment(reservation.id).await.unwrap();
        }
        assert_eq!(h.store.seats(stage.id).await, 0);

        let fourth = unpaid_reservation(&h, &stage).await;
        let err = h.service.confirm_payment(fourth.id).await.unwrap_err();
        assert!(matches!(err, BookingError::NoPlacesAvailable));
        assert_eq!(h.store.seats(stage.id).await, 0);
        assert!(!h.store.get_reservation(fourth.id).await.unwrap().paid);
    }

    #[tokio::test]
    async fn racing_for_the_last_seat_has_one_winner() {
        let h = harness();
        let stage = h.store.seed_stage(1).await;
        let first = unpaid_reservation(&h, &stage).await;
        let second = unpaid_reservation(&h, &stage).await;

        let service_a = h.service.clone();
        let service_b = h.service.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { service_a.confirm_payment(first.id).await }),
            tokio::spawn(async move { service_b.confirm_payment(second.id).await }),
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        let winners = outcomes.iter().filter(|o| o.is_ok()).count();
        let refused = outcomes
            .iter()
            .filter(|o| matches!(o, Err(BookingError::NoPlacesAvailable)))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(refused, 1);
        assert_eq!(h.store.seats(stage.id).await, 0);
    }

    #[tokio::test]
    async fn failed_notification_rolls_the_payment_back() {
        let h = harness();
        let stage = h.store.seed_stage(1).await;
        let reservation = unpaid_reservation(&h, &stage).await;
        h.notifier.fail_next_sends(true);

        let err = h.service.confirm_payment(reservation.id).await.unwrap_err();

        assert!(matches!(err, BookingError::NotificationFailed(_)));
        assert_eq!(h.store.seats(stage.id).await, 1);
        assert!(!h.store.get_reservation(reservation.id).await.unwrap().paid);
        assert_eq!(h.store.invoice_count().await, 0);
    }

    #[tokio::test]
    async fn slow_notification_counts_as_failure() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.set_delay(Duration::from_millis(200));
        let service = BookingService::new(
            store.clone(),
            Arc::new(FakeGateway::new()),
            notifier.clone(),
            BookingSettings {
                currency: "eur".to_string(),
                notification_timeout: Duration::from_millis(20),
            },
        );
        let stage = store.seed_stage(2).await;
        let user = store.seed_user(Role::Client).await;
        let reservation = store
            .create_reservation(user.id, stage.id, PaymentMethod::Card, StageType::Case3)
            .await
            .unwrap();

        let err = service.confirm_payment(reservation.id).await.unwrap_err();

        assert!(matches!(err, BookingError::NotificationFailed(_)));
        assert_eq!(store.seats(stage.id).await, 2);
    }

    #[tokio::test]
    async fn failed_rollback_is_reported_as_compensation_failure() {
        let h = harness();
        let stage = h.store.seed_stage(1).await;
        let reservation = unpaid_reservation(&h, &stage).await;
        h.notifier.fail_next_sends(true);
        h.store.fail_releases(true);

        let err = h.service.confirm_payment(reservation.id).await.unwrap_err();

        match err {
            BookingError::CompensationFailed {
                reservation_id,
                stage_id,
            } => {
                assert_eq!(reservation_id, reservation.id);
                assert_eq!(stage_id, stage.id);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(h.store.seats(stage.id).await, 0);
    }

    #[tokio::test]
    async fn webhook_without_reservation_id_upserts_by_user_and_stage() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let user = h.store.seed_user(Role::Client).await;
        let existing = h
            .store
            .create_reservation(user.id, stage.id, PaymentMethod::Transfer, StageType::Case2)
            .await
            .unwrap();

        let metadata = HashMap::from([
            ("userId".to_string(), user.id.to_string()),
            ("stageId".to_string(), stage.id.to_string()),
            ("typeStage".to_string(), "case2".to_string()),
        ]);
        let confirmation = h.service.handle_checkout_completed(&metadata).await.unwrap();

        assert_eq!(confirmation.reservation.id, existing.id);
        assert_eq!(confirmation.reservation.payment_method, PaymentMethod::Card);
        assert_eq!(h.store.reservation_count().await, 1);
        assert_eq!(h.store.seats(stage.id).await, 1);
    }

    #[tokio::test]
    async fn webhook_creates_missing_reservation() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let user = h.store.seed_user(Role::Client).await;

        let metadata = HashMap::from([
            ("userId".to_string(), user.id.to_string()),
            ("stageId".to_string(), stage.id.to_string()),
            ("reservationId".to_string(), String::new()),
            ("typeStage".to_string(), "case1".to_string()),
        ]);
        let confirmation = h.service.handle_checkout_completed(&metadata).await.unwrap();

        assert!(confirmation.reservation.paid);
        assert_eq!(confirmation.reservation.user_id, user.id);
        assert_eq!(h.store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn webhook_for_cancelled_reservation_recreates_and_pays_it() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let reservation = unpaid_reservation(&h, &stage).await;
        let owner = CurrentUser {
            id: reservation.user_id,
            role: Role::Client,
        };
        h.service.cancel_reservation(owner, reservation.id).await.unwrap();
        assert_eq!(h.store.reservation_count().await, 0);

        let metadata = HashMap::from([
            ("userId".to_string(), reservation.user_id.to_string()),
            ("stageId".to_string(), stage.id.to_string()),
            ("reservationId".to_string(), reservation.id.to_string()),
            ("typeStage".to_string(), "case1".to_string()),
        ]);
        let confirmation = h.service.handle_checkout_completed(&metadata).await.unwrap();

        assert!(confirmation.reservation.paid);
        assert_ne!(confirmation.reservation.id, reservation.id);
        assert_eq!(confirmation.reservation.user_id, reservation.user_id);
        assert_eq!(confirmation.reservation.payment_method, PaymentMethod::Card);
        assert_eq!(h.store.reservation_count().await, 1);
        assert_eq!(h.store.seats(stage.id).await, 2);
        assert_eq!(h.notifier.confirmations().await, vec![reservation.user_id]);
    }

    #[tokio::test]
    async fn webhook_rejects_reservation_of_another_user() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let reservation = unpaid_reservation(&h, &stage).await;

        let metadata = HashMap::from([
            ("userId".to_string(), Uuid::new_v4().to_string()),
            ("stageId".to_string(), stage.id.to_string()),
            ("reservationId".to_string(), reservation.id.to_string()),
            ("typeStage".to_string(), "case1".to_string()),
        ]);
        let err = h.service.handle_checkout_completed(&metadata).await.unwrap_err();

        assert!(matches!(err, BookingError::MismatchedIds));
        assert_eq!(h.store.seats(stage.id).await, 2);
    }

    #[tokio::test]
    async fn webhook_with_incomplete_metadata_is_a_validation_error() {
        let h = harness();
        let metadata = HashMap::from([("userId".to_string(), Uuid::new_v4().to_string())]);

        let err = h.service.handle_checkout_completed(&metadata).await.unwrap_err();

        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn validate_payment_requires_admin() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let reservation = unpaid_reservation(&h, &stage).await;
        let client = CurrentUser {
            id: reservation.user_id,
            role: Role::Client,
        };

        let err = h
            .service
            .validate_payment(
                client,
                ValidatePaymentRequest {
                    user_id: reservation.user_id,
                    stage_id: stage.id,
                    reservation_id: reservation.id,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::Forbidden));
        assert_eq!(h.store.seats(stage.id).await, 2);
    }

    #[tokio::test]
    async fn validate_payment_checks_ids() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let other_stage = h.store.seed_stage(2).await;
        let reservation = unpaid_reservation(&h, &stage).await;

        let err = h
            .service
            .validate_payment(
                admin(),
                ValidatePaymentRequest {
                    user_id: reservation.user_id,
                    stage_id: other_stage.id,
                    reservation_id: reservation.id,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISMATCHED_IDS");

        let confirmation = h
            .service
            .validate_payment(
                admin(),
                ValidatePaymentRequest {
                    user_id: reservation.user_id,
                    stage_id: stage.id,
                    reservation_id: reservation.id,
                },
            )
            .await
            .unwrap();
        assert_eq!(confirmation.seats_available, 1);
    }

    #[tokio::test]
    async fn validate_payment_of_unknown_reservation_is_not_found() {
        let h = harness();
        let err = h
            .service
            .validate_payment(
                admin(),
                ValidatePaymentRequest {
                    user_id: Uuid::new_v4(),
                    stage_id: Uuid::new_v4(),
                    reservation_id: Uuid::new_v4(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn cancelling_unpaid_reservation_frees_a_seat() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let reservation = unpaid_reservation(&h, &stage).await;
        let owner = CurrentUser {
            id: reservation.user_id,
            role: Role::Client,
        };

        let seats = h.service.cancel_reservation(owner, reservation.id).await.unwrap();

        assert_eq!(seats, 3);
        assert_eq!(h.store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn each_cancellation_of_a_direct_reservation_is_counted() {
        let h = harness();
        let stage = h.store.seed_stage(1).await;
        let user = h.store.seed_user(Role::Client).await;
        let client = as_current(&user);

        for expected in 2..=3 {
            let reservation = h
                .service
                .reserve(client, stage.id, PaymentMethod::Cash, StageType::Case1)
                .await
                .unwrap();
            let seats = h.service.cancel_reservation(client, reservation.id).await.unwrap();
            assert_eq!(seats, expected);
        }
        assert_eq!(h.store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn paid_reservation_cannot_be_cancelled() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let reservation = unpaid_reservation(&h, &stage).await;
        h.service.confirm_payment(reservation.id).await.unwrap();

        let err = h.service.cancel_reservation(admin(), reservation.id).await.unwrap_err();

        assert!(matches!(err, BookingError::AlreadyPaid));
        assert_eq!(h.store.seats(stage.id).await, 1);
        assert_eq!(h.store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn strangers_cannot_cancel() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let reservation = unpaid_reservation(&h, &stage).await;
        let stranger = CurrentUser {
            id: Uuid::new_v4(),
            role: Role::Client,
        };

        let err = h.service.cancel_reservation(stranger, reservation.id).await.unwrap_err();

        assert!(matches!(err, BookingError::Forbidden));
        assert_eq!(h.store.seats(stage.id).await, 2);
    }

    #[tokio::test]
    async fn checkout_rejects_missing_fields_before_the_gateway() {
        let h = harness();
        let user = h.store.seed_user(Role::Client).await;
        let request = CheckoutRequest {
            stage_id: Some(Uuid::new_v4()),
            stage_title: Some("Course".to_string()),
            stage_price: None,
            user_id: Some(user.id),
            stage_type: None,
        };

        let err = h.service.start_checkout(as_current(&user), request).await.unwrap_err();

        match err {
            BookingError::Validation(message) => {
                assert!(message.contains("stage_price"));
                assert!(message.contains("stage_type"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(h.gateway.orders().await.is_empty());
    }

    #[tokio::test]
    async fn checkout_embeds_metadata() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let user = h.store.seed_user(Role::Client).await;
        let reservation = h
            .store
            .create_reservation(user.id, stage.id, PaymentMethod::Card, StageType::Case1)
            .await
            .unwrap();

        let url = h
            .service
            .start_checkout(
                as_current(&user),
                CheckoutRequest {
                    stage_id: Some(stage.id),
                    stage_title: Some(stage.title.clone()),
                    stage_price: Some(stage.price_cents),
                    user_id: Some(user.id),
                    stage_type: Some("case1".to_string()),
                },
            )
            .await
            .unwrap();

        assert!(url.starts_with("https://"));
        let orders = h.gateway.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].metadata.reservation_id, Some(reservation.id));
        assert_eq!(orders[0].metadata.stage_type, StageType::Case1);
        assert_eq!(orders[0].price_cents, stage.price_cents);
        assert_eq!(h.store.seats(stage.id).await, 2);
    }

    #[tokio::test]
    async fn checkout_rejects_tampered_price() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let user = h.store.seed_user(Role::Client).await;

        let err = h
            .service
            .start_checkout(
                as_current(&user),
                CheckoutRequest {
                    stage_id: Some(stage.id),
                    stage_title: Some(stage.title.clone()),
                    stage_price: Some(1),
                    user_id: Some(user.id),
                    stage_type: Some("case1".to_string()),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::Validation(_)));
        assert!(h.gateway.orders().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_reservation_is_refused() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let user = h.store.seed_user(Role::Client).await;
        let current = as_current(&user);

        h.service
            .reserve(current, stage.id, PaymentMethod::Cash, StageType::Case1)
            .await
            .unwrap();
        let err = h
            .service
            .reserve(current, stage.id, PaymentMethod::Cash, StageType::Case1)
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::AlreadyReserved));
    }

    #[tokio::test]
    async fn regenerating_an_invoice_replaces_it() {
        let h = harness();
        let stage = h.store.seed_stage(2).await;
        let reservation = unpaid_reservation(&h, &stage).await;
        h.service.confirm_payment(reservation.id).await.unwrap();

        let invoice = h.service.regenerate_invoice(admin(), reservation.id).await.unwrap();

        assert_eq!(h.store.invoice_count().await, 1);
        let owner = CurrentUser {
            id: reservation.user_id,
            role: Role::Client,
        };
        let listed = h.service.invoices_for(owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].number, invoice.number);
    }

    #[tokio::test]
    async fn permit_decision_notifies_user() {
        let h = harness();
        let user = h.store.seed_user(Role::Client).await;
        h.service.submit_permit(as_current(&user)).await.unwrap();

        let (updated, notified) = h
            .service
            .decide_permit(
                admin(),
                user.id,
                PermitDecision::Rejected {
                    reason: Some("unreadable scan".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.permit_status, PermitStatus::Rejected);
        assert!(notified);
        assert_eq!(h.notifier.permit_decisions().await, vec![user.id]);
    }

    #[tokio::test]
    async fn reminders_go_to_paid_attendees_only() {
        let h = harness();
        let stage = h.store.seed_stage(5).await;
        let paid = unpaid_reservation(&h, &stage).await;
        h.service.confirm_payment(paid.id).await.unwrap();
        unpaid_reservation(&h, &stage).await;

        let report = h.service.send_reminders(admin(), stage.id).await.unwrap();

        assert_eq!(report, ReminderReport { sent: 1, failed: 0 });
        assert_eq!(h.notifier.reminders().await, vec![paid.user_id]);
    }

    #[tokio::test]
    async fn stage_drafts_are_validated() {
        let h = harness();
        let stage = h.store.seed_stage(1).await;
        let draft = StageDraft {
            title: stage.title.clone(),
            address: stage.address.clone(),
            postal_code: stage.postal_code.clone(),
            city: stage.city.clone(),
            start_date: stage.start_date,
            end_date: stage.end_date,
            morning_window: stage.morning_window.clone(),
            afternoon_window: stage.afternoon_window.clone(),
            price_cents: stage.price_cents,
            number: stage.number.clone(),
            seats_available: -1,
            hidden: false,
        };

        let err = h.service.update_stage(admin(), stage.id, draft).await.unwrap_err();

        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(h.store.seats(stage.id).await, 1);
    }
}

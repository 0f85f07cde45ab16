//! crates/stage_booking_core/src/testing.rs
//!
//! In-memory implementations of the ports, used by the unit tests of this crate
//! and by the HTTP tests of the api service.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    CurrentUser, Invoice, NewUser, PaymentMethod, PermitDecision, PermitStatus, Reservation,
    Role, Stage, StageDraft, StageType, User, UserCredentials,
};
use crate::ports::{
    CancelOutcome, CheckoutOrder, DatabaseService, GatewayEvent, NotificationService,
    PaymentGateway, PortError, PortResult, SeatClaim,
};

//=========================================================================================
// In-memory Store
//=========================================================================================

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    passwords: HashMap<Uuid, String>,
    sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    stages: HashMap<Uuid, Stage>,
    reservations: HashMap<Uuid, Reservation>,
    invoices: HashMap<Uuid, Invoice>,
}

/// A `DatabaseService` holding everything in one mutex-guarded state, so every
/// operation is atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    fail_releases: AtomicBool,
    counter: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `release_seat` fail.
    pub fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }

    /// Inserts a visible stage two weeks from now with the given seat count.
    pub async fn seed_stage(&self, seats_available: i32) -> Stage {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let start = Utc::now().date_naive() + ChronoDuration::days(14);
        let stage = Stage {
            id: Uuid::new_v4(),
            title: format!("Points recovery course {}", n),
            address: "1 place Bellecour".to_string(),
            postal_code: "69002".to_string(),
            city: "Lyon".to_string(),
            start_date: start,
            end_date: start + ChronoDuration::days(1),
            morning_window: "08:30-12:30".to_string(),
            afternoon_window: "13:30-16:30".to_string(),
            price_cents: 23_000,
            number: format!("STG-{:04}", n),
            seats_available,
            hidden: false,
        };
        self.state.lock().await.stages.insert(stage.id, stage.clone());
        stage
    }

    pub async fn seed_user(&self, role: Role) -> User {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let user = User {
            id: Uuid::new_v4(),
            email: format!("user{}@example.com", n),
            first_name: "Test".to_string(),
            last_name: format!("User{}", n),
            phone: None,
            role,
            permit_status: PermitStatus::Missing,
        };
        self.state.lock().await.users.insert(user.id, user.clone());
        user
    }

    /// Opens a login session for an existing user and returns its id.
    pub async fn seed_session(&self, user_id: Uuid) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.state
            .lock()
            .await
            .sessions
            .insert(session_id.clone(), (user_id, Utc::now() + ChronoDuration::days(1)));
        session_id
    }

    pub async fn seats(&self, stage_id: Uuid) -> i32 {
        self.state
            .lock()
            .await
            .stages
            .get(&stage_id)
            .map(|s| s.seats_available)
            .unwrap_or_default()
    }

    pub async fn reservation_count(&self) -> usize {
        self.state.lock().await.reservations.len()
    }

    pub async fn invoice_count(&self) -> usize {
        self.state.lock().await.invoices.len()
    }
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> PortError {
    PortError::NotFound(format!("{} {} not found", kind, id))
}

fn stage_from_draft(id: Uuid, draft: &StageDraft) -> Stage {
    Stage {
        id,
        title: draft.title.clone(),
        address: draft.address.clone(),
        postal_code: draft.postal_code.clone(),
        city: draft.city.clone(),
        start_date: draft.start_date,
        end_date: draft.end_date,
        morning_window: draft.morning_window.clone(),
        afternoon_window: draft.afternoon_window.clone(),
        price_cents: draft.price_cents,
        number: draft.number.clone(),
        seats_available: draft.seats_available,
        hidden: draft.hidden,
    }
}

#[async_trait]
impl DatabaseService for InMemoryStore {
    async fn create_user(&self, user: &NewUser, hashed_password: &str) -> PortResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(PortError::Conflict(format!("email {} already registered", user.email)));
        }
        let created = User {
            id: Uuid::new_v4(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone: user.phone.clone(),
            role: Role::Client,
            permit_status: PermitStatus::Missing,
        };
        state.users.insert(created.id, created.clone());
        state.passwords.insert(created.id, hashed_password.to_string());
        Ok(created)
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.state
            .lock()
            .await
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| not_found("User", user_id))
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let state = self.state.lock().await;
        let user = state
            .users
            .values()
            .find(|u| u.email == email)
            .ok_or_else(|| not_found("User", email))?;
        let hashed_password = state
            .passwords
            .get(&user.id)
            .cloned()
            .ok_or_else(|| not_found("Credentials for", email))?;
        Ok(UserCredentials {
            user_id: user.id,
            email: user.email.clone(),
            hashed_password,
        })
    }

    async fn set_permit_status(&self, user_id: Uuid, status: PermitStatus) -> PortResult<User> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| not_found("User", user_id))?;
        user.permit_status = status;
        Ok(user.clone())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.state
            .lock()
            .await
            .sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<CurrentUser> {
        let state = self.state.lock().await;
        let (user_id, expires_at) = state.sessions.get(session_id).ok_or(PortError::Unauthorized)?;
        if *expires_at <= Utc::now() {
            return Err(PortError::Unauthorized);
        }
        let user = state.users.get(user_id).ok_or(PortError::Unauthorized)?;
        Ok(CurrentUser {
            id: user.id,
            role: user.role,
        })
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.state.lock().await.sessions.remove(session_id);
        Ok(())
    }

    async fn list_public_stages(&self, from: NaiveDate) -> PortResult<Vec<Stage>> {
        let state = self.state.lock().await;
        let mut stages: Vec<Stage> = state
            .stages
            .values()
            .filter(|s| !s.hidden && s.start_date >= from)
            .cloned()
            .collect();
        stages.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.number.cmp(&b.number)));
        Ok(stages)
    }

    async fn get_stage(&self, stage_id: Uuid) -> PortResult<Stage> {
        self.state
            .lock()
            .await
            .stages
            .get(&stage_id)
            .cloned()
            .ok_or_else(|| not_found("Stage", stage_id))
    }

    async fn create_stage(&self, draft: &StageDraft) -> PortResult<Stage> {
        let mut state = self.state.lock().await;
        if state.stages.values().any(|s| s.number == draft.number) {
            return Err(PortError::Conflict(format!("stage number {} already in use", draft.number)));
        }
        let stage = stage_from_draft(Uuid::new_v4(), draft);
        state.stages.insert(stage.id, stage.clone());
        Ok(stage)
    }

    async fn update_stage(&self, stage_id: Uuid, draft: &StageDraft) -> PortResult<Stage> {
        let mut state = self.state.lock().await;
        if !state.stages.contains_key(&stage_id) {
            return Err(not_found("Stage", stage_id));
        }
        if state
            .stages
            .values()
            .any(|s| s.id != stage_id && s.number == draft.number)
        {
            return Err(PortError::Conflict(format!("stage number {} already in use", draft.number)));
        }
        let stage = stage_from_draft(stage_id, draft);
        state.stages.insert(stage_id, stage.clone());
        Ok(stage)
    }

    async fn create_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
        payment_method: PaymentMethod,
        stage_type: StageType,
    ) -> PortResult<Reservation> {
        let mut state = self.state.lock().await;
        if !state.stages.contains_key(&stage_id) {
            return Err(not_found("Stage", stage_id));
        }
        if state
            .reservations
            .values()
            .any(|r| r.user_id == user_id && r.stage_id == stage_id)
        {
            return Err(PortError::Conflict("reservation already exists".to_string()));
        }
        let reservation = Reservation {
            id: Uuid::new_v4(),
            user_id,
            stage_id,
            paid: false,
            payment_method,
            stage_type,
            created_at: Utc::now(),
        };
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn upsert_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
        payment_method: PaymentMethod,
        stage_type: StageType,
    ) -> PortResult<Reservation> {
        let mut state = self.state.lock().await;
        if !state.stages.contains_key(&stage_id) {
            return Err(not_found("Stage", stage_id));
        }
        if let Some(existing) = state
            .reservations
            .values_mut()
            .find(|r| r.user_id == user_id && r.stage_id == stage_id)
        {
            existing.payment_method = payment_method;
            existing.stage_type = stage_type;
            return Ok(existing.clone());
        }
        let reservation = Reservation {
            id: Uuid::new_v4(),
            user_id,
            stage_id,
            paid: false,
            payment_method,
            stage_type,
            created_at: Utc::now(),
        };
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation> {
        self.state
            .lock()
            .await
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| not_found("Reservation", reservation_id))
    }

    async fn find_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
    ) -> PortResult<Option<Reservation>> {
        Ok(self
            .state
            .lock()
            .await
            .reservations
            .values()
            .find(|r| r.user_id == user_id && r.stage_id == stage_id)
            .cloned())
    }

    async fn list_reservations_for_user(&self, user_id: Uuid) -> PortResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut reservations: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn list_paid_reservations_for_stage(
        &self,
        stage_id: Uuid,
    ) -> PortResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .values()
            .filter(|r| r.stage_id == stage_id && r.paid)
            .cloned()
            .collect())
    }

    async fn claim_seat(&self, reservation_id: Uuid) -> PortResult<SeatClaim> {
        let mut state = self.state.lock().await;
        let reservation = state
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| not_found("Reservation", reservation_id))?;
        if reservation.paid {
            return Ok(SeatClaim::AlreadyPaid);
        }
        let stage = state
            .stages
            .get_mut(&reservation.stage_id)
            .ok_or_else(|| not_found("Stage", reservation.stage_id))?;
        if stage.seats_available <= 0 {
            return Ok(SeatClaim::NoPlacesAvailable);
        }
        stage.seats_available -= 1;
        let seats_available = stage.seats_available;

        let stored = state
            .reservations
            .get_mut(&reservation_id)
            .ok_or_else(|| not_found("Reservation", reservation_id))?;
        stored.paid = true;
        Ok(SeatClaim::Claimed {
            reservation: stored.clone(),
            seats_available,
        })
    }

    async fn release_seat(&self, reservation_id: Uuid) -> PortResult<i32> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("store offline".to_string()));
        }
        let mut state = self.state.lock().await;
        let reservation = state
            .reservations
            .get_mut(&reservation_id)
            .ok_or_else(|| not_found("Reservation", reservation_id))?;
        let stage_id = reservation.stage_id;
        let was_paid = reservation.paid;
        reservation.paid = false;

        let stage = state
            .stages
            .get_mut(&stage_id)
            .ok_or_else(|| not_found("Stage", stage_id))?;
        if was_paid {
            stage.seats_available += 1;
        }
        Ok(stage.seats_available)
    }

    async fn cancel_unpaid(&self, reservation_id: Uuid) -> PortResult<CancelOutcome> {
        let mut state = self.state.lock().await;
        let reservation = state
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| not_found("Reservation", reservation_id))?;
        if reservation.paid {
            return Ok(CancelOutcome::AlreadyPaid);
        }
        let stage = state
            .stages
            .get_mut(&reservation.stage_id)
            .ok_or_else(|| not_found("Stage", reservation.stage_id))?;
        stage.seats_available += 1;
        let seats_available = stage.seats_available;
        state.reservations.remove(&reservation_id);
        Ok(CancelOutcome::Cancelled { seats_available })
    }

    async fn upsert_invoice(&self, invoice: Invoice) -> PortResult<Invoice> {
        let mut state = self.state.lock().await;
        let previous = state
            .invoices
            .values()
            .find(|i| i.reservation_id == invoice.reservation_id)
            .map(|i| i.id);
        let stored = match previous {
            Some(id) => Invoice { id, ..invoice },
            None => invoice,
        };
        state.invoices.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> PortResult<Invoice> {
        self.state
            .lock()
            .await
            .invoices
            .get(&invoice_id)
            .cloned()
            .ok_or_else(|| not_found("Invoice", invoice_id))
    }

    async fn list_invoices_for_user(&self, user_id: Uuid) -> PortResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.created_at);
        Ok(invoices)
    }
}

//=========================================================================================
// Recording Notifier
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SentNotification {
    Confirmation { user_id: Uuid, stage_id: Uuid, stage_type: StageType },
    PermitDecision { user_id: Uuid, decision: PermitDecision },
    Reminder { user_id: Uuid, stage_id: Uuid },
}

/// A `NotificationService` that records what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    fail: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every send fails as if the mail transport were unreachable.
    pub fn fail_next_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delays every send, to exercise timeouts.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }

    pub async fn confirmations(&self) -> Vec<Uuid> {
        self.sent()
            .await
            .into_iter()
            .filter_map(|n| match n {
                SentNotification::Confirmation { user_id, .. } => Some(user_id),
                _ => None,
            })
            .collect()
    }

    pub async fn permit_decisions(&self) -> Vec<Uuid> {
        self.sent()
            .await
            .into_iter()
            .filter_map(|n| match n {
                SentNotification::PermitDecision { user_id, .. } => Some(user_id),
                _ => None,
            })
            .collect()
    }

    pub async fn reminders(&self) -> Vec<Uuid> {
        self.sent()
            .await
            .into_iter()
            .filter_map(|n| match n {
                SentNotification::Reminder { user_id, .. } => Some(user_id),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, notification: SentNotification) -> PortResult<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("mail transport unreachable".to_string()));
        }
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send_confirmation(
        &self,
        user: &User,
        stage: &Stage,
        stage_type: StageType,
    ) -> PortResult<()> {
        self.record(SentNotification::Confirmation {
            user_id: user.id,
            stage_id: stage.id,
            stage_type,
        })
        .await
    }

    async fn send_permit_decision(
        &self,
        user: &User,
        decision: &PermitDecision,
    ) -> PortResult<()> {
        self.record(SentNotification::PermitDecision {
            user_id: user.id,
            decision: decision.clone(),
        })
        .await
    }

    async fn send_reminder(&self, user: &User, stage: &Stage) -> PortResult<()> {
        self.record(SentNotification::Reminder {
            user_id: user.id,
            stage_id: stage.id,
        })
        .await
    }
}

//=========================================================================================
// Fake Payment Gateway
//=========================================================================================

/// A `PaymentGateway` that records checkout orders and replays registered events.
///
/// Webhook deliveries are accepted when signed with [`FakeGateway::SIGNATURE`]
/// and decode to whatever event was registered for the exact payload.
#[derive(Default)]
pub struct FakeGateway {
    orders: Mutex<Vec<CheckoutOrder>>,
    events: std::sync::Mutex<HashMap<String, GatewayEvent>>,
}

impl FakeGateway {
    pub const SIGNATURE: &'static str = "t=0,v1=valid";

    pub fn new() -> Self {
        Self::default()
    }

    pub async fn orders(&self) -> Vec<CheckoutOrder> {
        self.orders.lock().await.clone()
    }

    pub fn register_event(&self, payload: &str, event: GatewayEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.insert(payload.to_string(), event);
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(&self, order: &CheckoutOrder) -> PortResult<String> {
        let mut orders = self.orders.lock().await;
        orders.push(order.clone());
        Ok(format!("https://checkout.test/session/{}", orders.len()))
    }

    fn verify_webhook(&self, signature_header: &str, payload: &str) -> PortResult<GatewayEvent> {
        if signature_header != Self::SIGNATURE {
            return Err(PortError::Unauthorized);
        }
        let events = self
            .events
            .lock()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(events
            .get(payload)
            .cloned()
            .unwrap_or_else(|| GatewayEvent::Other("unknown".to_string())))
    }
}

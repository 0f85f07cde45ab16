//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! The seat counter is only touched inside the transactions of `claim_seat`,
//! `release_seat` and `cancel_unpaid`. Each of them locks the reservation row and
//! changes `seats_available` with a guarded `UPDATE`, so two confirmations racing
//! for the last seat serialize on the stage row and the loser sees zero rows.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use stage_booking_core::domain::{
    CurrentUser, Invoice, NewUser, PaymentMethod, PermitStatus, Reservation, Role, Stage,
    StageDraft, StageType, User, UserCredentials,
};
use stage_booking_core::ports::{
    CancelOutcome, DatabaseService, PortError, PortResult, SeatClaim,
};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps driver errors onto the port's error vocabulary.
fn db_err(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("Row not found".to_string()),
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            PortError::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
            PortError::NotFound(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(raw: &str) -> PortResult<T> {
    raw.parse::<T>().map_err(PortError::Unexpected)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    role: String,
    permit_status: String,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            role: parse_column::<Role>(&self.role)?,
            permit_status: parse_column::<PermitStatus>(&self.permit_status)?,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    email: String,
    hashed_password: String,
}

#[derive(FromRow)]
struct SessionUserRecord {
    id: Uuid,
    role: String,
}

#[derive(FromRow)]
struct StageRecord {
    id: Uuid,
    title: String,
    address: String,
    postal_code: String,
    city: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    morning_window: String,
    afternoon_window: String,
    price_cents: i64,
    number: String,
    seats_available: i32,
    hidden: bool,
}
impl StageRecord {
    fn to_domain(self) -> Stage {
        Stage {
            id: self.id,
            title: self.title,
            address: self.address,
            postal_code: self.postal_code,
            city: self.city,
            start_date: self.start_date,
            end_date: self.end_date,
            morning_window: self.morning_window,
            afternoon_window: self.afternoon_window,
            price_cents: self.price_cents,
            number: self.number,
            seats_available: self.seats_available,
            hidden: self.hidden,
        }
    }
}

#[derive(FromRow)]
struct ReservationRecord {
    id: Uuid,
    user_id: Uuid,
    stage_id: Uuid,
    paid: bool,
    payment_method: String,
    stage_type: String,
    created_at: DateTime<Utc>,
}
impl ReservationRecord {
    fn to_domain(self) -> PortResult<Reservation> {
        Ok(Reservation {
            id: self.id,
            user_id: self.user_id,
            stage_id: self.stage_id,
            paid: self.paid,
            payment_method: parse_column::<PaymentMethod>(&self.payment_method)?,
            stage_type: parse_column::<StageType>(&self.stage_type)?,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct InvoiceRecord {
    id: Uuid,
    reservation_id: Uuid,
    user_id: Uuid,
    number: String,
    amount_cents: i64,
    currency: String,
    status: String,
    document: Vec<u8>,
    created_at: DateTime<Utc>,
}
impl InvoiceRecord {
    fn to_domain(self) -> PortResult<Invoice> {
        Ok(Invoice {
            id: self.id,
            reservation_id: self.reservation_id,
            user_id: self.user_id,
            number: self.number,
            amount_cents: self.amount_cents,
            currency: self.currency,
            status: parse_column(&self.status)?,
            document: self.document,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    // --- User Management ---

    async fn create_user(&self, user: &NewUser, hashed_password: &str) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (id, email, hashed_password, first_name, last_name, phone)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, email, first_name, last_name, phone, role, permit_status",
        )
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(hashed_password)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        record.to_domain()
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, first_name, last_name, phone, role, permit_status
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?
        .to_domain()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?;

        Ok(UserCredentials {
            user_id: record.id,
            email: record.email,
            hashed_password: record.hashed_password,
        })
    }

    async fn set_permit_status(&self, user_id: Uuid, status: PermitStatus) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(
            "UPDATE users SET permit_status = $1 WHERE id = $2
             RETURNING id, email, first_name, last_name, phone, role, permit_status",
        )
        .bind(status.as_str())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?
        .to_domain()
    }

    // --- Auth Methods ---

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<CurrentUser> {
        let record = sqlx::query_as::<_, SessionUserRecord>(
            "SELECT u.id, u.role
             FROM auth_sessions s JOIN users u ON u.id = s.user_id
             WHERE s.id = $1 AND s.expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(PortError::Unauthorized)?;

        Ok(CurrentUser {
            id: record.id,
            role: parse_column(&record.role)?,
        })
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // --- Course Catalog ---

    async fn list_public_stages(&self, from: NaiveDate) -> PortResult<Vec<Stage>> {
        let records = sqlx::query_as::<_, StageRecord>(
            "SELECT id, title, address, postal_code, city, start_date, end_date,
                    morning_window, afternoon_window, price_cents, number, seats_available, hidden
             FROM stages
             WHERE NOT hidden AND start_date >= $1
             ORDER BY start_date ASC, number ASC",
        )
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_stage(&self, stage_id: Uuid) -> PortResult<Stage> {
        let record = sqlx::query_as::<_, StageRecord>(
            "SELECT id, title, address, postal_code, city, start_date, end_date,
                    morning_window, afternoon_window, price_cents, number, seats_available, hidden
             FROM stages WHERE id = $1",
        )
        .bind(stage_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("Stage {} not found", stage_id)))?;
        Ok(record.to_domain())
    }

    async fn create_stage(&self, draft: &StageDraft) -> PortResult<Stage> {
        let record = sqlx::query_as::<_, StageRecord>(
            "INSERT INTO stages (id, title, address, postal_code, city, start_date, end_date,
                                 morning_window, afternoon_window, price_cents, number,
                                 seats_available, hidden)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING id, title, address, postal_code, city, start_date, end_date,
                       morning_window, afternoon_window, price_cents, number, seats_available, hidden",
        )
        .bind(Uuid::new_v4())
        .bind(&draft.title)
        .bind(&draft.address)
        .bind(&draft.postal_code)
        .bind(&draft.city)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(&draft.morning_window)
        .bind(&draft.afternoon_window)
        .bind(draft.price_cents)
        .bind(&draft.number)
        .bind(draft.seats_available)
        .bind(draft.hidden)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.to_domain())
    }

    async fn update_stage(&self, stage_id: Uuid, draft: &StageDraft) -> PortResult<Stage> {
        let record = sqlx::query_as::<_, StageRecord>(
            "UPDATE stages SET title = $2, address = $3, postal_code = $4, city = $5,
                    start_date = $6, end_date = $7, morning_window = $8, afternoon_window = $9,
                    price_cents = $10, number = $11, seats_available = $12, hidden = $13
             WHERE id = $1
             RETURNING id, title, address, postal_code, city, start_date, end_date,
                       morning_window, afternoon_window, price_cents, number, seats_available, hidden",
        )
        .bind(stage_id)
        .bind(&draft.title)
        .bind(&draft.address)
        .bind(&draft.postal_code)
        .bind(&draft.city)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(&draft.morning_window)
        .bind(&draft.afternoon_window)
        .bind(draft.price_cents)
        .bind(&draft.number)
        .bind(draft.seats_available)
        .bind(draft.hidden)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("Stage {} not found", stage_id)))?;
        Ok(record.to_domain())
    }

    // --- Reservations ---

    async fn create_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
        payment_method: PaymentMethod,
        stage_type: StageType,
    ) -> PortResult<Reservation> {
        sqlx::query_as::<_, ReservationRecord>(
            "INSERT INTO reservations (id, user_id, stage_id, payment_method, stage_type)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, user_id, stage_id, paid, payment_method, stage_type, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(stage_id)
        .bind(payment_method.as_str())
        .bind(stage_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .to_domain()
    }

    async fn upsert_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
        payment_method: PaymentMethod,
        stage_type: StageType,
    ) -> PortResult<Reservation> {
        sqlx::query_as::<_, ReservationRecord>(
            "INSERT INTO reservations (id, user_id, stage_id, payment_method, stage_type)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, stage_id) DO UPDATE
                 SET payment_method = EXCLUDED.payment_method,
                     stage_type = EXCLUDED.stage_type
             RETURNING id, user_id, stage_id, paid, payment_method, stage_type, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(stage_id)
        .bind(payment_method.as_str())
        .bind(stage_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .to_domain()
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation> {
        sqlx::query_as::<_, ReservationRecord>(
            "SELECT id, user_id, stage_id, paid, payment_method, stage_type, created_at
             FROM reservations WHERE id = $1",
        )
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("Reservation {} not found", reservation_id)))?
        .to_domain()
    }

    async fn find_reservation(
        &self,
        user_id: Uuid,
        stage_id: Uuid,
    ) -> PortResult<Option<Reservation>> {
        sqlx::query_as::<_, ReservationRecord>(
            "SELECT id, user_id, stage_id, paid, payment_method, stage_type, created_at
             FROM reservations WHERE user_id = $1 AND stage_id = $2",
        )
        .bind(user_id)
        .bind(stage_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(|r| r.to_domain())
        .transpose()
    }

    async fn list_reservations_for_user(&self, user_id: Uuid) -> PortResult<Vec<Reservation>> {
        let records = sqlx::query_as::<_, ReservationRecord>(
            "SELECT id, user_id, stage_id, paid, payment_method, stage_type, created_at
             FROM reservations WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn list_paid_reservations_for_stage(
        &self,
        stage_id: Uuid,
    ) -> PortResult<Vec<Reservation>> {
        let records = sqlx::query_as::<_, ReservationRecord>(
            "SELECT id, user_id, stage_id, paid, payment_method, stage_type, created_at
             FROM reservations WHERE stage_id = $1 AND paid ORDER BY created_at ASC",
        )
        .bind(stage_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    // --- Seat Accounting ---

    async fn claim_seat(&self, reservation_id: Uuid) -> PortResult<SeatClaim> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let reservation = sqlx::query_as::<_, ReservationRecord>(
            "SELECT id, user_id, stage_id, paid, payment_method, stage_type, created_at
             FROM reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("Reservation {} not found", reservation_id)))?;

        // Dropping `tx` on the early returns rolls it back.
        if reservation.paid {
            return Ok(SeatClaim::AlreadyPaid);
        }

        let seats_left: Option<i32> = sqlx::query_scalar(
            "UPDATE stages SET seats_available = seats_available - 1
             WHERE id = $1 AND seats_available > 0
             RETURNING seats_available",
        )
        .bind(reservation.stage_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(seats_available) = seats_left else {
            return Ok(SeatClaim::NoPlacesAvailable);
        };

        let updated = sqlx::query_as::<_, ReservationRecord>(
            "UPDATE reservations SET paid = TRUE WHERE id = $1
             RETURNING id, user_id, stage_id, paid, payment_method, stage_type, created_at",
        )
        .bind(reservation_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(SeatClaim::Claimed {
            reservation: updated.to_domain()?,
            seats_available,
        })
    }

    async fn release_seat(&self, reservation_id: Uuid) -> PortResult<i32> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let released: Option<Uuid> = sqlx::query_scalar(
            "UPDATE reservations SET paid = FALSE WHERE id = $1 AND paid RETURNING stage_id",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let seats_available: i32 = match released {
            Some(stage_id) => sqlx::query_scalar(
                "UPDATE stages SET seats_available = seats_available + 1
                 WHERE id = $1 RETURNING seats_available",
            )
            .bind(stage_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?,
            // Already unpaid: nothing to give back.
            None => sqlx::query_scalar(
                "SELECT s.seats_available
                 FROM reservations r JOIN stages s ON s.id = r.stage_id
                 WHERE r.id = $1",
            )
            .bind(reservation_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| {
                PortError::NotFound(format!("Reservation {} not found", reservation_id))
            })?,
        };

        tx.commit().await.map_err(db_err)?;
        Ok(seats_available)
    }

    async fn cancel_unpaid(&self, reservation_id: Uuid) -> PortResult<CancelOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let reservation = sqlx::query_as::<_, ReservationRecord>(
            "SELECT id, user_id, stage_id, paid, payment_method, stage_type, created_at
             FROM reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("Reservation {} not found", reservation_id)))?;

        if reservation.paid {
            return Ok(CancelOutcome::AlreadyPaid);
        }

        sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(reservation_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let seats_available: i32 = sqlx::query_scalar(
            "UPDATE stages SET seats_available = seats_available + 1
             WHERE id = $1 RETURNING seats_available",
        )
        .bind(reservation.stage_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(CancelOutcome::Cancelled { seats_available })
    }

    // --- Invoices ---

    async fn upsert_invoice(&self, invoice: Invoice) -> PortResult<Invoice> {
        sqlx::query_as::<_, InvoiceRecord>(
            "INSERT INTO invoices (id, reservation_id, user_id, number, amount_cents, currency,
                                   status, document, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (reservation_id) DO UPDATE
                 SET number = EXCLUDED.number,
                     amount_cents = EXCLUDED.amount_cents,
                     currency = EXCLUDED.currency,
                     status = EXCLUDED.status,
                     document = EXCLUDED.document,
                     created_at = EXCLUDED.created_at
             RETURNING id, reservation_id, user_id, number, amount_cents, currency, status,
                       document, created_at",
        )
        .bind(invoice.id)
        .bind(invoice.reservation_id)
        .bind(invoice.user_id)
        .bind(&invoice.number)
        .bind(invoice.amount_cents)
        .bind(&invoice.currency)
        .bind(invoice.status.as_str())
        .bind(&invoice.document)
        .bind(invoice.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .to_domain()
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> PortResult<Invoice> {
        sqlx::query_as::<_, InvoiceRecord>(
            "SELECT id, reservation_id, user_id, number, amount_cents, currency, status,
                    document, created_at
             FROM invoices WHERE id = $1",
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("Invoice {} not found", invoice_id)))?
        .to_domain()
    }

    async fn list_invoices_for_user(&self, user_id: Uuid) -> PortResult<Vec<Invoice>> {
        let records = sqlx::query_as::<_, InvoiceRecord>(
            "SELECT id, reservation_id, user_id, number, amount_cents, currency, status,
                    document, created_at
             FROM invoices WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }
}

//! crates/stage_booking_core/src/domain.rs
//!
//! Defines the pure, core data structures for the booking platform.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Enumerations
//=========================================================================================

/// The four regulatory categories a points-recovery course can be booked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageType {
    /// Voluntary points recovery.
    Case1,
    /// Mandatory course during the probationary licence period.
    Case2,
    /// Alternative to prosecution.
    Case3,
    /// Complementary sentence ordered by a court.
    Case4,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Case1 => "case1",
            StageType::Case2 => "case2",
            StageType::Case3 => "case3",
            StageType::Case4 => "case4",
        }
    }

    /// Wording printed on the convocation attached to confirmation mails.
    pub fn description(&self) -> &'static str {
        match self {
            StageType::Case1 => "Voluntary points recovery course",
            StageType::Case2 => "Mandatory course (probationary licence)",
            StageType::Case3 => "Course proposed as an alternative to prosecution",
            StageType::Case4 => "Course ordered as a complementary sentence",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "case1" => Ok(StageType::Case1),
            "case2" => Ok(StageType::Case2),
            "case3" => Ok(StageType::Case3),
            "case4" => Ok(StageType::Case4),
            other => Err(format!("unknown stage type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentMethod {
    Card,
    Check,
    Cash,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Check => "check",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "check" => Ok(PaymentMethod::Check),
            "cash" => Ok(PaymentMethod::Cash),
            "transfer" => Ok(PaymentMethod::Transfer),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Verification state of the driving permit a client uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitStatus {
    Missing,
    Pending,
    Verified,
    Rejected,
}

impl PermitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermitStatus::Missing => "missing",
            PermitStatus::Pending => "pending",
            PermitStatus::Verified => "verified",
            PermitStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for PermitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing" => Ok(PermitStatus::Missing),
            "pending" => Ok(PermitStatus::Pending),
            "verified" => Ok(PermitStatus::Verified),
            "rejected" => Ok(PermitStatus::Rejected),
            other => Err(format!("unknown permit status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Issued,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(InvoiceStatus::Issued),
            "paid" => Ok(InvoiceStatus::Paid),
            other => Err(format!("unknown invoice status '{}'", other)),
        }
    }
}

//=========================================================================================
// Entities
//=========================================================================================

/// A points-recovery course ("stage") as listed in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
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
    /// Never negative. Only the booking workflow and admin edits change it.
    pub seats_available: i32,
    pub hidden: bool,
}

/// Fields an administrator supplies when creating or editing a stage.
#[derive(Debug, Clone)]
pub struct StageDraft {
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

#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stage_id: Uuid,
    pub paid: bool,
    pub payment_method: PaymentMethod,
    pub stage_type: StageType,
    pub created_at: DateTime<Utc>,
}

/// Represents a user - used throughout app
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub permit_status: PermitStatus,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Fields collected at signup.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// The identity attached to an authenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// An invoice issued once a reservation has been paid.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub number: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub document: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an admin review of an uploaded driving permit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermitDecision {
    Verified,
    Rejected { reason: Option<String> },
}

impl PermitDecision {
    pub fn status(&self) -> PermitStatus {
        match self {
            PermitDecision::Verified => PermitStatus::Verified,
            PermitDecision::Rejected { .. } => PermitStatus::Rejected,
        }
    }
}

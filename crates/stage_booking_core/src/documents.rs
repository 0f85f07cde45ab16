//! crates/stage_booking_core/src/documents.rs
//!
//! Plain-text renditions of the documents the platform hands out: the invoice
//! issued after payment and the convocation attached to confirmation mails.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Invoice, InvoiceStatus, Reservation, Stage, StageType, User};

/// Formats an amount in cents as `123.45 EUR`.
pub fn format_amount(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    format!(
        "{}{}.{:02} {}",
        sign,
        abs / 100,
        abs % 100,
        currency.to_uppercase()
    )
}

/// Invoice numbers are stable per reservation so regeneration keeps the same number.
pub fn invoice_number(stage: &Stage, reservation: &Reservation) -> String {
    let simple = reservation.id.simple().to_string();
    format!(
        "F{}-{}-{}",
        reservation.created_at.format("%Y%m"),
        stage.number,
        simple[..8].to_uppercase()
    )
}

/// Builds the invoice for a paid reservation.
pub fn build_invoice(
    reservation: &Reservation,
    user: &User,
    stage: &Stage,
    currency: &str,
    issued_at: DateTime<Utc>,
) -> Invoice {
    let number = invoice_number(stage, reservation);
    let document = render_invoice(&number, reservation, user, stage, currency, issued_at);
    Invoice {
        id: Uuid::new_v4(),
        reservation_id: reservation.id,
        user_id: user.id,
        number,
        amount_cents: stage.price_cents,
        currency: currency.to_lowercase(),
        status: if reservation.paid {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Issued
        },
        document: document.into_bytes(),
        created_at: issued_at,
    }
}

fn render_invoice(
    number: &str,
    reservation: &Reservation,
    user: &User,
    stage: &Stage,
    currency: &str,
    issued_at: DateTime<Utc>,
) -> String {
    format!(
        "INVOICE {number}\n\
         Issued on: {issued}\n\
         \n\
         Billed to: {name}\n\
         Email: {email}\n\
         \n\
         Course: {title} (no. {stage_number})\n\
         Category: {category}\n\
         Dates: {start} to {end}\n\
         Location: {address}, {postal_code} {city}\n\
         Payment method: {method}\n\
         \n\
         Total: {total}\n",
        number = number,
        issued = issued_at.format("%Y-%m-%d"),
        name = user.full_name(),
        email = user.email,
        title = stage.title,
        stage_number = stage.number,
        category = reservation.stage_type.description(),
        start = stage.start_date.format("%Y-%m-%d"),
        end = stage.end_date.format("%Y-%m-%d"),
        address = stage.address,
        postal_code = stage.postal_code,
        city = stage.city,
        method = reservation.payment_method.as_str(),
        total = format_amount(stage.price_cents, currency),
    )
}

/// The regulatory convocation sent with each booking confirmation.
pub fn render_convocation(user: &User, stage: &Stage, stage_type: StageType) -> String {
    format!(
        "CONVOCATION\n\
         \n\
         {name} is registered for the points recovery course no. {number}.\n\
         Category: {category}\n\
         \n\
         From {start} to {end}\n\
         Morning: {morning}\n\
         Afternoon: {afternoon}\n\
         Address: {address}, {postal_code} {city}\n\
         \n\
         Attendance is required for both full days. Please bring your driving\n\
         permit and an identity document.\n",
        name = user.full_name(),
        number = stage.number,
        category = stage_type.description(),
        start = stage.start_date.format("%Y-%m-%d"),
        end = stage.end_date.format("%Y-%m-%d"),
        morning = stage.morning_window,
        afternoon = stage.afternoon_window,
        address = stage.address,
        postal_code = stage.postal_code,
        city = stage.city,
    )
}

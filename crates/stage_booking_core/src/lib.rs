pub mod booking;
pub mod documents;
pub mod domain;
pub mod ports;

// In-memory port implementations shared by this crate's tests and the api service tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use booking::{
    BookingError, BookingResult, BookingService, BookingSettings, CheckoutRequest, Confirmation,
    ReminderReport, ValidatePaymentRequest,
};
pub use domain::{
    CurrentUser, Invoice, InvoiceStatus, NewUser, PaymentMethod, PermitDecision,
    PermitStatus, Reservation, Role, Stage, StageDraft, StageType, User, UserCredentials,
};
pub use ports::{
    CancelOutcome, CheckoutMetadata, CheckoutOrder, DatabaseService, GatewayEvent,
    NotificationService, PaymentGateway, PortError, PortResult, SeatClaim,
};

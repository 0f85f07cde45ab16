pub mod db;
pub mod email;
pub mod stripe;

pub use db::DbAdapter;
pub use email::EmailNotifier;
pub use self::stripe::StripeGateway;

//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How outgoing mail leaves the process.
#[derive(Clone, Debug, PartialEq)]
pub enum MailTransport {
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
    },
    /// Writes each message as a file, for development.
    File { dir: PathBuf },
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub public_base_url: String,
    pub cors_origin: String,
    pub payment_api_base: String,
    pub payment_secret_key: String,
    pub payment_webhook_secret: String,
    pub currency: String,
    pub mail_transport: MailTransport,
    pub mail_from: String,
    pub mail_from_name: String,
    pub notification_timeout: Duration,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = required("DATABASE_URL")?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let public_base_url = var_or("PUBLIC_BASE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        let cors_origin = var_or("CORS_ORIGIN", &public_base_url);

        // --- Load Payment Gateway Settings ---
        let payment_api_base = var_or("PAYMENT_API_BASE", "https://api.stripe.com")
            .trim_end_matches('/')
            .to_string();
        let payment_secret_key = required("PAYMENT_SECRET_KEY")?;
        let payment_webhook_secret = required("PAYMENT_WEBHOOK_SECRET")?;
        let currency = var_or("PAYMENT_CURRENCY", "eur").to_lowercase();

        // --- Load Mail Settings ---
        let mail_transport = match var_or("MAIL_TRANSPORT", "smtp").to_lowercase().as_str() {
            "smtp" => {
                let port_str = var_or("SMTP_PORT", "587");
                let port = port_str.parse::<u16>().map_err(|e| {
                    ConfigError::InvalidValue("SMTP_PORT".to_string(), e.to_string())
                })?;
                MailTransport::Smtp {
                    host: required("SMTP_HOST")?,
                    port,
                    username: required("SMTP_USERNAME")?,
                    password: required("SMTP_PASSWORD")?,
                }
            }
            "file" => MailTransport::File {
                dir: PathBuf::from(var_or("MAIL_DIR", "./emails")),
            },
            other => {
                return Err(ConfigError::InvalidValue(
                    "MAIL_TRANSPORT".to_string(),
                    format!("'{}' is neither 'smtp' nor 'file'", other),
                ))
            }
        };
        let mail_from = var_or("MAIL_FROM", "no-reply@localhost");
        let mail_from_name = var_or("MAIL_FROM_NAME", "Driving School");

        let timeout_str = var_or("NOTIFICATION_TIMEOUT_SECS", "30");
        let notification_timeout = timeout_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("NOTIFICATION_TIMEOUT_SECS".to_string(), e.to_string())
            })?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            public_base_url,
            cors_origin,
            payment_api_base,
            payment_secret_key,
            payment_webhook_secret,
            currency,
            mail_transport,
            mail_from,
            mail_from_name,
            notification_timeout,
        })
    }

    /// A configuration suitable for tests: file mail transport, fake secrets.
    pub fn for_tests() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: "postgres://localhost/booking_test".to_string(),
            log_level: Level::DEBUG,
            public_base_url: "http://localhost:3000".to_string(),
            cors_origin: "http://localhost:3000".to_string(),
            payment_api_base: "http://127.0.0.1:9".to_string(),
            payment_secret_key: "sk_test_fake".to_string(),
            payment_webhook_secret: "whsec_test".to_string(),
            currency: "eur".to_string(),
            mail_transport: MailTransport::File {
                dir: std::env::temp_dir().join("booking-api-mails"),
            },
            mail_from: "no-reply@example.com".to_string(),
            mail_from_name: "Driving School".to_string(),
            notification_timeout: Duration::from_secs(5),
        }
    }
}

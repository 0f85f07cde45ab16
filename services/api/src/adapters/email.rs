//! services/api/src/adapters/email.rs
//!
//! This module contains the mail adapter. It implements the `NotificationService`
//! port from the `core` crate on top of `lettre`, either through an SMTP relay or,
//! for development, by writing each message to a directory.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use stage_booking_core::documents::render_convocation;
use stage_booking_core::domain::{PermitDecision, Stage, StageType, User};
use stage_booking_core::ports::{NotificationService, PortError, PortResult};
use tracing::info;

use crate::config::{Config, MailTransport};

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `NotificationService` by sending e-mails.
pub struct EmailNotifier {
    transport: Transport,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &Config) -> PortResult<Self> {
        let transport = match &config.mail_transport {
            MailTransport::Smtp {
                host,
                port,
                username,
                password,
            } => {
                let smtp = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .map_err(|e| PortError::Unexpected(format!("Invalid SMTP relay: {}", e)))?
                    .port(*port)
                    .credentials(Credentials::new(username.clone(), password.clone()))
                    .build();
                Transport::Smtp(smtp)
            }
            MailTransport::File { dir } => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    PortError::Unexpected(format!("Cannot create mail directory: {}", e))
                })?;
                Transport::File(AsyncFileTransport::<Tokio1Executor>::new(dir))
            }
        };

        let from = format!("{} <{}>", config.mail_from_name, config.mail_from)
            .parse::<Mailbox>()
            .map_err(|e| PortError::Unexpected(format!("Invalid sender address: {}", e)))?;

        Ok(Self { transport, from })
    }

    fn mailbox_for(user: &User) -> PortResult<Mailbox> {
        format!("{} <{}>", user.full_name(), user.email)
            .parse::<Mailbox>()
            .map_err(|e| PortError::Unexpected(format!("Invalid recipient address: {}", e)))
    }

    fn text_message(&self, user: &User, subject: &str, body: String) -> PortResult<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(Self::mailbox_for(user)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| PortError::Unexpected(format!("Cannot build message: {}", e)))
    }

    async fn deliver(&self, message: Message) -> PortResult<()> {
        match &self.transport {
            Transport::Smtp(smtp) => {
                smtp.send(message)
                    .await
                    .map_err(|e| PortError::Unavailable(format!("SMTP delivery failed: {}", e)))?;
            }
            Transport::File(file) => {
                file.send(message)
                    .await
                    .map_err(|e| PortError::Unavailable(format!("File delivery failed: {}", e)))?;
            }
        }
        Ok(())
    }
}

fn greeting(user: &User) -> String {
    format!("Hello {},", user.first_name)
}

fn confirmation_body(user: &User, stage: &Stage) -> String {
    format!(
        "{greeting}\n\n\
         Your payment has been received and your seat on course no. {number} is confirmed.\n\
         The course takes place from {start} to {end} at {address}, {postal_code} {city}.\n\n\
         Your convocation is attached. Please print it and bring it on the first day.\n",
        greeting = greeting(user),
        number = stage.number,
        start = stage.start_date.format("%Y-%m-%d"),
        end = stage.end_date.format("%Y-%m-%d"),
        address = stage.address,
        postal_code = stage.postal_code,
        city = stage.city,
    )
}

fn permit_body(user: &User, decision: &PermitDecision) -> String {
    match decision {
        PermitDecision::Verified => format!(
            "{}\n\nYour driving permit has been verified. No further action is needed.\n",
            greeting(user)
        ),
        PermitDecision::Rejected { reason } => format!(
            "{}\n\nYour driving permit could not be verified{}.\n\
             Please upload a new, legible copy from your account.\n",
            greeting(user),
            reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        ),
    }
}

fn reminder_body(user: &User, stage: &Stage) -> String {
    format!(
        "{}\n\nThis is a reminder that your course no. {} starts on {} at {} \
         ({}, {} {}).\nAfternoon session: {}.\n",
        greeting(user),
        stage.number,
        stage.start_date.format("%Y-%m-%d"),
        stage.morning_window,
        stage.address,
        stage.postal_code,
        stage.city,
        stage.afternoon_window,
    )
}

//=========================================================================================
// `NotificationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl NotificationService for EmailNotifier {
    async fn send_confirmation(
        &self,
        user: &User,
        stage: &Stage,
        stage_type: StageType,
    ) -> PortResult<()> {
        let convocation = render_convocation(user, stage, stage_type);
        let attachment = Attachment::new(format!("convocation-{}.txt", stage.number))
            .body(convocation.into_bytes(), ContentType::TEXT_PLAIN);

        let message = Message::builder()
            .from(self.from.clone())
            .to(Self::mailbox_for(user)?)
            .subject(format!("Booking confirmed: course no. {}", stage.number))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(confirmation_body(user, stage)))
                    .singlepart(attachment),
            )
            .map_err(|e| PortError::Unexpected(format!("Cannot build message: {}", e)))?;

        self.deliver(message).await?;
        info!("Confirmation sent to user {} for stage {}", user.id, stage.id);
        Ok(())
    }

    async fn send_permit_decision(
        &self,
        user: &User,
        decision: &PermitDecision,
    ) -> PortResult<()> {
        let subject = match decision {
            PermitDecision::Verified => "Your driving permit has been verified",
            PermitDecision::Rejected { .. } => "Your driving permit needs attention",
        };
        let message = self.text_message(user, subject, permit_body(user, decision))?;
        self.deliver(message).await?;
        info!("Permit decision sent to user {}", user.id);
        Ok(())
    }

    async fn send_reminder(&self, user: &User, stage: &Stage) -> PortResult<()> {
        let subject = format!("Reminder: course no. {} is coming up", stage.number);
        let message = self.text_message(user, &subject, reminder_body(user, stage))?;
        self.deliver(message).await?;
        info!("Reminder sent to user {} for stage {}", user.id, stage.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stage_booking_core::domain::{PermitStatus, Role};
    use uuid::Uuid;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "sam@example.com".to_string(),
            first_name: "Sam".to_string(),
            last_name: "Martin".to_string(),
            phone: None,
            role: Role::Client,
            permit_status: PermitStatus::Pending,
        }
    }

    fn stage() -> Stage {
        Stage {
            id: Uuid::new_v4(),
            title: "Points recovery".to_string(),
            address: "3 quai Perrache".to_string(),
            postal_code: "69002".to_string(),
            city: "Lyon".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 12, 7).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 8).unwrap(),
            morning_window: "08:30-12:30".to_string(),
            afternoon_window: "13:30-16:30".to_string(),
            price_cents: 25_000,
            number: "L-1207".to_string(),
            seats_available: 4,
            hidden: false,
        }
    }

    fn file_notifier() -> (EmailNotifier, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("booking-mails-{}", Uuid::new_v4()));
        let mut config = Config::for_tests();
        config.mail_transport = MailTransport::File { dir: dir.clone() };
        (EmailNotifier::new(&config).unwrap(), dir)
    }

    #[test]
    fn rejection_mentions_reason() {
        let body = permit_body(
            &user(),
            &PermitDecision::Rejected {
                reason: Some("photo is blurred".to_string()),
            },
        );
        assert!(body.contains("could not be verified: photo is blurred"));
    }

    #[test]
    fn reminder_lists_both_sessions() {
        let body = reminder_body(&user(), &stage());
        assert!(body.contains("08:30-12:30"));
        assert!(body.contains("13:30-16:30"));
    }

    #[tokio::test]
    async fn confirmation_is_written_with_attachment() {
        let (notifier, dir) = file_notifier();

        notifier
            .send_confirmation(&user(), &stage(), StageType::Case1)
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        let raw = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(raw.contains("convocation-L-1207.txt"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn invalid_recipient_is_rejected() {
        let (notifier, dir) = file_notifier();
        let mut broken = user();
        broken.email = "not an address".to_string();

        let result = notifier.send_reminder(&broken, &stage()).await;

        assert!(matches!(result, Err(PortError::Unexpected(_))));
        let _ = std::fs::remove_dir_all(dir);
    }
}

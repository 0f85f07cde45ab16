//! services/api/src/adapters/stripe.rs
//!
//! This module contains the adapter for the Stripe payment gateway.
//! It implements the `PaymentGateway` port from the `core` crate: hosted checkout
//! sessions are created through the `async-stripe` client, and webhook deliveries
//! are authenticated with `Webhook::construct_event` before being decoded.

use ::stripe::{
    CheckoutSession, CheckoutSessionMode, CheckoutSessionPaymentStatus, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    Currency, EventObject, EventType, Webhook, WebhookError,
};
use async_trait::async_trait;
use stage_booking_core::ports::{
    CheckoutOrder, GatewayEvent, PaymentGateway, PortError, PortResult,
};
use std::collections::HashMap;
use tracing::{debug, error, info};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

pub struct StripeGateway {
    client: Client,
    webhook_secret: String,
    currency: Currency,
    success_url: String,
    cancel_url: String,
}

impl StripeGateway {
    /// Creates a new `StripeGateway`. Redirect URLs are derived from the public base URL.
    pub fn new(
        api_base: &str,
        secret_key: String,
        webhook_secret: String,
        currency: &str,
        public_base_url: &str,
    ) -> PortResult<Self> {
        Ok(Self {
            client: Client::from_url(api_base, secret_key),
            webhook_secret,
            currency: parse_currency(currency)?,
            success_url: format!("{}/checkout/success", public_base_url),
            cancel_url: format!("{}/checkout/cancel", public_base_url),
        })
    }

    fn checkout_params<'a>(
        &'a self,
        order: &CheckoutOrder,
        client_reference_id: &'a str,
    ) -> CreateCheckoutSession<'a> {
        CreateCheckoutSession {
            cancel_url: Some(&self.cancel_url),
            success_url: Some(&self.success_url),
            client_reference_id: Some(client_reference_id),
            mode: Some(CheckoutSessionMode::Payment),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                quantity: Some(1),
                price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                    currency: self.currency,
                    unit_amount: Some(order.price_cents),
                    product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                        name: order.stage_title.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            metadata: Some(
                order
                    .metadata
                    .to_pairs()
                    .into_iter()
                    .map(|(key, value)| (key.to_string(), value))
                    .collect(),
            ),
            ..Default::default()
        }
    }
}

/// Currencies are configured as ISO codes such as `eur`.
fn parse_currency(code: &str) -> PortResult<Currency> {
    serde_json::from_value(serde_json::Value::String(code.to_lowercase()))
        .map_err(|_| PortError::Unexpected(format!("Unsupported currency '{}'", code)))
}

/// Maps a verified checkout event to what the booking service acts on.
///
/// Only sessions whose payment has been collected count as completed.
/// Delayed methods report `unpaid` first and `async_payment_succeeded` later.
fn checkout_event(
    kind: EventType,
    session_id: String,
    payment_status: CheckoutSessionPaymentStatus,
    metadata: HashMap<String, String>,
) -> GatewayEvent {
    let settles = matches!(
        kind,
        EventType::CheckoutSessionCompleted | EventType::CheckoutSessionAsyncPaymentSucceeded
    );
    if !settles {
        return GatewayEvent::Other(format!("{:?}", kind));
    }
    if payment_status != CheckoutSessionPaymentStatus::Paid {
        info!(
            "Checkout session {} completed with payment status {:?}, waiting for settlement",
            session_id, payment_status
        );
        return GatewayEvent::Other(format!("{:?}/{:?}", kind, payment_status));
    }
    GatewayEvent::CheckoutCompleted {
        session_id,
        metadata,
    }
}

//=========================================================================================
// `PaymentGateway` Trait Implementation
//=========================================================================================

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(&self, order: &CheckoutOrder) -> PortResult<String> {
        let client_reference_id = order.metadata.user_id.to_string();
        let params = self.checkout_params(order, &client_reference_id);

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| {
                error!("Failed to create Stripe checkout session: {:?}", e);
                PortError::Unavailable(e.to_string())
            })?;
        info!("Created checkout session {}", session.id);

        session.url.ok_or_else(|| {
            error!("Checkout session {} missing URL", session.id);
            PortError::Unexpected("Checkout session missing URL".to_string())
        })
    }

    fn verify_webhook(&self, signature_header: &str, payload: &str) -> PortResult<GatewayEvent> {
        let event = Webhook::construct_event(payload, signature_header, &self.webhook_secret)
            .map_err(|e| match e {
                WebhookError::BadParse(e) => {
                    PortError::Unexpected(format!("Malformed webhook payload: {}", e))
                }
                other => {
                    debug!("Rejected webhook delivery: {:?}", other);
                    PortError::Unauthorized
                }
            })?;

        match event.data.object {
            EventObject::CheckoutSession(session) => Ok(checkout_event(
                event.type_,
                session.id.to_string(),
                session.payment_status,
                session.metadata.unwrap_or_default(),
            )),
            _ => Ok(GatewayEvent::Other(format!("{:?}", event.type_))),
        }
    }
}

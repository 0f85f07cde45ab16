pub mod account;
pub mod admin;
pub mod auth;
pub mod invoices;
pub mod middleware;
pub mod payments;
pub mod reservations;
pub mod rest;
pub mod stages;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use middleware::{require_admin, require_auth};
pub use rest::ApiDoc;
pub use state::AppState;

/// Builds the complete HTTP application: public, authenticated and admin routes,
/// the OpenAPI document and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/stages", get(stages::list_stages_handler))
        .route("/stages/{id}", get(stages::get_stage_handler))
        .route("/webhooks/payments", post(payments::webhook_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/reservations", post(reservations::create_reservation_handler))
        .route("/reservations/mine", get(reservations::my_reservations_handler))
        .route(
            "/reservations/{id}/cancel",
            post(reservations::cancel_reservation_handler),
        )
        .route("/checkout", post(reservations::checkout_handler))
        .route("/invoices/mine", get(invoices::my_invoices_handler))
        .route(
            "/invoices/{id}/document",
            get(invoices::invoice_document_handler),
        )
        .route("/me/permit", put(account::submit_permit_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // Admin routes: require_auth runs first, then require_admin
    let admin_routes = Router::new()
        .route("/admin/payments/validate", post(payments::validate_payment_handler))
        .route("/admin/stages", post(admin::create_stage_handler))
        .route("/admin/stages/{id}", put(admin::update_stage_handler))
        .route(
            "/admin/stages/{id}/reminders",
            post(admin::send_reminders_handler),
        )
        .route("/admin/users/{id}/permit", put(admin::decide_permit_handler))
        .route(
            "/admin/reservations/{id}/invoice",
            post(admin::regenerate_invoice_handler),
        )
        .layer(axum_middleware::from_fn(require_admin))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorBody;
    use crate::web::rest::{
        CheckoutResponse, ConfirmationResponse, ReservationResponse, StageResponse, WebhookAck,
    };
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::json;
    use stage_booking_core::domain::{Role, Stage, StageType, User};
    use stage_booking_core::ports::{
        DatabaseService, GatewayEvent, META_STAGE_ID, META_STAGE_TYPE, META_USER_ID,
    };
    use stage_booking_core::testing::{FakeGateway, InMemoryStore, RecordingNotifier};
    use stage_booking_core::{BookingService, BookingSettings, PaymentMethod};
    use std::collections::HashMap;

    struct TestApp {
        server: TestServer,
        store: Arc<InMemoryStore>,
        gateway: Arc<FakeGateway>,
        notifier: Arc<RecordingNotifier>,
    }

    fn test_app() -> TestApp {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let booking = BookingService::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            BookingSettings::default(),
        );
        let state = Arc::new(AppState {
            db: store.clone(),
            config: Arc::new(Config::for_tests()),
            payments: gateway.clone(),
            booking,
        });
        let server = TestServer::new(router(state)).expect("Failed to create test server");
        TestApp {
            server,
            store,
            gateway,
            notifier,
        }
    }

    async fn login_as(app: &TestApp, role: Role) -> (User, String) {
        let user = app.store.seed_user(role).await;
        let session = app.store.seed_session(user.id).await;
        (user, format!("session={}", session))
    }

    async fn unpaid_reservation(app: &TestApp, user: &User, stage: &Stage) -> uuid::Uuid {
        app.store
            .create_reservation(user.id, stage.id, PaymentMethod::Check, StageType::Case1)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn lists_public_stages_without_login() {
        let app = test_app();
        let stage = app.store.seed_stage(4).await;

        let response = app.server.get("/stages").await;

        response.assert_status_ok();
        let stages: Vec<StageResponse> = response.json();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].id, stage.id);
        assert_eq!(stages[0].seats_available, 4);
    }

    #[tokio::test]
    async fn protected_routes_require_a_session() {
        let app = test_app();

        let response = app.server.get("/reservations/mine").await;

        response.assert_status_unauthorized();
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn signup_then_login() {
        let app = test_app();

        let response = app
            .server
            .post("/auth/signup")
            .json(&json!({
                "email": "Lea@Example.com",
                "password": "correct horse",
                "firstName": "Lea",
                "lastName": "Durand"
            }))
            .await;
        response.assert_status(StatusCode::CREATED);

        let response = app
            .server
            .post("/auth/login")
            .json(&json!({ "email": "lea@example.com", "password": "correct horse" }))
            .await;
        response.assert_status_ok();

        let response = app
            .server
            .post("/auth/login")
            .json(&json!({ "email": "lea@example.com", "password": "wrong password" }))
            .await;
        response.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn admin_validates_payment() {
        let app = test_app();
        let stage = app.store.seed_stage(2).await;
        let (client, _) = login_as(&app, Role::Client).await;
        let (_, admin_cookie) = login_as(&app, Role::Admin).await;
        let reservation_id = unpaid_reservation(&app, &client, &stage).await;

        let response = app
            .server
            .post("/admin/payments/validate")
            .add_header("cookie", admin_cookie)
            .json(&json!({
                "userId": client.id,
                "stageId": stage.id,
                "reservationId": reservation_id
            }))
            .await;

        response.assert_status_ok();
        let confirmation: ConfirmationResponse = response.json();
        assert!(confirmation.reservation.paid);
        assert_eq!(confirmation.seats_available, 1);
        assert_eq!(app.store.seats(stage.id).await, 1);
        assert_eq!(app.notifier.confirmations().await.len(), 1);
    }

    #[tokio::test]
    async fn non_admin_cannot_validate_payment() {
        let app = test_app();
        let stage = app.store.seed_stage(2).await;
        let (client, cookie) = login_as(&app, Role::Client).await;
        let reservation_id = unpaid_reservation(&app, &client, &stage).await;

        let response = app
            .server
            .post("/admin/payments/validate")
            .add_header("cookie", cookie)
            .json(&json!({
                "userId": client.id,
                "stageId": stage.id,
                "reservationId": reservation_id
            }))
            .await;

        response.assert_status_forbidden();
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "FORBIDDEN");
        assert_eq!(app.store.seats(stage.id).await, 2);
    }

    #[tokio::test]
    async fn full_stage_reports_no_places_available() {
        let app = test_app();
        let stage = app.store.seed_stage(1).await;
        let (first, _) = login_as(&app, Role::Client).await;
        let (second, _) = login_as(&app, Role::Client).await;
        let (_, admin_cookie) = login_as(&app, Role::Admin).await;
        let first_id = unpaid_reservation(&app, &first, &stage).await;
        let second_id = unpaid_reservation(&app, &second, &stage).await;

        for (user, reservation_id) in [(&first, first_id), (&second, second_id)] {
            app.server
                .post("/admin/payments/validate")
                .add_header("cookie", admin_cookie.clone())
                .json(&json!({
                    "userId": user.id,
                    "stageId": stage.id,
                    "reservationId": reservation_id
                }))
                .await;
        }

        let reservation = app.store.get_reservation(second_id).await.unwrap();
        assert!(!reservation.paid);
        assert_eq!(app.store.seats(stage.id).await, 0);

        let response = app
            .server
            .post("/admin/payments/validate")
            .add_header("cookie", admin_cookie)
            .json(&json!({
                "userId": second.id,
                "stageId": stage.id,
                "reservationId": second_id
            }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "NO_PLACES_AVAILABLE");
    }

    #[tokio::test]
    async fn mismatched_ids_are_rejected() {
        let app = test_app();
        let stage = app.store.seed_stage(3).await;
        let other_stage = app.store.seed_stage(3).await;
        let (client, _) = login_as(&app, Role::Client).await;
        let (_, admin_cookie) = login_as(&app, Role::Admin).await;
        let reservation_id = unpaid_reservation(&app, &client, &stage).await;

        let response = app
            .server
            .post("/admin/payments/validate")
            .add_header("cookie", admin_cookie)
            .json(&json!({
                "userId": client.id,
                "stageId": other_stage.id,
                "reservationId": reservation_id
            }))
            .await;

        response.assert_status(StatusCode::CONFLICT);
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "MISMATCHED_IDS");
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_changes_nothing() {
        let app = test_app();
        let stage = app.store.seed_stage(2).await;
        let (client, _) = login_as(&app, Role::Client).await;
        let payload = r#"{"type":"checkout.session.completed"}"#;
        let metadata = HashMap::from([
            (META_USER_ID.to_string(), client.id.to_string()),
            (META_STAGE_ID.to_string(), stage.id.to_string()),
            (META_STAGE_TYPE.to_string(), "case1".to_string()),
        ]);
        app.gateway.register_event(
            payload,
            GatewayEvent::CheckoutCompleted {
                session_id: "cs_test_1".to_string(),
                metadata,
            },
        );

        let response = app
            .server
            .post("/webhooks/payments")
            .add_header("stripe-signature", "t=0,v1=forged")
            .text(payload)
            .await;

        response.assert_status_bad_request();
        assert_eq!(app.store.seats(stage.id).await, 2);
        assert_eq!(app.store.reservation_count().await, 0);

        let response = app.server.post("/webhooks/payments").text(payload).await;
        response.assert_status_bad_request();
    }

    #[tokio::test]
    async fn webhook_creates_and_pays_reservation() {
        let app = test_app();
        let stage = app.store.seed_stage(2).await;
        let (client, cookie) = login_as(&app, Role::Client).await;
        let payload = r#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let metadata = HashMap::from([
            (META_USER_ID.to_string(), client.id.to_string()),
            (META_STAGE_ID.to_string(), stage.id.to_string()),
            (META_STAGE_TYPE.to_string(), "case3".to_string()),
        ]);
        app.gateway.register_event(
            payload,
            GatewayEvent::CheckoutCompleted {
                session_id: "cs_test_2".to_string(),
                metadata,
            },
        );

        let deliver = || {
            app.server
                .post("/webhooks/payments")
                .add_header("stripe-signature", FakeGateway::SIGNATURE)
                .text(payload)
        };

        let response = deliver().await;
        response.assert_status_ok();
        let ack: WebhookAck = response.json();
        assert_eq!(ack.outcome, "confirmed");
        assert_eq!(app.store.seats(stage.id).await, 1);

        // A redelivery is acknowledged without taking a second seat.
        let response = deliver().await;
        response.assert_status_ok();
        let ack: WebhookAck = response.json();
        assert_eq!(ack.outcome, "already_paid");
        assert_eq!(app.store.seats(stage.id).await, 1);

        let response = app
            .server
            .get("/reservations/mine")
            .add_header("cookie", cookie)
            .await;
        let reservations: Vec<ReservationResponse> = response.json();
        assert_eq!(reservations.len(), 1);
        assert!(reservations[0].paid);
        assert_eq!(reservations[0].stage_type, "case3");
    }

    #[tokio::test]
    async fn unrelated_webhook_events_are_ignored() {
        let app = test_app();
        let payload = r#"{"type":"customer.created"}"#;
        app.gateway
            .register_event(payload, GatewayEvent::Other("customer.created".to_string()));

        let response = app
            .server
            .post("/webhooks/payments")
            .add_header("stripe-signature", FakeGateway::SIGNATURE)
            .text(payload)
            .await;

        response.assert_status_ok();
        let ack: WebhookAck = response.json();
        assert_eq!(ack.outcome, "ignored");
    }

    #[tokio::test]
    async fn cancelling_returns_the_seat() {
        let app = test_app();
        let stage = app.store.seed_stage(3).await;
        let (client, cookie) = login_as(&app, Role::Client).await;
        let reservation_id = unpaid_reservation(&app, &client, &stage).await;

        let response = app
            .server
            .post(&format!("/reservations/{}/cancel", reservation_id))
            .add_header("cookie", cookie)
            .await;

        response.assert_status(StatusCode::NO_CONTENT);
        assert_eq!(app.store.seats(stage.id).await, 4);
        assert_eq!(app.store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn paid_reservation_cannot_be_cancelled() {
        let app = test_app();
        let stage = app.store.seed_stage(3).await;
        let (client, cookie) = login_as(&app, Role::Client).await;
        let reservation_id = unpaid_reservation(&app, &client, &stage).await;
        app.store.claim_seat(reservation_id).await.unwrap();

        let response = app
            .server
            .post(&format!("/reservations/{}/cancel", reservation_id))
            .add_header("cookie", cookie)
            .await;

        response.assert_status(StatusCode::CONFLICT);
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "ALREADY_PAID");
        assert_eq!(app.store.seats(stage.id).await, 2);
    }

    #[tokio::test]
    async fn checkout_reports_missing_fields() {
        let app = test_app();
        let stage = app.store.seed_stage(3).await;
        let (client, cookie) = login_as(&app, Role::Client).await;

        let response = app
            .server
            .post("/checkout")
            .add_header("cookie", cookie)
            .json(&json!({
                "stageId": stage.id,
                "stagePrice": stage.price_cents,
                "userId": client.id
            }))
            .await;

        response.assert_status_bad_request();
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "VALIDATION_ERROR");
        assert!(body.message.contains("stage_title"));
        assert!(app.gateway.orders().await.is_empty());
    }

    #[tokio::test]
    async fn checkout_returns_gateway_url() {
        let app = test_app();
        let stage = app.store.seed_stage(3).await;
        let (client, cookie) = login_as(&app, Role::Client).await;

        let response = app
            .server
            .post("/checkout")
            .add_header("cookie", cookie)
            .json(&json!({
                "stageId": stage.id,
                "stageTitle": stage.title,
                "stagePrice": stage.price_cents,
                "userId": client.id,
                "typeStage": "case2"
            }))
            .await;

        response.assert_status_ok();
        let checkout: CheckoutResponse = response.json();
        assert_eq!(checkout.url, "https://checkout.test/session/1");
        let orders = app.gateway.orders().await;
        assert_eq!(orders[0].metadata.stage_type, StageType::Case2);
        // Nothing is booked before the payment completes.
        assert_eq!(app.store.seats(stage.id).await, 3);
    }

    #[tokio::test]
    async fn malformed_json_uses_error_shape() {
        let app = test_app();
        let (_, cookie) = login_as(&app, Role::Client).await;

        let response = app
            .server
            .post("/reservations")
            .add_header("cookie", cookie)
            .json(&json!({ "stageId": "not-a-uuid" }))
            .await;

        response.assert_status_bad_request();
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "VALIDATION_ERROR");

        // Account routes answer incomplete bodies the same way
        let signup = app
            .server
            .post("/auth/signup")
            .json(&json!({ "email": "a@b.c" }))
            .await;
        signup.assert_status_bad_request();
        assert_eq!(signup.json::<ErrorBody>().error, "VALIDATION_ERROR");

        let login = app
            .server
            .post("/auth/login")
            .json(&json!({ "email": "a@b.c", "password": 12 }))
            .await;
        login.assert_status_bad_request();
        assert_eq!(login.json::<ErrorBody>().error, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = test_app();

        let response = app.server.get("/api-docs/openapi.json").await;

        response.assert_status_ok();
        let doc: serde_json::Value = response.json();
        assert!(doc["paths"]["/webhooks/payments"].is_object());
        assert!(doc["paths"]["/admin/payments/validate"].is_object());
    }
}

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use crate::services::webhook::WebhookError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

fn error_response(err: WebhookError) -> Response {
    match err {
        WebhookError::MissingSignature => {
            warn!("stripe webhook without signature header");
            (StatusCode::BAD_REQUEST, "No signature").into_response()
        }
        WebhookError::SignatureInvalid(reason) => {
            warn!(%reason, "stripe webhook verification failed");
            (StatusCode::BAD_REQUEST, "Invalid signature").into_response()
        }
        WebhookError::UnhandledEventType(evt_type) => {
            info!(%evt_type, "ignoring unhandled stripe event");
            (StatusCode::BAD_REQUEST, "Unhandled event type").into_response()
        }
        WebhookError::Malformed(reason) => {
            warn!(%reason, "malformed stripe event");
            (StatusCode::BAD_REQUEST, format!("Malformed event: {reason}")).into_response()
        }
        err => {
            error!(?err, "error processing stripe webhook");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error processing webhook: {err}"),
            )
                .into_response()
        }
    }
}

// POST /webhook/stripe
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let Some(sig) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
    else {
        return error_response(WebhookError::MissingSignature);
    };

    let Ok(payload) = std::str::from_utf8(&body) else {
        return error_response(WebhookError::SignatureInvalid("payload is not utf-8".into()));
    };

    let evt = match app_state
        .billing_gateway()
        .verify_webhook_signature(payload, sig)
    {
        Ok(evt) => evt,
        Err(err) => return error_response(WebhookError::SignatureInvalid(err.to_string())),
    };

    info!(evt_type = %evt.r#type, evt_id = ?evt.id, "processing stripe webhook");
    match app_state.webhook_reconciler().handle(&evt).await {
        Ok(outcome) => {
            info!(evt_type = %evt.r#type, ?outcome, "stripe webhook processed");
            (StatusCode::OK, "OK").into_response()
        }
        Err(err) => error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscribeFlow;
    use crate::db::mock_db::MockDb;
    use crate::models::subscription::SubscriptionStatus;
    use crate::routes::app_router;
    use crate::routes::test_support::test_state;
    use crate::services::stripe::{MockStripeService, MOCK_WEBHOOK_SIGNATURE};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn webhook_request(payload: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook/stripe")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        builder.body(Body::from(payload.to_string())).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn checkout_payload(plan_id: uuid::Uuid) -> String {
        json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_123",
                "customer": "cus_test_123",
                "subscription": "sub_test_123",
                "metadata": { "planId": plan_id.to_string(), "billingPeriod": "monthly" }
            } }
        })
        .to_string()
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let (state, _db, _stripe) =
            test_state(MockDb::default(), MockStripeService::new(), SubscribeFlow::Checkout);
        let resp = app_router(state)
            .oneshot(webhook_request(r#"{"type":"test.event"}"#, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "No signature");
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_without_mutation() {
        let (db, _user) = MockDb::default().with_user("test@example.com", Some("cus_test_123"));
        let (db, plan) = db.with_plan("Basic", Some("price_123"), None);
        let (state, db, _stripe) = test_state(db, MockStripeService::new(), SubscribeFlow::Checkout);

        let resp = app_router(state)
            .oneshot(webhook_request(
                &checkout_payload(plan.id),
                Some("invalid_signature"),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "Invalid signature");
        assert_eq!(db.subscription_count(), 0);
    }

    #[tokio::test]
    async fn unhandled_event_type_is_400() {
        let (state, db, _stripe) =
            test_state(MockDb::default(), MockStripeService::new(), SubscribeFlow::Checkout);
        let payload = json!({
            "type": "unhandled.event",
            "data": { "object": { "id": "cs_test_123" } }
        })
        .to_string();
        let resp = app_router(state)
            .oneshot(webhook_request(&payload, Some(MOCK_WEBHOOK_SIGNATURE)))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.contains("Unhandled event type"));
        assert_eq!(db.subscription_count(), 0);
    }

    #[tokio::test]
    async fn checkout_completed_creates_subscription_once() {
        let (db, user) = MockDb::default().with_user("test@example.com", Some("cus_test_123"));
        let (db, plan) = db.with_plan("Basic", Some("price_123"), None);
        let (state, db, _stripe) = test_state(db, MockStripeService::new(), SubscribeFlow::Checkout);
        let payload = checkout_payload(plan.id);

        for _ in 0..2 {
            let resp = app_router(state.clone())
                .oneshot(webhook_request(&payload, Some(MOCK_WEBHOOK_SIGNATURE)))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(body_text(resp).await, "OK");
        }

        assert_eq!(db.subscription_count(), 1);
        let sub = db.subscription_for(user.id).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.stripe_subscription_id.as_deref(), Some("sub_test_123"));
    }

    #[tokio::test]
    async fn subscription_updated_syncs_status() {
        let (db, user) = MockDb::default().with_user("test@example.com", Some("cus_test_123"));
        let (db, plan) = db.with_plan("Basic", None, None);
        let (state, db, _stripe) = test_state(db, MockStripeService::new(), SubscribeFlow::Checkout);
        let created = checkout_payload(plan.id);
        app_router(state.clone())
            .oneshot(webhook_request(&created, Some(MOCK_WEBHOOK_SIGNATURE)))
            .await
            .unwrap();

        let updated = json!({
            "type": "customer.subscription.updated",
            "data": { "object": { "id": "sub_test_123", "status": "expired" } }
        })
        .to_string();
        let resp = app_router(state)
            .oneshot(webhook_request(&updated, Some(MOCK_WEBHOOK_SIGNATURE)))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            db.subscription_for(user.id).unwrap().status,
            SubscriptionStatus::Expired
        );
    }

    #[tokio::test]
    async fn unknown_customer_is_500_so_the_processor_retries() {
        let (db, plan) = MockDb::default().with_plan("Basic", None, None);
        let (state, db, _stripe) = test_state(db, MockStripeService::new(), SubscribeFlow::Checkout);
        let payload = checkout_payload(plan.id);
        let resp = app_router(state)
            .oneshot(webhook_request(&payload, Some(MOCK_WEBHOOK_SIGNATURE)))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(resp).await.starts_with("Error processing webhook:"));
        assert_eq!(db.subscription_count(), 0);
    }

    #[tokio::test]
    async fn database_failure_is_500_without_mutation() {
        let (db, _user) = MockDb::default().with_user("test@example.com", Some("cus_test_123"));
        let (db, plan) = db.with_plan("Basic", None, None);
        let (state, db, _stripe) =
            test_state(db.failing(), MockStripeService::new(), SubscribeFlow::Checkout);
        let payload = checkout_payload(plan.id);
        let resp = app_router(state)
            .oneshot(webhook_request(&payload, Some(MOCK_WEBHOOK_SIGNATURE)))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(resp).await.starts_with("Error processing webhook:"));
        assert_eq!(db.subscription_count(), 0);
    }

    #[tokio::test]
    async fn unknown_event_type_with_bad_signature_is_still_invalid_signature() {
        let (state, db, _stripe) =
            test_state(MockDb::default(), MockStripeService::new(), SubscribeFlow::Checkout);
        let payload = json!({ "type": "unhandled.event" }).to_string();
        let resp = app_router(state)
            .oneshot(webhook_request(&payload, Some("t=-9223372036854775808,v1=00")))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "Invalid signature");
        assert_eq!(db.subscription_count(), 0);
    }

    #[tokio::test]
    async fn malformed_checkout_is_400() {
        let (state, _db, _stripe) =
            test_state(MockDb::default(), MockStripeService::new(), SubscribeFlow::Checkout);
        let payload = json!({
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_test_123" } }
        })
        .to_string();
        let resp = app_router(state)
            .oneshot(webhook_request(&payload, Some(MOCK_WEBHOOK_SIGNATURE)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

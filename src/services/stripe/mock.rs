use super::{
    CheckoutSession, CreateCheckoutSessionRequest, StripeEvent, StripeService, StripeServiceError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// The only `Stripe-Signature` value the mock accepts.
pub const MOCK_WEBHOOK_SIGNATURE: &str = "t=1700000000,v1=mock_valid_signature";

#[derive(Clone, Default)]
pub struct MockStripeService {
    pub prices: Arc<Mutex<HashMap<String, String>>>,
    pub fail_price_lookup: bool,
    pub created_customers: Arc<Mutex<Vec<(String, Uuid)>>>,
    pub created_sessions: Arc<Mutex<Vec<CheckoutSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub portal_requests: Arc<Mutex<Vec<(String, String)>>>,
    counter: Arc<AtomicUsize>,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, lookup_key: &str, price_id: &str) -> Self {
        self.prices
            .lock()
            .unwrap()
            .insert(lookup_key.to_string(), price_id.to_string());
        self
    }

    pub fn failing_price_lookup(mut self) -> Self {
        self.fail_price_lookup = true;
        self
    }

    fn make_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}_{}", prefix, n)
    }
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn find_price_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> Result<Option<String>, StripeServiceError> {
        if self.fail_price_lookup {
            return Err(StripeServiceError::Api("price lookup unavailable".into()));
        }
        Ok(self.prices.lock().unwrap().get(lookup_key).cloned())
    }

    async fn create_customer(
        &self,
        email: &str,
        user_id: Uuid,
    ) -> Result<String, StripeServiceError> {
        let id = self.make_id("cus_test");
        self.created_customers
            .lock()
            .unwrap()
            .push((email.to_string(), user_id));
        Ok(id)
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.last_create_requests.lock().unwrap().push(req);

        let session = CheckoutSession {
            id: self.make_id("cs_test"),
            url: Some("https://example.test/checkout".into()),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, StripeServiceError> {
        self.portal_requests
            .lock()
            .unwrap()
            .push((customer_id.to_string(), return_url.to_string()));
        Ok("https://example.test/portal".into())
    }

    fn verify_webhook(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if signature_header != MOCK_WEBHOOK_SIGNATURE {
            return Err(StripeServiceError::Webhook("signature mismatch".into()));
        }
        let val: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let ty = val
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StripeServiceError::Serde("event without type".into()))?
            .to_string();
        let id = val.get("id").and_then(|v| v.as_str()).map(str::to_string);
        Ok(StripeEvent {
            id,
            r#type: ty,
            payload: val,
        })
    }
}

use super::{
    CheckoutLineItem, CheckoutSession, CreateCheckoutSessionRequest, StripeEvent, StripeService,
    StripeServiceError,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Processor client. The API key and webhook secret are injected here and
/// nowhere else.
pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
}

impl LiveStripeService {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn from_settings(settings: &crate::config::StripeSettings) -> Self {
        Self::new(settings.secret_key.clone(), settings.webhook_secret.clone())
    }
}

fn line_item(item: &CheckoutLineItem) -> stripe::CreateCheckoutSessionLineItems {
    stripe::CreateCheckoutSessionLineItems {
        price: Some(item.price.clone()),
        quantity: Some(item.quantity),
        ..Default::default()
    }
}

fn parse_customer_id(customer_id: &str) -> Result<stripe::CustomerId, StripeServiceError> {
    customer_id
        .parse::<stripe::CustomerId>()
        .map_err(|e| StripeServiceError::Other(e.to_string()))
}

#[async_trait]
impl StripeService for LiveStripeService {
    async fn find_price_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> Result<Option<String>, StripeServiceError> {
        let mut params = stripe::ListPrices::new();
        params.lookup_keys = Some(vec![lookup_key.to_string()]);
        params.limit = Some(1);

        let prices = stripe::Price::list(&self.client, &params).await?;
        Ok(prices.data.into_iter().next().map(|price| price.id.to_string()))
    }

    async fn create_customer(
        &self,
        email: &str,
        user_id: Uuid,
    ) -> Result<String, StripeServiceError> {
        let mut params = stripe::CreateCustomer::new();
        params.email = Some(email);
        params.metadata = Some(
            [("userId".to_string(), user_id.to_string())]
                .into_iter()
                .collect(),
        );
        let customer = stripe::Customer::create(&self.client, params).await?;
        Ok(customer.id.to_string())
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let customer = req.customer.as_deref().map(parse_customer_id).transpose()?;

        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(stripe::CheckoutSessionMode::Subscription);
        params.success_url = Some(&req.success_url);
        params.cancel_url = Some(&req.cancel_url);
        params.client_reference_id = req.client_reference_id.as_deref();
        params.customer = customer;
        params.metadata = req
            .metadata
            .as_ref()
            .map(|meta| meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        if !req.line_items.is_empty() {
            params.line_items = Some(req.line_items.iter().map(line_item).collect());
        }

        let session = stripe::CheckoutSession::create(&self.client, params).await?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, StripeServiceError> {
        let customer = parse_customer_id(customer_id)?;
        let mut params = stripe::CreateBillingPortalSession::new(customer);
        params.return_url = Some(return_url);
        let session = stripe::BillingPortalSession::create(&self.client, params).await?;
        Ok(session.url)
    }

    fn verify_webhook(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        let event =
            stripe::Webhook::construct_event(payload, signature_header, &self.webhook_secret)?;

        // EventType folds unmodelled types into `Unknown`; dispatch on the raw string.
        let raw: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let r#type = raw
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| event.type_.to_string());

        Ok(StripeEvent {
            id: Some(event.id.to_string()),
            r#type,
            payload: raw,
        })
    }
}

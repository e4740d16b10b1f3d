use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::db::user_repository::UserRepository;
use crate::models::plan::Plan;
use crate::models::subscription::BillingPeriod;
use crate::models::user::User;
use crate::services::stripe::{
    CheckoutLineItem, CreateCheckoutSessionRequest, StripeEvent, StripeService, StripeServiceError,
};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("No price is available for this plan and billing period.")]
    InvalidLookupKey,
    #[error("No billing account is linked to this user.")]
    MissingCustomer,
    #[error("user not found")]
    UserNotFound,
    #[error(transparent)]
    Stripe(#[from] StripeServiceError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Redirect targets handed to the processor.
#[derive(Debug, Clone)]
pub struct BillingUrls {
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
}

impl BillingUrls {
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            success_url: base.to_string(),
            cancel_url: format!("{base}/subscription/subscribe?checkoutCancelled=true"),
            portal_return_url: base.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRedirect {
    pub session_id: String,
    pub url: String,
}

/// Adapter between local users/plans and the processor.
#[derive(Clone)]
pub struct BillingGateway {
    stripe: Arc<dyn StripeService>,
    users: Arc<dyn UserRepository>,
    urls: BillingUrls,
}

impl BillingGateway {
    pub fn new(
        stripe: Arc<dyn StripeService>,
        users: Arc<dyn UserRepository>,
        urls: BillingUrls,
    ) -> Self {
        Self {
            stripe,
            users,
            urls,
        }
    }

    /// Opens a subscription-mode checkout session for `plan` at `period`.
    /// The price is resolved before any customer is created.
    pub async fn create_checkout_session(
        &self,
        user: &User,
        plan: &Plan,
        period: BillingPeriod,
    ) -> Result<CheckoutRedirect, BillingError> {
        let lookup_key = plan.lookup_key(period).ok_or(BillingError::InvalidLookupKey)?;
        let price_id = match self.stripe.find_price_by_lookup_key(lookup_key).await {
            Ok(Some(price_id)) => price_id,
            Ok(None) => {
                warn!(plan_id = %plan.id, lookup_key, "no processor price for lookup key");
                return Err(BillingError::InvalidLookupKey);
            }
            Err(err) => {
                warn!(?err, plan_id = %plan.id, lookup_key, "price lookup failed");
                return Err(BillingError::InvalidLookupKey);
            }
        };

        let customer_id = self.get_or_create_customer_id(user).await?;

        let mut metadata = BTreeMap::new();
        metadata.insert("planId".to_string(), plan.id.to_string());
        metadata.insert("billingPeriod".to_string(), period.as_str().to_string());

        let req = CreateCheckoutSessionRequest {
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
            line_items: vec![CheckoutLineItem {
                price: price_id,
                quantity: 1,
            }],
            client_reference_id: Some(user.id.to_string()),
            customer: Some(customer_id),
            metadata: Some(metadata),
        };

        let session = self.stripe.create_checkout_session(req).await?;
        let url = session.url.ok_or_else(|| {
            StripeServiceError::Other("checkout session returned without a url".into())
        })?;
        info!(user_id = %user.id, plan_id = %plan.id, session_id = %session.id, "checkout session created");

        Ok(CheckoutRedirect {
            session_id: session.id,
            url,
        })
    }

    /// Returns the cached customer id, creating and storing one on first use.
    pub async fn get_or_create_customer_id(&self, user: &User) -> Result<String, BillingError> {
        if let Some(existing) = user.stripe_customer_id.as_deref().filter(|c| !c.is_empty()) {
            return Ok(existing.to_string());
        }

        let created = self.stripe.create_customer(&user.email, user.id).await?;
        let stored = self
            .users
            .set_user_stripe_customer_id(user.id, &created)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => BillingError::UserNotFound,
                other => BillingError::Database(other),
            })?;
        if stored != created {
            warn!(user_id = %user.id, "customer id already set by a concurrent request");
        }
        Ok(stored)
    }

    pub async fn create_billing_portal_session(&self, user: &User) -> Result<String, BillingError> {
        let customer_id = user
            .stripe_customer_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(BillingError::MissingCustomer)?;
        let url = self
            .stripe
            .create_billing_portal_session(customer_id, &self.urls.portal_return_url)
            .await?;
        Ok(url)
    }

    /// Authenticates a webhook delivery. Nothing in the payload may be trusted
    /// before this returns `Ok`.
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        self.stripe.verify_webhook(payload, signature_header)
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::plan_repository::PlanRepository;
use crate::db::subscription_repository::{CheckoutUpsertOutcome, SubscriptionRepository};
use crate::db::user_repository::UserRepository;
use crate::models::subscription::{
    BillingPeriod, CheckoutSubscription, ProcessorSubscriptionUpdate, SubscriptionError,
    SubscriptionStatus,
};
use crate::services::stripe::StripeEvent;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("No signature")]
    MissingSignature,
    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("Unhandled event type: {0}")]
    UnhandledEventType(String),
    #[error("unknown reference: {0}")]
    UnknownReference(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<SubscriptionError> for WebhookError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::Database(e) => WebhookError::Database(e),
            other => WebhookError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    SubscriptionCreated { user_id: Uuid },
    /// Same external id seen before; nothing written.
    DuplicateDelivery,
    /// The user already owns a subscription under another external id.
    UserAlreadySubscribed { user_id: Uuid },
    SubscriptionSynced { status: SubscriptionStatus },
    /// No local row carries the external id yet.
    UnknownSubscription,
}

fn jget<'a>(val: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str().filter(|s| !s.is_empty())
}

/// Bare id or expanded object.
fn extract_ref<'a>(val: &'a Value, path: &[&str]) -> Option<&'a str> {
    let node = jget(val, path)?;
    node.as_str()
        .or_else(|| node.get("id").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn extract_timestamp(val: &Value, path: &[&str]) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(jget(val, path)?.as_i64()?, 0)
}

/// Subscription-level field, else the first item's.
fn extract_period(object: &Value, field: &str) -> Option<DateTime<Utc>> {
    extract_timestamp(object, &[field]).or_else(|| {
        let item = jget(object, &["items", "data"])?.as_array()?.first()?;
        extract_timestamp(item, &[field])
    })
}

/// Maps a processor status onto the local enum by name. Statuses with no
/// local counterpart (`trialing`, `past_due`, ...) map to `None`.
pub fn map_processor_status(status: &str) -> Option<SubscriptionStatus> {
    status.parse::<SubscriptionStatus>().ok()
}

/// Applies verified processor events to local subscription state.
#[derive(Clone)]
pub struct WebhookReconciler {
    users: Arc<dyn UserRepository>,
    plans: Arc<dyn PlanRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl WebhookReconciler {
    pub fn new(
        users: Arc<dyn UserRepository>,
        plans: Arc<dyn PlanRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
    ) -> Self {
        Self {
            users,
            plans,
            subscriptions,
        }
    }

    pub async fn handle(&self, event: &StripeEvent) -> Result<ReconcileOutcome, WebhookError> {
        let evt_type = event.r#type.as_str();
        if !matches!(
            evt_type,
            CHECKOUT_SESSION_COMPLETED | SUBSCRIPTION_UPDATED | SUBSCRIPTION_DELETED
        ) {
            return Err(WebhookError::UnhandledEventType(evt_type.to_string()));
        }

        let object = jget(&event.payload, &["data", "object"])
            .ok_or_else(|| WebhookError::Malformed("missing data.object".into()))?;
        match evt_type {
            CHECKOUT_SESSION_COMPLETED => self.checkout_completed(object).await,
            SUBSCRIPTION_UPDATED => self.subscription_updated(object).await,
            _ => self.subscription_deleted(object).await,
        }
    }

    async fn checkout_completed(&self, session: &Value) -> Result<ReconcileOutcome, WebhookError> {
        let customer_id = extract_ref(session, &["customer"])
            .ok_or_else(|| WebhookError::Malformed("checkout session has no customer".into()))?;
        let stripe_subscription_id = extract_ref(session, &["subscription"]).ok_or_else(|| {
            WebhookError::Malformed("checkout session has no subscription".into())
        })?;
        let plan_id = extract_str(session, &["metadata", "planId"])
            .ok_or_else(|| WebhookError::Malformed("metadata.planId missing".into()))?;
        let plan_id = Uuid::parse_str(plan_id)
            .map_err(|_| WebhookError::Malformed(format!("metadata.planId invalid: {plan_id}")))?;
        let billing_period = extract_str(session, &["metadata", "billingPeriod"])
            .ok_or_else(|| WebhookError::Malformed("metadata.billingPeriod missing".into()))?
            .parse::<BillingPeriod>()
            .map_err(|e| WebhookError::Malformed(e.to_string()))?;

        let user_id = self
            .users
            .find_user_id_by_stripe_customer_id(customer_id)
            .await?
            .ok_or_else(|| WebhookError::UnknownReference(format!("customer {customer_id}")))?;
        if self.plans.find_plan(plan_id).await?.is_none() {
            return Err(WebhookError::UnknownReference(format!("plan {plan_id}")));
        }

        let checkout = CheckoutSubscription {
            user_id,
            plan_id,
            billing_period,
            stripe_subscription_id: stripe_subscription_id.to_string(),
        };
        match self.subscriptions.upsert_from_checkout(&checkout).await {
            Ok(CheckoutUpsertOutcome::Created(_)) => {
                info!(%user_id, %plan_id, stripe_subscription_id, "subscription recorded from checkout");
                Ok(ReconcileOutcome::SubscriptionCreated { user_id })
            }
            Ok(CheckoutUpsertOutcome::AlreadyRecorded(_)) => {
                info!(stripe_subscription_id, "checkout already recorded");
                Ok(ReconcileOutcome::DuplicateDelivery)
            }
            Err(SubscriptionError::AlreadySubscribed) => {
                warn!(
                    %user_id,
                    stripe_subscription_id,
                    "checkout completed for a user who already has a subscription"
                );
                Ok(ReconcileOutcome::UserAlreadySubscribed { user_id })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn processor_update(&self, object: &Value) -> Result<ProcessorSubscriptionUpdate, WebhookError> {
        let stripe_subscription_id = extract_str(object, &["id"])
            .ok_or_else(|| WebhookError::Malformed("subscription has no id".into()))?;
        let raw_status = extract_str(object, &["status"]);
        let status = raw_status.and_then(map_processor_status);
        if let (Some(raw), None) = (raw_status, status) {
            info!(stripe_subscription_id, status = raw, "processor status has no local mapping");
        }

        Ok(ProcessorSubscriptionUpdate {
            stripe_subscription_id: stripe_subscription_id.to_string(),
            status,
            current_period_start: extract_period(object, "current_period_start"),
            current_period_end: extract_period(object, "current_period_end"),
            cancel_at: extract_timestamp(object, &["cancel_at"]),
            auto_renew: jget(object, &["cancel_at_period_end"])
                .and_then(Value::as_bool)
                .map(|ending| !ending),
        })
    }

    async fn sync(&self, update: ProcessorSubscriptionUpdate) -> Result<ReconcileOutcome, WebhookError> {
        match self.subscriptions.sync_from_processor(&update).await? {
            Some(sub) => {
                info!(
                    stripe_subscription_id = %update.stripe_subscription_id,
                    status = %sub.status,
                    "subscription synced from processor"
                );
                Ok(ReconcileOutcome::SubscriptionSynced { status: sub.status })
            }
            None => {
                info!(
                    stripe_subscription_id = %update.stripe_subscription_id,
                    "no local subscription for processor update"
                );
                Ok(ReconcileOutcome::UnknownSubscription)
            }
        }
    }

    async fn subscription_updated(&self, object: &Value) -> Result<ReconcileOutcome, WebhookError> {
        let update = self.processor_update(object)?;
        self.sync(update).await
    }

    async fn subscription_deleted(&self, object: &Value) -> Result<ReconcileOutcome, WebhookError> {
        let mut update = self.processor_update(object)?;
        update.status = Some(SubscriptionStatus::Canceled);
        update.auto_renew = Some(false);
        self.sync(update).await
    }
}

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::subscription::{
    CheckoutSubscription, NewSubscription, ProcessorSubscriptionUpdate, Subscription,
    SubscriptionAction, SubscriptionError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutUpsertOutcome {
    Created(Subscription),
    /// The external subscription id was already recorded (processor retry).
    AlreadyRecorded(Subscription),
}

/// Persistence for subscriptions. Uniqueness of `user_id` and
/// `stripe_subscription_id` is enforced by the store, not by callers.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Subscription>, sqlx::Error>;

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// Inserts an ACTIVE subscription. A second row for the same user fails
    /// with `AlreadySubscribed`.
    async fn create_direct(&self, new: &NewSubscription)
        -> Result<Subscription, SubscriptionError>;

    /// Reads, transitions and writes the user's subscription under one lock.
    async fn apply_transition(
        &self,
        user_id: Uuid,
        action: SubscriptionAction,
        reason: Option<&str>,
    ) -> Result<Subscription, SubscriptionError>;

    /// Idempotent on `stripe_subscription_id`. A user who already owns a row
    /// under another external id yields `AlreadySubscribed`.
    async fn upsert_from_checkout(
        &self,
        checkout: &CheckoutSubscription,
    ) -> Result<CheckoutUpsertOutcome, SubscriptionError>;

    /// Returns `None` when no local row carries the external id.
    async fn sync_from_processor(
        &self,
        update: &ProcessorSubscriptionUpdate,
    ) -> Result<Option<Subscription>, sqlx::Error>;
}

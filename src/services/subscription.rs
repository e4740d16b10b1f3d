use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::subscription::{
    end_date, BillingPeriod, NewSubscription, Subscription, SubscriptionAction, SubscriptionError,
};

/// User-driven lifecycle operations. Every write goes through the repository
/// so the transition and its persistence share one transaction.
#[derive(Clone)]
pub struct SubscriptionService {
    repo: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionService {
    pub fn new(repo: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repo }
    }

    /// Self-service creation: ACTIVE immediately, first period starting at `start`.
    pub async fn create_subscription(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        billing_period: BillingPeriod,
        start: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        // Early exit only; the unique index on user_id is what closes the race.
        if self.repo.find_by_user(user_id).await?.is_some() {
            return Err(SubscriptionError::AlreadySubscribed);
        }

        let current_period_end =
            end_date(start, billing_period).ok_or(SubscriptionError::DateOutOfRange)?;
        let sub = self
            .repo
            .create_direct(&NewSubscription {
                user_id,
                plan_id,
                billing_period,
                current_period_start: start,
                current_period_end,
            })
            .await?;

        info!(%user_id, %plan_id, period = %billing_period, "subscription created");
        Ok(sub)
    }

    pub async fn cancel_subscription(
        &self,
        user_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Subscription, SubscriptionError> {
        let sub = self
            .repo
            .apply_transition(user_id, SubscriptionAction::Cancel, reason)
            .await?;
        info!(%user_id, "subscription canceled");
        Ok(sub)
    }

    pub async fn renew_subscription(&self, user_id: Uuid) -> Result<Subscription, SubscriptionError> {
        let sub = self
            .repo
            .apply_transition(user_id, SubscriptionAction::Renew, None)
            .await?;
        info!(%user_id, "subscription renewed");
        Ok(sub)
    }

    pub async fn current(&self, user_id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        self.repo.find_by_user(user_id).await
    }
}

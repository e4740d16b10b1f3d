use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

use crate::db::plan_repository::PlanRepository;
use crate::db::subscription_repository::{CheckoutUpsertOutcome, SubscriptionRepository};
use crate::db::user_repository::UserRepository;
use crate::models::plan::{NewPlan, Plan};
use crate::models::subscription::{
    CheckoutSubscription, NewSubscription, ProcessorSubscriptionUpdate, Subscription,
    SubscriptionAction, SubscriptionError, SubscriptionStatus,
};
use crate::models::user::User;

/// In-memory stand-in for all repositories. The subscription list enforces the
/// same uniqueness rules as the Postgres schema.
#[derive(Default)]
pub struct MockDb {
    pub users: Mutex<Vec<User>>,
    pub plans: Mutex<Vec<Plan>>,
    pub subscriptions: Mutex<Vec<Subscription>>,
    pub should_fail: bool,
}

impl MockDb {
    pub fn with_user(self, email: &str, stripe_customer_id: Option<&str>) -> (Self, User) {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            stripe_customer_id: stripe_customer_id.map(str::to_string),
            created_at: Utc::now(),
        };
        self.users.lock().unwrap().push(user.clone());
        (self, user)
    }

    pub fn with_plan(
        self,
        name: &str,
        monthly_key: Option<&str>,
        yearly_key: Option<&str>,
    ) -> (Self, Plan) {
        let position = self.plans.lock().unwrap().len() as i32 + 1;
        let plan = Plan {
            id: Uuid::new_v4(),
            name: name.to_string(),
            monthly_price: 1200,
            yearly_price: 12000,
            stripe_monthly_lookup_key: monthly_key.map(str::to_string),
            stripe_yearly_lookup_key: yearly_key.map(str::to_string),
            position,
        };
        self.plans.lock().unwrap().push(plan.clone());
        (self, plan)
    }

    /// Every repository call fails as if the connection dropped.
    pub fn failing(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn subscription_for(&self, user_id: Uuid) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.user_id == user_id)
            .cloned()
    }

    pub fn insert_subscription(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        status: SubscriptionStatus,
    ) -> Subscription {
        let mut sub = crate::models::subscription::sample_subscription(status);
        sub.user_id = user_id;
        sub.plan_id = plan_id;
        self.subscriptions.lock().unwrap().push(sub.clone());
        sub
    }

    fn fail_if_configured(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MockDb {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == user_id)
            .cloned())
    }

    async fn find_user_id_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.stripe_customer_id.as_deref() == Some(stripe_customer_id))
            .map(|u| u.id))
    }

    async fn set_user_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<String, sqlx::Error> {
        self.fail_if_configured()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        let stored = user
            .stripe_customer_id
            .get_or_insert_with(|| stripe_customer_id.to_string());
        Ok(stored.clone())
    }
}

#[async_trait]
impl PlanRepository for MockDb {
    async fn list_plans(&self) -> Result<Vec<Plan>, sqlx::Error> {
        self.fail_if_configured()?;
        let mut plans = self.plans.lock().unwrap().clone();
        plans.sort_by(|a, b| a.position.cmp(&b.position).then(a.name.cmp(&b.name)));
        Ok(plans)
    }

    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == plan_id)
            .cloned())
    }

    async fn count_plans(&self) -> Result<i64, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self.plans.lock().unwrap().len() as i64)
    }

    async fn insert_plan(&self, plan: &NewPlan) -> Result<Plan, sqlx::Error> {
        self.fail_if_configured()?;
        let created = Plan {
            id: Uuid::new_v4(),
            name: plan.name.clone(),
            monthly_price: plan.monthly_price,
            yearly_price: plan.yearly_price,
            stripe_monthly_lookup_key: plan.stripe_monthly_lookup_key.clone(),
            stripe_yearly_lookup_key: plan.stripe_yearly_lookup_key.clone(),
            position: plan.position,
        };
        self.plans.lock().unwrap().push(created.clone());
        Ok(created)
    }
}

#[async_trait]
impl SubscriptionRepository for MockDb {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self.subscription_for(user_id))
    }

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(stripe_subscription_id))
            .cloned())
    }

    async fn create_direct(
        &self,
        new: &NewSubscription,
    ) -> Result<Subscription, SubscriptionError> {
        self.fail_if_configured()?;
        let mut subs = self.subscriptions.lock().unwrap();
        if subs.iter().any(|s| s.user_id == new.user_id) {
            return Err(SubscriptionError::AlreadySubscribed);
        }
        let now = Utc::now();
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            plan_id: new.plan_id,
            status: SubscriptionStatus::Active,
            billing_period: new.billing_period,
            stripe_subscription_id: None,
            current_period_start: Some(new.current_period_start),
            current_period_end: Some(new.current_period_end),
            cancellation_reason: None,
            cancel_at: None,
            auto_renew: true,
            created_at: now,
            updated_at: now,
        };
        subs.push(sub.clone());
        Ok(sub)
    }

    async fn apply_transition(
        &self,
        user_id: Uuid,
        action: SubscriptionAction,
        reason: Option<&str>,
    ) -> Result<Subscription, SubscriptionError> {
        self.fail_if_configured()?;
        let mut subs = self.subscriptions.lock().unwrap();
        let stored = subs
            .iter_mut()
            .find(|s| s.user_id == user_id)
            .ok_or(SubscriptionError::NotFound)?;
        let mut next = stored.clone();
        next.apply(action, reason)?;
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }

    async fn upsert_from_checkout(
        &self,
        checkout: &CheckoutSubscription,
    ) -> Result<CheckoutUpsertOutcome, SubscriptionError> {
        self.fail_if_configured()?;
        let mut subs = self.subscriptions.lock().unwrap();
        let external_id = checkout.stripe_subscription_id.as_str();
        if let Some(existing) = subs
            .iter()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(external_id))
        {
            return Ok(CheckoutUpsertOutcome::AlreadyRecorded(existing.clone()));
        }
        if subs.iter().any(|s| s.user_id == checkout.user_id) {
            return Err(SubscriptionError::AlreadySubscribed);
        }
        let now = Utc::now();
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: checkout.user_id,
            plan_id: checkout.plan_id,
            status: SubscriptionStatus::Active,
            billing_period: checkout.billing_period,
            stripe_subscription_id: Some(checkout.stripe_subscription_id.clone()),
            current_period_start: None,
            current_period_end: None,
            cancellation_reason: None,
            cancel_at: None,
            auto_renew: true,
            created_at: now,
            updated_at: now,
        };
        subs.push(sub.clone());
        Ok(CheckoutUpsertOutcome::Created(sub))
    }

    async fn sync_from_processor(
        &self,
        update: &ProcessorSubscriptionUpdate,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_if_configured()?;
        let mut subs = self.subscriptions.lock().unwrap();
        let external_id = update.stripe_subscription_id.as_str();
        let Some(stored) = subs
            .iter_mut()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(external_id))
        else {
            return Ok(None);
        };
        update.apply_to(stored);
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }
}

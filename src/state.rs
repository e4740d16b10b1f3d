use crate::config::Config;
use crate::db::{
    plan_repository::PlanRepository, subscription_repository::SubscriptionRepository,
    user_repository::UserRepository,
};
use crate::services::billing::{BillingGateway, BillingUrls};
use crate::services::stripe::StripeService;
use crate::services::subscription::SubscriptionService;
use crate::services::webhook::WebhookReconciler;
use crate::utils::jwt::JwtKeys;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub stripe: Arc<dyn StripeService>,
    pub config: Arc<Config>,
    pub jwt_keys: Arc<JwtKeys>,
}

impl AppState {
    pub fn subscription_service(&self) -> SubscriptionService {
        SubscriptionService::new(self.subscriptions.clone())
    }

    pub fn billing_gateway(&self) -> BillingGateway {
        BillingGateway::new(
            self.stripe.clone(),
            self.users.clone(),
            BillingUrls::from_base(&self.config.app_base_url),
        )
    }

    pub fn webhook_reconciler(&self) -> WebhookReconciler {
        WebhookReconciler::new(
            self.users.clone(),
            self.plans.clone(),
            self.subscriptions.clone(),
        )
    }
}

use core::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Renewing,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Renewing => "renewing",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "renewing" => Ok(SubscriptionStatus::Renewing),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(ParseEnumError {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    #[serde(alias = "annual")]
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }

    fn months(&self) -> Months {
        match self {
            BillingPeriod::Monthly => Months::new(1),
            BillingPeriod::Yearly => Months::new(12),
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingPeriod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingPeriod::Monthly),
            "yearly" | "annual" => Ok(BillingPeriod::Yearly),
            other => Err(ParseEnumError {
                kind: "billing period",
                value: other.to_string(),
            }),
        }
    }
}

/// User-initiated changes to an existing subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Cancel,
    Renew,
}

impl SubscriptionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionAction::Cancel => "cancel",
            SubscriptionAction::Renew => "renew",
        }
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("You already have an active subscription.")]
    AlreadySubscribed,
    #[error("Can't {action} already {current} subscription")]
    InvalidStatus {
        current: SubscriptionStatus,
        action: &'static str,
    },
    #[error("subscription not found")]
    NotFound,
    #[error("billing period end date is out of range")]
    DateOutOfRange,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub billing_period: BillingPeriod,
    pub stripe_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// True once the processor has scheduled the subscription to end.
    pub fn is_cancelling(&self) -> bool {
        self.cancel_at.is_some()
    }

    pub fn cancel(&mut self, reason: Option<&str>) -> Result<(), SubscriptionError> {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Renewing => {
                self.status = SubscriptionStatus::Canceled;
                self.auto_renew = false;
                if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
                    self.cancellation_reason = Some(reason.to_string());
                }
                Ok(())
            }
            current @ (SubscriptionStatus::Canceled | SubscriptionStatus::Expired) => {
                Err(SubscriptionError::InvalidStatus {
                    current,
                    action: SubscriptionAction::Cancel.as_str(),
                })
            }
        }
    }

    pub fn renew(&mut self) -> Result<(), SubscriptionError> {
        match self.status {
            SubscriptionStatus::Canceled => {
                self.status = SubscriptionStatus::Renewing;
                self.auto_renew = true;
                Ok(())
            }
            current => Err(SubscriptionError::InvalidStatus {
                current,
                action: SubscriptionAction::Renew.as_str(),
            }),
        }
    }

    pub fn apply(
        &mut self,
        action: SubscriptionAction,
        reason: Option<&str>,
    ) -> Result<(), SubscriptionError> {
        match action {
            SubscriptionAction::Cancel => self.cancel(reason),
            SubscriptionAction::Renew => self.renew(),
        }
    }
}

/// End of the first billing period. Uses calendar months, so a start on the
/// 31st lands on the last day of a shorter month.
pub fn end_date(start: DateTime<Utc>, period: BillingPeriod) -> Option<DateTime<Utc>> {
    start.checked_add_months(period.months())
}

/// Fields for a subscription created directly by the user (no checkout).
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub billing_period: BillingPeriod,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

/// Fields carried by a completed checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSubscription {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub billing_period: BillingPeriod,
    pub stripe_subscription_id: String,
}

/// Processor-side view of a subscription, keyed by its external id.
#[derive(Debug, Clone, Default)]
pub struct ProcessorSubscriptionUpdate {
    pub stripe_subscription_id: String,
    pub status: Option<SubscriptionStatus>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub auto_renew: Option<bool>,
}

impl ProcessorSubscriptionUpdate {
    pub fn apply_to(&self, sub: &mut Subscription) {
        if let Some(status) = self.status {
            sub.status = status;
            if status == SubscriptionStatus::Canceled {
                sub.auto_renew = false;
            }
        }
        if let Some(start) = self.current_period_start {
            sub.current_period_start = Some(start);
        }
        if let Some(end) = self.current_period_end {
            sub.current_period_end = Some(end);
        }
        sub.cancel_at = self.cancel_at;
        if let Some(auto_renew) = self.auto_renew {
            if sub.status != SubscriptionStatus::Canceled {
                sub.auto_renew = auto_renew;
            }
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub billing_period: String,
    pub stripe_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = sqlx::Error;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SubscriptionStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let billing_period = row
            .billing_period
            .parse::<BillingPeriod>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            status,
            billing_period,
            stripe_subscription_id: row.stripe_subscription_id,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancellation_reason: row.cancellation_reason,
            cancel_at: row.cancel_at,
            auto_renew: row.auto_renew,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_subscription(status: SubscriptionStatus) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        plan_id: Uuid::new_v4(),
        status,
        billing_period: BillingPeriod::Monthly,
        stripe_subscription_id: None,
        current_period_start: None,
        current_period_end: None,
        cancellation_reason: None,
        cancel_at: None,
        auto_renew: status != SubscriptionStatus::Canceled,
        created_at: now,
        updated_at: now,
    }
}

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::subscription::BillingPeriod;

/// Catalog entry. Prices are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub monthly_price: i64,
    pub yearly_price: i64,
    pub stripe_monthly_lookup_key: Option<String>,
    pub stripe_yearly_lookup_key: Option<String>,
    pub position: i32,
}

impl Plan {
    pub fn lookup_key(&self, period: BillingPeriod) -> Option<&str> {
        let key = match period {
            BillingPeriod::Monthly => self.stripe_monthly_lookup_key.as_deref(),
            BillingPeriod::Yearly => self.stripe_yearly_lookup_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewPlan {
    pub name: String,
    pub monthly_price: i64,
    pub yearly_price: i64,
    pub stripe_monthly_lookup_key: Option<String>,
    pub stripe_yearly_lookup_key: Option<String>,
    pub position: i32,
}

/// Catalog seeded by the `load_plans` binary when the table is empty.
pub fn default_catalog() -> Vec<NewPlan> {
    vec![
        NewPlan {
            name: "Standard".into(),
            monthly_price: 1200,
            yearly_price: 12000,
            stripe_monthly_lookup_key: Some("standard_monthly".into()),
            stripe_yearly_lookup_key: Some("standard_yearly".into()),
            position: 1,
        },
        NewPlan {
            name: "Supporter".into(),
            monthly_price: 1600,
            yearly_price: 16000,
            stripe_monthly_lookup_key: Some("supporter_monthly".into()),
            stripe_yearly_lookup_key: Some("supporter_yearly".into()),
            position: 2,
        },
    ]
}

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::plan::{NewPlan, Plan};

/// Read access to the plan catalog; `insert_plan` is only used by the loader.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn list_plans(&self) -> Result<Vec<Plan>, sqlx::Error>;
    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, sqlx::Error>;
    async fn count_plans(&self) -> Result<i64, sqlx::Error>;
    async fn insert_plan(&self, plan: &NewPlan) -> Result<Plan, sqlx::Error>;
}

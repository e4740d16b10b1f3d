use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::plan_repository::PlanRepository;
use crate::models::plan::{NewPlan, Plan};

pub struct PostgresPlanRepository {
    pub pool: PgPool,
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn list_plans(&self) -> Result<Vec<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, monthly_price, yearly_price,
                   stripe_monthly_lookup_key, stripe_yearly_lookup_key, position
            FROM plans
            ORDER BY position, name
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, monthly_price, yearly_price,
                   stripe_monthly_lookup_key, stripe_yearly_lookup_key, position
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn count_plans(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM plans")
            .fetch_one(&self.pool)
            .await
    }

    async fn insert_plan(&self, plan: &NewPlan) -> Result<Plan, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            r#"
            INSERT INTO plans (id, name, monthly_price, yearly_price,
                               stripe_monthly_lookup_key, stripe_yearly_lookup_key, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, name, monthly_price, yearly_price,
                      stripe_monthly_lookup_key, stripe_yearly_lookup_key, position
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&plan.name)
        .bind(plan.monthly_price)
        .bind(plan.yearly_price)
        .bind(plan.stripe_monthly_lookup_key.as_deref())
        .bind(plan.stripe_yearly_lookup_key.as_deref())
        .bind(plan.position)
        .fetch_one(&self.pool)
        .await
    }
}

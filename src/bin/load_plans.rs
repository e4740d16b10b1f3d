use std::env;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

use subscription_billing::db::plan_repository::PlanRepository;
use subscription_billing::db::postgres_plan_repository::PostgresPlanRepository;
use subscription_billing::db::run_migrations;
use subscription_billing::models::plan::default_catalog;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required to load plans")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let repo = PostgresPlanRepository { pool };
    let existing = repo.count_plans().await.context("failed to count plans")?;
    if existing > 0 {
        tracing::info!(existing, "plans table already has data, nothing to load");
        return Ok(());
    }

    for plan in default_catalog() {
        let created = repo
            .insert_plan(&plan)
            .await
            .with_context(|| format!("failed to insert plan {}", plan.name))?;
        tracing::info!(plan_id = %created.id, name = %created.name, "loaded plan");
    }

    Ok(())
}

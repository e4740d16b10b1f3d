#[cfg(test)]
pub mod mock_db;
pub mod plan_repository;
pub mod postgres_plan_repository;
pub mod postgres_subscription_repository;
pub mod postgres_user_repository;
pub mod subscription_repository;
pub mod user_repository;

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code == "23505";
        }
    }
    false
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

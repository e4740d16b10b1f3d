use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::user_repository::UserRepository;
use crate::models::user::User;

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, stripe_customer_id, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_user_id_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE stripe_customer_id = $1")
            .bind(stripe_customer_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_user_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<String, sqlx::Error> {
        // COALESCE keeps the first writer's id when two checkouts race.
        let stored = sqlx::query_scalar::<_, Option<String>>(
            r#"
            UPDATE users
            SET stripe_customer_id = COALESCE(stripe_customer_id, $2)
            WHERE id = $1
            RETURNING stripe_customer_id
            "#,
        )
        .bind(user_id)
        .bind(stripe_customer_id)
        .fetch_optional(&self.pool)
        .await?;

        match stored.flatten() {
            Some(id) => Ok(id),
            None => Err(sqlx::Error::RowNotFound),
        }
    }
}
